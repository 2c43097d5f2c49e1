use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use trio_engine::Hand;

use crate::error::GameError;
use crate::model::{JoinUser, Room};

/// Round-scoped snapshots of room, seat, and dealt-hand state. Keys carry
/// the round so stale rounds never alias; a reconnect within the TTL sees
/// consistent state.
pub trait SnapshotStore: Send + Sync {
    fn room(&self, game_id: &str) -> Result<Room, GameError>;
    fn put_room(&self, room: &Room) -> Result<(), GameError>;
    fn seat(&self, game_id: &str, user_id: i64, round: i32) -> Option<JoinUser>;
    fn put_seat(&self, game_id: &str, round: i32, seat: &JoinUser) -> Result<(), GameError>;
    fn hand(&self, game_id: &str, user_id: i64, round: i32) -> Result<Hand, GameError>;
    /// Atomic multi-key write of a room plus its seats and dealt hands.
    fn put_round(
        &self,
        room: &Room,
        seats: &[JoinUser],
        hands: &[(i64, Hand)],
    ) -> Result<(), GameError>;
}

fn room_key(game_id: &str) -> String {
    format!("game-room:{game_id}")
}

fn seat_key(game_id: &str, user_id: i64, round: i32) -> String {
    format!("join-user:{game_id}-{user_id}-{round}")
}

fn hand_key(game_id: &str, user_id: i64, round: i32) -> String {
    format!("user-poker:{game_id}-{user_id}-{round}")
}

fn to_json<T: Serialize>(value: &T) -> Result<String, GameError> {
    serde_json::to_string(value).map_err(|_| GameError::InternalCache)
}

struct Entry {
    json: String,
    expires_at: Instant,
}

/// In-memory snapshot store. Values are held as JSON strings, exactly as
/// the production KV store holds them.
pub struct MemStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemStore {
    pub fn new(ttl: Duration) -> Self {
        MemStore {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.locked();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.json.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set_many(&self, pairs: Vec<(String, String)>) {
        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.locked();
        for (key, json) in pairs {
            entries.insert(key, Entry { json, expires_at });
        }
    }

    fn get_parsed<T: DeserializeOwned>(&self, key: &str) -> Option<Result<T, GameError>> {
        self.get(key)
            .map(|json| serde_json::from_str(&json).map_err(|_| GameError::StateParse))
    }
}

impl SnapshotStore for MemStore {
    fn room(&self, game_id: &str) -> Result<Room, GameError> {
        self.get_parsed(&room_key(game_id))
            .unwrap_or(Err(GameError::GameNotExist))
    }

    fn put_room(&self, room: &Room) -> Result<(), GameError> {
        self.set_many(vec![(room_key(&room.game_id), to_json(room)?)]);
        Ok(())
    }

    fn seat(&self, game_id: &str, user_id: i64, round: i32) -> Option<JoinUser> {
        self.get_parsed(&seat_key(game_id, user_id, round))?.ok()
    }

    fn put_seat(&self, game_id: &str, round: i32, seat: &JoinUser) -> Result<(), GameError> {
        self.set_many(vec![(
            seat_key(game_id, seat.user_id, round),
            to_json(seat)?,
        )]);
        Ok(())
    }

    fn hand(&self, game_id: &str, user_id: i64, round: i32) -> Result<Hand, GameError> {
        self.get_parsed(&hand_key(game_id, user_id, round))
            .unwrap_or(Err(GameError::InternalCache))
    }

    fn put_round(
        &self,
        room: &Room,
        seats: &[JoinUser],
        hands: &[(i64, Hand)],
    ) -> Result<(), GameError> {
        let mut pairs = Vec::with_capacity(1 + seats.len() + hands.len());
        pairs.push((room_key(&room.game_id), to_json(room)?));
        for seat in seats {
            pairs.push((
                seat_key(&room.game_id, seat.user_id, room.curr_round),
                to_json(seat)?,
            ));
        }
        for (user_id, hand) in hands {
            pairs.push((
                hand_key(&room.game_id, *user_id, room.curr_round),
                to_json(hand)?,
            ));
        }
        self.set_many(pairs);
        Ok(())
    }
}
