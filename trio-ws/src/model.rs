use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::GameError;

/// Delay message kinds carried through the delay queue.
pub const DELAY_AUTO_BET: i32 = 1;
pub const DELAY_GIVE_UP: i32 = 2;

/// Re-delivery budget for delay-queue messages.
pub const DELAY_RETRIES: u32 = 5;

/// Room lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum RoomPhase {
    Wait,
    Playing,
    Ended,
}

impl From<RoomPhase> for i32 {
    fn from(phase: RoomPhase) -> i32 {
        phase as i32
    }
}

impl TryFrom<i32> for RoomPhase {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RoomPhase::Wait),
            1 => Ok(RoomPhase::Playing),
            2 => Ok(RoomPhase::Ended),
            other => Err(format!("invalid room phase: {other}")),
        }
    }
}

/// Per-seat state; the wire integers double as broadcast event codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum SeatState {
    Joined = 0,
    Ready,
    Playing,
    Folded,
    PkLost,
    Won,
}

impl SeatState {
    pub fn event_code(self) -> i32 {
        self as i32
    }
}

impl From<SeatState> for i32 {
    fn from(state: SeatState) -> i32 {
        state as i32
    }
}

impl TryFrom<i32> for SeatState {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SeatState::Joined),
            1 => Ok(SeatState::Ready),
            2 => Ok(SeatState::Playing),
            3 => Ok(SeatState::Folded),
            4 => Ok(SeatState::PkLost),
            5 => Ok(SeatState::Won),
            other => Err(format!("invalid seat state: {other}")),
        }
    }
}

/// One game room. Snapshots of this struct are what the KV store holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub game_id: String,
    /// Membership: user id -> round it joined for.
    pub join_users: HashMap<i64, i32>,
    pub minimum: usize,
    pub state: RoomPhase,
    pub total_rounds: i32,
    pub curr_round: i32,
    /// Location of the acting seat, 0 outside PLAYING.
    pub curr_location: i32,
    pub curr_banker_id: i64,
    pub total_bet_chips: i64,
    pub low_bet_chips: i64,
    pub top_bet_chips: i64,
    pub exposed_bet_chips: i64,
    pub concealed_bet_chips: i64,
    /// Unix timestamp of the current turn start; freshness tag for ticks.
    pub set_location_time: i64,
    /// Every individual bet of the hand, in order, for client animation.
    pub bet_chips: Vec<i64>,
    /// Compare visibility: seat -> opponents whose cards it may see at showdown.
    pub records: HashMap<i64, Vec<i64>>,
    pub create_user: i64,
    pub create_at: i64,
}

impl Room {
    pub fn new(
        game_id: &str,
        minimum: usize,
        low_bet_chips: i64,
        top_bet_chips: i64,
        total_rounds: i32,
        creator: i64,
    ) -> Self {
        Room {
            game_id: game_id.to_string(),
            join_users: HashMap::new(),
            minimum,
            state: RoomPhase::Wait,
            total_rounds,
            curr_round: 1,
            curr_location: 0,
            curr_banker_id: creator,
            total_bet_chips: 0,
            low_bet_chips,
            top_bet_chips,
            exposed_bet_chips: low_bet_chips,
            concealed_bet_chips: low_bet_chips,
            set_location_time: 0,
            bet_chips: Vec::new(),
            records: HashMap::new(),
            create_user: creator,
            create_at: unix_now(),
        }
    }

    /// Minimum next bet for a seat. Blind players pay half the exposed
    /// floor; a player who has looked pays double the blind floor.
    pub fn floor_for(&self, seat: &JoinUser) -> i64 {
        if seat.is_look_card {
            (self.concealed_bet_chips * 2).max(self.exposed_bet_chips)
        } else {
            (self.exposed_bet_chips / 2).max(self.concealed_bet_chips)
        }
    }

    /// Suggested raise amounts sent with the turn announcement.
    pub fn bet_ladder(&self, floor: i64) -> Vec<i64> {
        [1, 2, 5, 10].iter().map(|step| floor * step).collect()
    }

    /// Record a compare between two seats; both gain the right to see the
    /// other's cards at showdown.
    pub fn add_compare_record(&mut self, user_id: i64, other_id: i64) {
        let seen = self.records.entry(user_id).or_default();
        if !seen.contains(&other_id) {
            seen.push(other_id);
        }
        let seen = self.records.entry(other_id).or_default();
        if !seen.contains(&user_id) {
            seen.push(user_id);
        }
    }

    /// User ids joined for the current round.
    pub fn current_members(&self) -> Vec<i64> {
        self.join_users
            .iter()
            .filter(|(_, round)| **round == self.curr_round)
            .map(|(user_id, _)| *user_id)
            .collect()
    }
}

/// One seat in a room, scoped to a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinUser {
    pub user_id: i64,
    pub state: SeatState,
    pub nickname: String,
    pub head_pic: String,
    pub is_banker: bool,
    pub is_look_card: bool,
    pub is_auto_bet: bool,
    /// Dealer sits at 0, everyone else at 1..N in join order.
    pub location: i32,
    /// Chips this seat has put into the pot this hand.
    pub total_bet_chips: i64,
    /// Account balance, refreshed from the ledger on every broadcast.
    pub account_bet_chips: i64,
}

/// Payload of a scheduled tick. `(curr_round, timestamp)` is the freshness
/// tag: a tick whose tag no longer matches the room is dropped on delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayMsg {
    pub game_id: String,
    pub delay_type: i32,
    pub user_id: i64,
    pub curr_round: i32,
    pub timestamp: i64,
    pub bet_chips: i64,
}

impl DelayMsg {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GameError> {
        serde_json::from_slice(bytes).map_err(|_| GameError::StateParse)
    }
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
