use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::delay::DelayQueue;
use crate::error::GameError;
use crate::ledger::{UserLedger, UserProfile};
use crate::model::{DelayMsg, Room};
use crate::protocol::CreateGameReq;
use crate::session::{ClientTx, GameSession};
use crate::store::SnapshotStore;

/// Maps room ids to live sessions and owns the shared collaborators.
/// Sessions are created lazily; room state itself lives in the snapshot
/// store, so a registry restart only loses connections, not rooms.
pub struct RoomRegistry {
    sessions: Mutex<HashMap<String, Arc<GameSession>>>,
    store: Arc<dyn SnapshotStore>,
    ledger: Arc<dyn UserLedger>,
    delay: Arc<DelayQueue>,
    config: Config,
}

impl RoomRegistry {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        ledger: Arc<dyn UserLedger>,
        delay: Arc<DelayQueue>,
        config: Config,
    ) -> Arc<Self> {
        Arc::new(RoomRegistry {
            sessions: Mutex::new(HashMap::new()),
            store,
            ledger,
            delay,
            config,
        })
    }

    /// Create a room and seat its creator as the dealer.
    pub async fn create_room(
        &self,
        req: &CreateGameReq,
        creator: &UserProfile,
    ) -> Result<String, GameError> {
        if req.low_bet_chips <= 0 || req.low_bet_chips >= req.top_bet_chips || req.total_rounds < 1
        {
            return Err(GameError::BadRoomConfig);
        }

        let game_id = Uuid::new_v4().simple().to_string();
        let room = Room::new(
            &game_id,
            req.minimum,
            req.low_bet_chips,
            req.top_bet_chips,
            req.total_rounds,
            creator.id,
        );
        self.store.put_room(&room)?;

        let session = self.session(&game_id);
        session.join(creator, false).await?;
        info!(game_id = %game_id, creator = creator.id, "room created");
        Ok(game_id)
    }

    /// Called on WebSocket upgrade; a missing room fails the connection.
    pub fn verify(&self, game_id: &str) -> Result<(), GameError> {
        self.store.room(game_id).map(|_| ())
    }

    pub fn attach(
        &self,
        game_id: &str,
        user_id: i64,
        token: &str,
        tx: ClientTx,
    ) -> Result<Arc<GameSession>, GameError> {
        self.verify(game_id)?;
        let session = self.session(game_id);
        session.attach(user_id, token, tx);
        Ok(session)
    }

    pub fn detach(&self, game_id: &str, user_id: i64, token: &str) {
        if let Some(session) = self.get(game_id) {
            session.detach(user_id, token);
        }
    }

    pub fn get(&self, game_id: &str) -> Option<Arc<GameSession>> {
        self.locked().get(game_id).cloned()
    }

    fn session(&self, game_id: &str) -> Arc<GameSession> {
        self.locked()
            .entry(game_id.to_string())
            .or_insert_with(|| {
                GameSession::new(
                    game_id.to_string(),
                    self.store.clone(),
                    self.ledger.clone(),
                    self.delay.clone(),
                    self.config.clone(),
                )
            })
            .clone()
    }

    /// Wire the delay queue into the rooms. Ticks for rooms with no live
    /// session are requeued until the room is loaded again.
    pub fn start_dispatcher(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        self.delay.clone().start_consume(move |payload| {
            let registry = registry.clone();
            async move {
                let msg = match DelayMsg::from_bytes(&payload) {
                    Ok(msg) => msg,
                    Err(err) => {
                        warn!(%err, "delay message parse failed");
                        return true;
                    }
                };
                match registry.get(&msg.game_id) {
                    Some(session) => session.handle_delay(msg).await,
                    None => false,
                }
            }
        })
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, Arc<GameSession>>> {
        self.sessions.lock().unwrap_or_else(|err| err.into_inner())
    }
}
