use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::GameError;
use crate::ledger::{UserLedger, UserProfile};

/// Resolves a bearer token to a user. Session issuance itself (login,
/// registration, JWT minting) lives outside this process.
pub trait Authenticator: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserProfile, GameError>;
}

/// Token directory backed by the ledger's accounts. The dev server issues
/// fixed tokens at startup; a production deployment swaps this for a JWT
/// verifier.
pub struct TokenBook {
    tokens: Mutex<HashMap<String, i64>>,
    ledger: Arc<dyn UserLedger>,
}

impl TokenBook {
    pub fn new(ledger: Arc<dyn UserLedger>) -> Arc<Self> {
        Arc::new(TokenBook {
            tokens: Mutex::new(HashMap::new()),
            ledger,
        })
    }

    pub fn issue(&self, token: impl Into<String>, user_id: i64) {
        self.locked().insert(token.into(), user_id);
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.tokens.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl Authenticator for TokenBook {
    fn verify(&self, token: &str) -> Result<UserProfile, GameError> {
        let user_id = self
            .locked()
            .get(token)
            .copied()
            .ok_or(GameError::NotAuthenticated)?;
        self.ledger.profile(user_id)
    }
}
