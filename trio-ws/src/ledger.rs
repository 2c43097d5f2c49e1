use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::GameError;
use crate::model::unix_now;

/// Bet-history row kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum BetKind {
    Ante = 0,
    Raise,
    Win,
}

impl From<BetKind> for i32 {
    fn from(kind: BetKind) -> i32 {
        kind as i32
    }
}

impl TryFrom<i32> for BetKind {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BetKind::Ante),
            1 => Ok(BetKind::Raise),
            2 => Ok(BetKind::Win),
            other => Err(format!("invalid bet kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub nickname: String,
    pub head_pic: String,
}

/// Append-only bet-history row; the source of truth for a round's pot and
/// the end-of-game leaderboard. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRecord {
    pub id: i64,
    pub user_id: i64,
    pub game_id: String,
    pub round_id: i32,
    pub state: BetKind,
    pub amount: i64,
    pub balance_before: i64,
    pub create_at: i64,
}

/// Per-seat net for a round or a whole game, sent as `records` in events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEntry {
    pub user_id: i64,
    pub amount: i64,
}

/// Balance store plus bet ledger. Every debit/credit commits the balance
/// delta and its history row in one transaction.
pub trait UserLedger: Send + Sync {
    fn profile(&self, user_id: i64) -> Result<UserProfile, GameError>;
    fn balances(&self, user_ids: &[i64]) -> Result<HashMap<i64, i64>, GameError>;
    /// Debit each seat's ante, clipping to its balance; returns the actual
    /// per-seat amounts the engine folds into the pot.
    fn debit_ante(
        &self,
        game_id: &str,
        round: i32,
        user_ids: &[i64],
        ante: i64,
    ) -> Result<HashMap<i64, i64>, GameError>;
    /// Debit a raise; fails outright when the balance cannot cover it.
    fn debit_raise(
        &self,
        game_id: &str,
        round: i32,
        user_id: i64,
        amount: i64,
    ) -> Result<i64, GameError>;
    /// Credit the winner, clamping the claim to the round's ANTE+RAISE sum;
    /// returns the credited amount.
    fn credit_win(
        &self,
        game_id: &str,
        round: i32,
        user_id: i64,
        pot_claim: i64,
    ) -> Result<i64, GameError>;
    /// Per-seat net for one round, biggest winner first.
    fn round_net(&self, game_id: &str, round: i32) -> Vec<RecordEntry>;
    /// Per-seat net across the whole game, biggest winner first.
    fn game_net(&self, game_id: &str) -> Vec<RecordEntry>;
}

struct Account {
    profile: UserProfile,
    balance: i64,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<i64, Account>,
    history: Vec<BetRecord>,
    next_row_id: i64,
}

impl Inner {
    fn push_row(&mut self, game_id: &str, round: i32, user_id: i64, kind: BetKind, amount: i64, balance_before: i64) {
        self.next_row_id += 1;
        self.history.push(BetRecord {
            id: self.next_row_id,
            user_id,
            game_id: game_id.to_string(),
            round_id: round,
            state: kind,
            amount,
            balance_before,
            create_at: unix_now(),
        });
    }

    fn net(&self, game_id: &str, round: Option<i32>) -> Vec<RecordEntry> {
        let mut totals: HashMap<i64, i64> = HashMap::new();
        for row in &self.history {
            if row.game_id != game_id || round.is_some_and(|r| r != row.round_id) {
                continue;
            }
            let delta = match row.state {
                BetKind::Win => row.amount,
                BetKind::Ante | BetKind::Raise => -row.amount,
            };
            *totals.entry(row.user_id).or_default() += delta;
        }

        let mut entries: Vec<RecordEntry> = totals
            .into_iter()
            .map(|(user_id, amount)| RecordEntry { user_id, amount })
            .collect();
        entries.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.user_id.cmp(&b.user_id)));
        entries
    }
}

/// In-memory ledger. A single lock spans each operation, standing in for
/// the database transaction boundary.
#[derive(Default)]
pub struct MemLedger {
    inner: Mutex<Inner>,
}

impl MemLedger {
    pub fn new() -> Self {
        MemLedger::default()
    }

    pub fn add_user(&self, profile: UserProfile, balance: i64) {
        let mut inner = self.locked();
        inner.accounts.insert(profile.id, Account { profile, balance });
    }

    /// History snapshot, for operator reconciliation and tests.
    pub fn history(&self) -> Vec<BetRecord> {
        self.locked().history.clone()
    }

    fn locked(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl UserLedger for MemLedger {
    fn profile(&self, user_id: i64) -> Result<UserProfile, GameError> {
        self.locked()
            .accounts
            .get(&user_id)
            .map(|account| account.profile.clone())
            .ok_or(GameError::UserNotExist)
    }

    fn balances(&self, user_ids: &[i64]) -> Result<HashMap<i64, i64>, GameError> {
        let inner = self.locked();
        Ok(user_ids
            .iter()
            .filter_map(|user_id| {
                inner
                    .accounts
                    .get(user_id)
                    .map(|account| (*user_id, account.balance))
            })
            .collect())
    }

    fn debit_ante(
        &self,
        game_id: &str,
        round: i32,
        user_ids: &[i64],
        ante: i64,
    ) -> Result<HashMap<i64, i64>, GameError> {
        let mut inner = self.locked();
        let mut debited = HashMap::with_capacity(user_ids.len());
        for &user_id in user_ids {
            let balance = inner
                .accounts
                .get(&user_id)
                .map(|account| account.balance)
                .ok_or(GameError::UserNotExist)?;

            // Partial antes are allowed: a short stack posts what it has.
            let amount = if balance <= 0 { 0 } else { balance.min(ante) };
            if let Some(account) = inner.accounts.get_mut(&user_id) {
                account.balance = (balance - amount).max(0);
            }
            inner.push_row(game_id, round, user_id, BetKind::Ante, amount, balance);
            debited.insert(user_id, amount);
        }
        Ok(debited)
    }

    fn debit_raise(
        &self,
        game_id: &str,
        round: i32,
        user_id: i64,
        amount: i64,
    ) -> Result<i64, GameError> {
        let mut inner = self.locked();
        let balance = inner
            .accounts
            .get(&user_id)
            .map(|account| account.balance)
            .ok_or(GameError::UserNotExist)?;

        if balance < amount {
            return Err(GameError::UserInsufficientBalance);
        }

        if let Some(account) = inner.accounts.get_mut(&user_id) {
            account.balance = balance - amount;
        }
        inner.push_row(game_id, round, user_id, BetKind::Raise, amount, balance);
        Ok(amount)
    }

    fn credit_win(
        &self,
        game_id: &str,
        round: i32,
        user_id: i64,
        pot_claim: i64,
    ) -> Result<i64, GameError> {
        let mut inner = self.locked();
        let balance = inner
            .accounts
            .get(&user_id)
            .map(|account| account.balance)
            .ok_or(GameError::UserNotExist)?;

        // The history rows are authoritative for the pot size.
        let pot: i64 = inner
            .history
            .iter()
            .filter(|row| {
                row.game_id == game_id
                    && row.round_id == round
                    && matches!(row.state, BetKind::Ante | BetKind::Raise)
            })
            .map(|row| row.amount)
            .sum();
        let credited = pot_claim.min(pot);

        if let Some(account) = inner.accounts.get_mut(&user_id) {
            account.balance = balance.max(0) + credited;
        }
        inner.push_row(game_id, round, user_id, BetKind::Win, credited, balance);
        Ok(credited)
    }

    fn round_net(&self, game_id: &str, round: i32) -> Vec<RecordEntry> {
        self.locked().net(game_id, Some(round))
    }

    fn game_net(&self, game_id: &str) -> Vec<RecordEntry> {
        self.locked().net(game_id, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with(users: &[(i64, i64)]) -> MemLedger {
        let ledger = MemLedger::new();
        for &(id, balance) in users {
            ledger.add_user(
                UserProfile {
                    id,
                    nickname: format!("u{id}"),
                    head_pic: String::new(),
                },
                balance,
            );
        }
        ledger
    }

    #[test]
    fn ante_is_clipped_to_balance() {
        let ledger = ledger_with(&[(1, 100), (2, 4)]);
        let debited = ledger.debit_ante("g", 1, &[1, 2], 10).unwrap();
        assert_eq!(debited[&1], 10);
        assert_eq!(debited[&2], 4);

        let balances = ledger.balances(&[1, 2]).unwrap();
        assert_eq!(balances[&1], 90);
        assert_eq!(balances[&2], 0);

        let rows = ledger.history();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|row| row.state == BetKind::Ante));
        assert_eq!(rows.iter().map(|row| row.amount).sum::<i64>(), 14);
    }

    #[test]
    fn raise_hard_fails_below_balance() {
        let ledger = ledger_with(&[(1, 30)]);
        assert_eq!(
            ledger.debit_raise("g", 1, 1, 40),
            Err(GameError::UserInsufficientBalance)
        );
        // the failed attempt leaves no row behind
        assert!(ledger.history().is_empty());

        assert_eq!(ledger.debit_raise("g", 1, 1, 30).unwrap(), 30);
        assert_eq!(ledger.balances(&[1]).unwrap()[&1], 0);
    }

    #[test]
    fn win_is_clamped_to_round_rows() {
        let ledger = ledger_with(&[(1, 100), (2, 100)]);
        ledger.debit_ante("g", 1, &[1, 2], 10).unwrap();
        ledger.debit_raise("g", 1, 2, 15).unwrap();

        // claim far more than the round collected
        let credited = ledger.credit_win("g", 1, 1, 9999).unwrap();
        assert_eq!(credited, 35);
        assert_eq!(ledger.balances(&[1]).unwrap()[&1], 125);
    }

    #[test]
    fn round_net_reports_winner_and_losers() {
        let ledger = ledger_with(&[(1, 100), (2, 100)]);
        ledger.debit_ante("g", 1, &[1, 2], 10).unwrap();
        ledger.credit_win("g", 1, 1, 20).unwrap();

        let net = ledger.round_net("g", 1);
        assert_eq!(
            net,
            vec![
                RecordEntry { user_id: 1, amount: 10 },
                RecordEntry { user_id: 2, amount: -10 },
            ]
        );
    }

    #[test]
    fn game_net_spans_rounds() {
        let ledger = ledger_with(&[(1, 100), (2, 100)]);
        ledger.debit_ante("g", 1, &[1, 2], 10).unwrap();
        ledger.credit_win("g", 1, 1, 20).unwrap();
        ledger.debit_ante("g", 2, &[1, 2], 10).unwrap();
        ledger.credit_win("g", 2, 2, 20).unwrap();

        let net = ledger.game_net("g");
        assert_eq!(
            net,
            vec![
                RecordEntry { user_id: 1, amount: 0 },
                RecordEntry { user_id: 2, amount: 0 },
            ]
        );
    }
}
