use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ArenaError, ArenaResult},
    tournament::TournamentId,
};

/// One awarded prize. Created exactly once per rewarded participant at
/// tournament close; `claimed_at` transitions null → timestamp exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prize {
    pub prize_id: Uuid,
    pub user_id: String,
    pub tournament_id: TournamentId,
    pub rank: u32,
    pub coins: u64,
    pub gems: u64,
    pub awarded_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Result of a successful claim call. A retried claim by the owner of an
/// already-claimed prize is a success, not an error, so client retries are
/// harmless.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(Prize),
    AlreadyYours(Prize),
}

/// Write-once prize records with poll/claim access.
#[derive(Clone, Default)]
pub struct PrizeLedger(Arc<RwLock<LedgerInner>>);

#[derive(Default)]
struct LedgerInner {
    prizes: HashMap<Uuid, Prize>,
    by_winner: HashSet<(TournamentId, String)>,
}

impl PrizeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a prize unless one already exists for
    /// `(tournament_id, user_id)`. Returns false when it did, so re-running
    /// prize computation cannot award twice.
    pub fn award(&self, prize: Prize) -> bool {
        let mut inner = self.0.write();
        let winner = (prize.tournament_id.clone(), prize.user_id.clone());

        if inner.by_winner.contains(&winner) {
            return false;
        }

        inner.by_winner.insert(winner);
        inner.prizes.insert(prize.prize_id, prize);

        true
    }

    /// Unclaimed prizes of one user, oldest first.
    pub fn list_pending(&self, user_id: &str) -> Vec<Prize> {
        let mut prizes = self
            .0
            .read()
            .prizes
            .values()
            .filter(|p| p.user_id == user_id && p.claimed_at.is_none())
            .cloned()
            .collect::<Vec<Prize>>();

        prizes.sort_by_key(|p| p.awarded_at);

        prizes
    }

    pub fn claim(
        &self,
        prize_id: Uuid,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> ArenaResult<ClaimOutcome> {
        let mut inner = self.0.write();

        let prize = inner
            .prizes
            .get_mut(&prize_id)
            .ok_or(ArenaError::PrizeNotFound(prize_id))?;

        if prize.user_id != user_id {
            return Err(ArenaError::Forbidden(prize_id));
        }

        if prize.claimed_at.is_some() {
            return Ok(ClaimOutcome::AlreadyYours(prize.clone()));
        }

        // claimed_at must never precede awarded_at, even with a skewed clock.
        prize.claimed_at = Some(now.max(prize.awarded_at));

        Ok(ClaimOutcome::Claimed(prize.clone()))
    }

    pub fn get(&self, prize_id: Uuid) -> Option<Prize> {
        self.0.read().prizes.get(&prize_id).cloned()
    }

    pub fn prizes_of_tournament(&self, id: &TournamentId) -> Vec<Prize> {
        let mut prizes = self
            .0
            .read()
            .prizes
            .values()
            .filter(|p| &p.tournament_id == id)
            .cloned()
            .collect::<Vec<Prize>>();

        prizes.sort_by_key(|p| p.rank);

        prizes
    }
}
