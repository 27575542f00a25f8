use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use tally_store::WeekKey;

use crate::{
    config::ArenaConfig,
    error::{ArenaError, ArenaResult},
    prize::{Prize, PrizeLedger},
    store::ArenaStore,
    tournament::{Tournament, TournamentId, TournamentStatus},
};

/// Drives recurring tournaments through their lifecycle on wall-clock time
/// and writes the prize ledger at close. Every operation is re-runnable: the
/// deterministic cycle id makes creation idempotent, status transitions are
/// guarded by the state machine, and prize computation skips participants
/// that already carry a final rank.
#[derive(Clone)]
pub struct LifecycleManager {
    store: ArenaStore,
    ledger: PrizeLedger,
    config: ArenaConfig,
}

impl LifecycleManager {
    pub fn new(store: &ArenaStore, ledger: &PrizeLedger) -> Self {
        Self {
            store: store.clone(),
            ledger: ledger.clone(),
            config: ArenaConfig::default(),
        }
    }

    pub fn config(mut self, config: ArenaConfig) -> Self {
        self.config = config;

        self
    }

    /// Creates the next cycle's tournament unless it already exists. Returns
    /// its id when a tournament was actually created.
    pub fn create_next(&self, now: DateTime<Utc>) -> Option<TournamentId> {
        let week = WeekKey::of(now).next();
        let tournament = Tournament::weekly(week, &self.config);
        let id = tournament.id.clone();

        if self.store.insert_if_absent(tournament) {
            info!("created tournament {id}");

            return Some(id);
        }

        None
    }

    /// Walks every open tournament to the status its window dictates.
    /// The active→ended transition is the single trigger for prize
    /// computation; a tournament whose whole window already passed walks
    /// upcoming→active→ended in one pass. Returns the ids closed this call.
    pub fn advance_statuses(&self, now: DateTime<Utc>) -> ArenaResult<Vec<TournamentId>> {
        let mut ended = Vec::new();

        for tournament in self.store.open_tournaments() {
            let mut closed = false;

            self.store.update(&tournament.id, |t| {
                if t.status == TournamentStatus::Upcoming && now >= t.start_at {
                    t.transition_to(TournamentStatus::Active, now)?;
                    info!("tournament {} is now active", t.id);
                }

                if t.status == TournamentStatus::Active && now >= t.end_at {
                    t.transition_to(TournamentStatus::Ended, now)?;
                    info!("tournament {} ended", t.id);
                    closed = true;
                }

                Ok(())
            })?;

            if closed {
                self.compute_prizes(&tournament.id)?;
                ended.push(tournament.id);
            }
        }

        Ok(ended)
    }

    /// Ranks participants by `(best_score desc, last_attempt_at asc)`,
    /// assigns tier rewards and writes one prize per rewarded participant.
    /// Re-runnable: already-ranked participants are skipped and the ledger
    /// enforces one prize per `(tournament, user)`. Returns the number of
    /// prizes written this call.
    pub fn compute_prizes(&self, id: &TournamentId) -> ArenaResult<u32> {
        let tournament = self
            .store
            .get(id)
            .ok_or_else(|| ArenaError::TournamentNotFound(id.clone()))?;

        if tournament.status != TournamentStatus::Ended {
            return Err(ArenaError::NotEnded(id.clone()));
        }

        let awarded_at = tournament.ended_at.unwrap_or_else(Utc::now);

        let mut standings = self.store.participants_of(id);
        standings.sort_by(|a, b| {
            b.best_score
                .cmp(&a.best_score)
                .then(a.last_attempt_at.cmp(&b.last_attempt_at))
                .then(a.user_id.cmp(&b.user_id))
        });

        let mut awarded = 0;

        for (position, participant) in standings.iter().enumerate() {
            let rank = position as u32 + 1;
            let tier = tournament.prize_pool.prize_for(rank);
            let prize_won = tier.map(|t| t.coins).unwrap_or(0);

            if !self.store.set_final(id, &participant.user_id, rank, prize_won) {
                continue;
            }

            let Some(tier) = tier else {
                continue;
            };

            let written = self.ledger.award(Prize {
                prize_id: Uuid::new_v4(),
                user_id: participant.user_id.to_owned(),
                tournament_id: id.clone(),
                rank,
                coins: tier.coins,
                gems: tier.gems,
                awarded_at,
                claimed_at: None,
            });

            if written {
                awarded += 1;
            }
        }

        info!("tournament {id}: {awarded} prizes awarded");

        Ok(awarded)
    }

    /// Cancels an open tournament. No prizes are computed for a cancelled
    /// cycle.
    pub fn cancel(&self, id: &TournamentId, now: DateTime<Utc>) -> ArenaResult<()> {
        self.store.update(id, |t| {
            t.transition_to(TournamentStatus::Cancelled, now)?;
            info!("tournament {} cancelled", t.id);

            Ok(())
        })
    }

    pub fn current_tournament(&self) -> Option<Tournament> {
        self.store.current_tournament()
    }
}
