use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, error};

use tally_arena::{ArenaError, ArenaStore, LifecycleManager};
use tally_store::{Event, EventCursor, EventStore};

use crate::{
    config::JobsConfig,
    error::Result,
    events::{kinds, GameEnded, GameMode},
    scheduler::{Job, JobReport},
};

/// Cursor-tracked consumer feeding tournament standings. The processed flag
/// on `game_ended` belongs to the global leaderboard; this job tracks its own
/// `(received_at, id)` cursor instead and its upserts tolerate re-reads.
#[derive(Clone)]
pub struct TournamentBoardJob {
    events: EventStore,
    arena: ArenaStore,
    cursor: Arc<RwLock<Option<EventCursor>>>,
    config: JobsConfig,
}

impl TournamentBoardJob {
    pub fn new(events: &EventStore, arena: &ArenaStore) -> Self {
        Self {
            events: events.clone(),
            arena: arena.clone(),
            cursor: Arc::new(RwLock::new(None)),
            config: JobsConfig::default(),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;

        self
    }

    fn fold(&self, event: &Event) -> Result<bool> {
        let payload: GameEnded = event.to_payload()?;

        if payload.mode != GameMode::Tournament {
            return Ok(false);
        }

        // Only games inside an open tournament's window count; a game outside
        // every window can never retroactively enter a closed cycle.
        let Some(tournament) = self
            .arena
            .open_tournaments()
            .into_iter()
            .find(|t| t.window_contains(event.received_at))
        else {
            debug!(
                "game {} at {} is outside every open tournament window",
                event.id, event.received_at
            );

            return Ok(false);
        };

        match self.arena.record_score(
            &tournament.id,
            &event.user_id,
            payload.score,
            event.received_at,
        ) {
            Ok(_) => Ok(true),
            Err(ArenaError::TournamentFull(id, max)) => {
                debug!("tournament {id} is full ({max}), game {} dropped", event.id);

                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Job for TournamentBoardJob {
    fn name(&self) -> &'static str {
        "tournament-board"
    }

    fn cadence(&self) -> Duration {
        self.config.tournament_board_cadence
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();

        loop {
            let after = *self.cursor.read();
            let batch = self
                .events
                .read_since(after, &[kinds::GAME_ENDED], self.config.batch_size)
                .await?;

            if batch.is_empty() {
                break;
            }

            for event in batch.iter() {
                match self.fold(event) {
                    Ok(true) => report.applied += 1,
                    Ok(false) => {}
                    Err(e) => {
                        // Malformed payloads cannot become well-formed on
                        // retry; log, count and move past them.
                        error!("tournament board failed on event {}: {e}", event.id);
                        report.failed += 1;
                    }
                }

                *self.cursor.write() = Some((event.received_at, event.id));
            }
        }

        Ok(report)
    }
}

/// Frequent tick of the tournament lifecycle: creates the next cycle
/// (idempotent by deterministic id) and advances statuses on wall-clock
/// time, which triggers prize computation at close.
#[derive(Clone)]
pub struct TournamentLifecycleJob {
    manager: LifecycleManager,
    config: JobsConfig,
}

impl TournamentLifecycleJob {
    pub fn new(manager: LifecycleManager) -> Self {
        Self {
            manager,
            config: JobsConfig::default(),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;

        self
    }
}

#[async_trait]
impl Job for TournamentLifecycleJob {
    fn name(&self) -> &'static str {
        "tournament-lifecycle"
    }

    fn cadence(&self) -> Duration {
        self.config.tournament_lifecycle_cadence
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        self.manager.create_next(now);

        let ended = self.manager.advance_statuses(now)?;

        Ok(JobReport {
            applied: ended.len(),
            failed: 0,
        })
    }
}
