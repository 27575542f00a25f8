use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use tally_store::{Event, EventStore};

use crate::{
    config::JobsConfig,
    error::Result,
    events::{kinds, GameEnded, GameMode},
    scheduler::{Job, JobReport},
};

/// Global endless-mode leaderboard row, keyed by user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardRow {
    pub user_id: String,
    pub high_score: i64,
    pub total_games: u32,
    pub total_playtime_secs: u64,
    pub last_played_at: DateTime<Utc>,
}

/// Target table of the leaderboard aggregator; it has no other writer.
#[derive(Clone, Default)]
pub struct LeaderboardStore(Arc<RwLock<BoardInner>>);

#[derive(Default)]
struct BoardInner {
    rows: HashMap<String, LeaderboardRow>,
    seen: HashSet<Uuid>,
}

impl LeaderboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one endless game. Replays of an already-folded event are no-ops,
    /// so an at-least-once batch replay cannot double count the counters;
    /// `high_score` and `last_played_at` are max-folds and tolerate anything.
    pub fn apply(
        &self,
        event_id: Uuid,
        user_id: &str,
        score: i64,
        duration_secs: u64,
        at: DateTime<Utc>,
    ) -> bool {
        let mut inner = self.0.write();

        if !inner.seen.insert(event_id) {
            return false;
        }

        inner
            .rows
            .entry(user_id.to_owned())
            .and_modify(|row| {
                row.high_score = row.high_score.max(score);
                row.total_games += 1;
                row.total_playtime_secs += duration_secs;
                row.last_played_at = row.last_played_at.max(at);
            })
            .or_insert_with(|| LeaderboardRow {
                user_id: user_id.to_owned(),
                high_score: score,
                total_games: 1,
                total_playtime_secs: duration_secs,
                last_played_at: at,
            });

        true
    }

    pub fn get(&self, user_id: &str) -> Option<LeaderboardRow> {
        self.0.read().rows.get(user_id).cloned()
    }

    /// Best players first; ties broken by who got there earlier.
    pub fn top(&self, limit: usize) -> Vec<LeaderboardRow> {
        let mut rows = self
            .0
            .read()
            .rows
            .values()
            .cloned()
            .collect::<Vec<LeaderboardRow>>();

        rows.sort_by(|a, b| {
            b.high_score
                .cmp(&a.high_score)
                .then(a.last_played_at.cmp(&b.last_played_at))
                .then(a.user_id.cmp(&b.user_id))
        });
        rows.truncate(limit);

        rows
    }

    pub fn len(&self) -> usize {
        self.0.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().rows.is_empty()
    }
}

/// Minutes-cadence consumer of `game_ended`. It owns that type's processed
/// flag: aggregates are applied first and `mark_processed` is the sole
/// commit boundary, so a crash in between replays the batch into the
/// seen-set guard instead of losing or double counting it.
#[derive(Clone)]
pub struct LeaderboardJob {
    events: EventStore,
    board: LeaderboardStore,
    config: JobsConfig,
}

impl LeaderboardJob {
    pub fn new(events: &EventStore, board: &LeaderboardStore) -> Self {
        Self {
            events: events.clone(),
            board: board.clone(),
            config: JobsConfig::default(),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;

        self
    }

    fn fold(&self, event: &Event) -> Result<bool> {
        let payload: GameEnded = event.to_payload()?;

        if payload.mode != GameMode::Endless {
            return Ok(false);
        }

        Ok(self.board.apply(
            event.id,
            &event.user_id,
            payload.score,
            payload.duration_secs,
            event.received_at,
        ))
    }
}

#[async_trait]
impl Job for LeaderboardJob {
    fn name(&self) -> &'static str {
        "leaderboard"
    }

    fn cadence(&self) -> Duration {
        self.config.leaderboard_cadence
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();

        loop {
            let batch = self
                .events
                .fetch_unprocessed(&[kinds::GAME_ENDED], self.config.batch_size)
                .await?;

            if batch.is_empty() {
                break;
            }

            let mut done = Vec::with_capacity(batch.len());

            for event in batch.iter() {
                match self.fold(event) {
                    Ok(applied) => {
                        done.push(event.id);

                        if applied {
                            report.applied += 1;
                        }
                    }
                    Err(e) => {
                        error!("leaderboard failed on event {}: {e}", event.id);
                        report.failed += 1;
                        self.events.mark_failed(event.id, &e.to_string()).await?;
                    }
                }
            }

            // Only failed events left in the batch; they wait for the next
            // cycle rather than spinning here.
            if done.is_empty() {
                break;
            }

            self.events.mark_processed(&done).await?;
        }

        Ok(report)
    }
}
