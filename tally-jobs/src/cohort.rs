use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::error;

use tally_store::{Event, EventCursor, EventStore};

use crate::{
    config::JobsConfig,
    error::Result,
    events::{kinds, AppInstalled},
    scheduler::{Job, JobReport},
};

/// Days-after-install horizons retention is reported at.
pub const RETENTION_HORIZONS: [u32; 5] = [1, 2, 3, 7, 30];

/// Activity signals for retention purposes.
const ACTIVITY_KINDS: &[&str] = &[
    kinds::APP_INSTALLED,
    kinds::SESSION_STARTED,
    kinds::GAME_STARTED,
];

/// Users who installed the same day, sliced by campaign and platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CohortKey {
    pub install_date: NaiveDate,
    pub campaign: String,
    pub platform: String,
}

/// Derived retention row for one cohort. `retained` holds one entry per
/// horizon the cohort is old enough to report; a too-young cohort simply has
/// no entry, it is never a zero.
#[derive(Debug, Clone, Serialize)]
pub struct CohortRow {
    pub key: CohortKey,
    pub size: u64,
    pub retained: BTreeMap<u32, u64>,
}

/// Combined retention for one horizon across many cohorts: numerators and
/// denominators summed separately, divided once.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RetentionRate {
    pub horizon: u32,
    pub retained: u64,
    pub size: u64,
}

impl RetentionRate {
    pub fn fraction(&self) -> f64 {
        self.retained as f64 / self.size as f64
    }
}

/// Rolls cohorts up into one rate per horizon. Never averages per-cohort
/// percentages; cohorts too young for the horizon are excluded entirely.
/// Returns `None` when no cohort is mature for the horizon.
pub fn rollup_retention<'a>(
    rows: impl IntoIterator<Item = &'a CohortRow>,
    horizon: u32,
) -> Option<RetentionRate> {
    let mut retained = 0;
    let mut size = 0;

    for row in rows {
        if let Some(r) = row.retained.get(&horizon) {
            retained += r;
            size += row.size;
        }
    }

    (size > 0).then_some(RetentionRate {
        horizon,
        retained,
        size,
    })
}

/// Target tables of the cohort aggregator.
#[derive(Clone, Default)]
pub struct CohortStore(Arc<RwLock<CohortInner>>);

#[derive(Default)]
struct CohortInner {
    // user -> cohort; the first install wins, reinstalls do not move users
    members: HashMap<String, CohortKey>,
    cohorts: BTreeMap<CohortKey, HashSet<String>>,
    // day -> users with any activity signal that day
    activity: BTreeMap<NaiveDate, HashSet<String>>,
    rows: BTreeMap<CohortKey, CohortRow>,
}

impl CohortStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_install(
        &self,
        user_id: &str,
        date: NaiveDate,
        campaign: String,
        platform: String,
    ) {
        let mut inner = self.0.write();

        if inner.members.contains_key(user_id) {
            return;
        }

        let key = CohortKey {
            install_date: date,
            campaign,
            platform,
        };

        inner.members.insert(user_id.to_owned(), key.clone());
        inner
            .cohorts
            .entry(key)
            .or_default()
            .insert(user_id.to_owned());
    }

    pub fn record_activity(&self, user_id: &str, date: NaiveDate) {
        self.0
            .write()
            .activity
            .entry(date)
            .or_default()
            .insert(user_id.to_owned());
    }

    /// Recomputes every cohort row as of `today`. The rows are a pure
    /// function of the recorded history, so recomputing is always safe.
    /// `cohort_size` is fixed by membership; `retained_d` counts members
    /// active exactly `d` days after install, and a horizon is reported only
    /// once `today >= install_date + d`.
    pub fn recompute(&self, today: NaiveDate) {
        let mut inner = self.0.write();
        let mut rows = BTreeMap::new();

        for (key, users) in inner.cohorts.iter() {
            let mut row = CohortRow {
                key: key.clone(),
                size: users.len() as u64,
                retained: BTreeMap::new(),
            };

            for d in RETENTION_HORIZONS {
                let Some(target) = key.install_date.checked_add_days(Days::new(u64::from(d)))
                else {
                    continue;
                };

                if today < target {
                    continue;
                }

                let active = inner.activity.get(&target);
                let retained = users
                    .iter()
                    .filter(|u| active.map(|a| a.contains(*u)).unwrap_or(false))
                    .count() as u64;

                row.retained.insert(d, retained);
            }

            rows.insert(key.clone(), row);
        }

        inner.rows = rows;
    }

    pub fn rows(&self) -> Vec<CohortRow> {
        self.0.read().rows.values().cloned().collect()
    }

    pub fn row(&self, key: &CohortKey) -> Option<CohortRow> {
        self.0.read().rows.get(key).cloned()
    }

    pub fn cohort_of(&self, user_id: &str) -> Option<CohortKey> {
        self.0.read().members.get(user_id).cloned()
    }
}

/// Daily cursor consumer building install cohorts and their retention rows.
#[derive(Clone)]
pub struct CohortJob {
    events: EventStore,
    cohorts: CohortStore,
    cursor: Arc<RwLock<Option<EventCursor>>>,
    config: JobsConfig,
}

impl CohortJob {
    pub fn new(events: &EventStore, cohorts: &CohortStore) -> Self {
        Self {
            events: events.clone(),
            cohorts: cohorts.clone(),
            cursor: Arc::new(RwLock::new(None)),
            config: JobsConfig::default(),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;

        self
    }

    fn fold(&self, event: &Event) -> Result<()> {
        if event.event_type == kinds::APP_INSTALLED {
            let payload: AppInstalled = event.to_payload()?;

            self.cohorts.record_install(
                &event.user_id,
                event.day(),
                payload.campaign,
                payload.platform,
            );
        }

        self.cohorts.record_activity(&event.user_id, event.day());

        Ok(())
    }
}

#[async_trait]
impl Job for CohortJob {
    fn name(&self) -> &'static str {
        "cohort-retention"
    }

    fn cadence(&self) -> Duration {
        self.config.cohort_cadence
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();

        loop {
            let after = *self.cursor.read();
            let batch = self
                .events
                .read_since(after, ACTIVITY_KINDS, self.config.batch_size)
                .await?;

            if batch.is_empty() {
                break;
            }

            for event in batch.iter() {
                match self.fold(event) {
                    Ok(()) => report.applied += 1,
                    Err(e) => {
                        error!("cohort failed on event {}: {e}", event.id);
                        report.failed += 1;
                    }
                }

                *self.cursor.write() = Some((event.received_at, event.id));
            }
        }

        self.cohorts.recompute(now.date_naive());

        Ok(report)
    }
}
