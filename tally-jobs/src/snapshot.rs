use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::{
    analytics::{DailyMetricsRow, MetricsStore},
    cohort::{rollup_retention, CohortStore, RetentionRate, RETENTION_HORIZONS},
    config::JobsConfig,
    error::Result,
    leaderboard::{LeaderboardRow, LeaderboardStore},
    roi::{CampaignRoiRow, RoiStore},
    scheduler::{Job, JobReport},
};

/// Players shown on the dashboard leaderboard.
pub const SNAPSHOT_TOP_PLAYERS: usize = 100;

/// Read-optimized dashboard aggregate, rebuilt whole and swapped in one step.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardSnapshot {
    pub version: u64,
    pub built_at: Option<DateTime<Utc>>,
    pub top_players: Vec<LeaderboardRow>,
    pub daily: Vec<DailyMetricsRow>,
    pub retention: Vec<RetentionRate>,
    pub campaigns: Vec<CampaignRoiRow>,
}

/// How trustworthy the snapshot a reader just got is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Staleness {
    Fresh,
    /// A rebuild is running; the returned snapshot is the previous one.
    RefreshInFlight,
    /// The last rebuild failed; the returned snapshot predates it.
    LastRefreshFailed,
}

/// Published snapshot views. Rebuilds go into a fresh value that replaces the
/// current one atomically, so readers never observe a half-built snapshot,
/// and reads always succeed: a failed or in-flight refresh only changes the
/// staleness indicator.
#[derive(Clone, Default)]
pub struct SnapshotViews(Arc<ViewInner>);

#[derive(Default)]
struct ViewInner {
    current: RwLock<Arc<DashboardSnapshot>>,
    versions: AtomicU64,
    refreshing: AtomicBool,
    failed: AtomicBool,
}

impl SnapshotViews {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last successful snapshot plus its staleness.
    pub fn read(&self) -> (Arc<DashboardSnapshot>, Staleness) {
        let snapshot = self.0.current.read().clone();

        let staleness = if self.0.refreshing.load(Ordering::Acquire) {
            Staleness::RefreshInFlight
        } else if self.0.failed.load(Ordering::Acquire) {
            Staleness::LastRefreshFailed
        } else {
            Staleness::Fresh
        };

        (snapshot, staleness)
    }

    fn begin(&self) {
        self.0.refreshing.store(true, Ordering::Release);
    }

    fn publish(&self, mut snapshot: DashboardSnapshot) {
        snapshot.version = self.0.versions.fetch_add(1, Ordering::AcqRel) + 1;

        *self.0.current.write() = Arc::new(snapshot);

        self.0.failed.store(false, Ordering::Release);
        self.0.refreshing.store(false, Ordering::Release);
    }

    fn fail(&self) {
        self.0.failed.store(true, Ordering::Release);
        self.0.refreshing.store(false, Ordering::Release);
    }
}

/// Periodic rebuild of the dashboard snapshot from the aggregate stores.
#[derive(Clone)]
pub struct SnapshotJob {
    views: SnapshotViews,
    board: LeaderboardStore,
    metrics: MetricsStore,
    cohorts: CohortStore,
    roi: RoiStore,
    config: JobsConfig,
}

impl SnapshotJob {
    pub fn new(
        views: &SnapshotViews,
        board: &LeaderboardStore,
        metrics: &MetricsStore,
        cohorts: &CohortStore,
        roi: &RoiStore,
    ) -> Self {
        Self {
            views: views.clone(),
            board: board.clone(),
            metrics: metrics.clone(),
            cohorts: cohorts.clone(),
            roi: roi.clone(),
            config: JobsConfig::default(),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;

        self
    }

    fn build(&self, now: DateTime<Utc>) -> Result<DashboardSnapshot> {
        let cohort_rows = self.cohorts.rows();
        let retention = RETENTION_HORIZONS
            .iter()
            .filter_map(|d| rollup_retention(cohort_rows.iter(), *d))
            .collect();

        Ok(DashboardSnapshot {
            version: 0,
            built_at: Some(now),
            top_players: self.board.top(SNAPSHOT_TOP_PLAYERS),
            daily: self.metrics.daily_rows(),
            retention,
            campaigns: self.roi.rows(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_never_fail_and_staleness_is_explicit() {
        let views = SnapshotViews::new();

        let (initial, staleness) = views.read();
        assert_eq!(initial.version, 0);
        assert_eq!(staleness, Staleness::Fresh);

        // A refresh in flight leaves the previous snapshot readable.
        views.begin();
        let (during, staleness) = views.read();
        assert_eq!(during.version, 0);
        assert_eq!(staleness, Staleness::RefreshInFlight);

        views.fail();
        let (after_failure, staleness) = views.read();
        assert_eq!(after_failure.version, 0);
        assert_eq!(staleness, Staleness::LastRefreshFailed);

        views.begin();
        views.publish(DashboardSnapshot::default());
        let (fresh, staleness) = views.read();
        assert_eq!(fresh.version, 1);
        assert_eq!(staleness, Staleness::Fresh);
    }
}

#[async_trait]
impl Job for SnapshotJob {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    fn cadence(&self) -> Duration {
        self.config.snapshot_cadence
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        self.views.begin();

        match self.build(now) {
            Ok(snapshot) => {
                let applied = snapshot.daily.len()
                    + snapshot.top_players.len()
                    + snapshot.campaigns.len();

                self.views.publish(snapshot);
                debug!("snapshot rebuilt");

                Ok(JobReport { applied, failed: 0 })
            }
            Err(e) => {
                self.views.fail();

                Err(e)
            }
        }
    }
}
