//! Cadence and batch defaults for the aggregation jobs.
//!
//! Each aggregator runs as an independent named job; these are the intervals
//! their loops tick at. Aggregates are eventually consistent within one
//! cycle, nothing here is a freshness guarantee.

use std::time::Duration;

/// Events pulled per aggregator cycle.
pub const DEFAULT_BATCH_SIZE: u16 = 100;

pub const LEADERBOARD_CADENCE: Duration = Duration::from_secs(60);
pub const TOURNAMENT_BOARD_CADENCE: Duration = Duration::from_secs(120);
pub const TOURNAMENT_LIFECYCLE_CADENCE: Duration = Duration::from_secs(60);
pub const ANALYTICS_CADENCE: Duration = Duration::from_secs(3600);
pub const COHORT_CADENCE: Duration = Duration::from_secs(86_400);
pub const ROI_CADENCE: Duration = Duration::from_secs(86_400);
pub const SNAPSHOT_CADENCE: Duration = Duration::from_secs(900);
pub const MAINTENANCE_CADENCE: Duration = Duration::from_secs(86_400);

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub batch_size: u16,
    pub leaderboard_cadence: Duration,
    pub tournament_board_cadence: Duration,
    pub tournament_lifecycle_cadence: Duration,
    pub analytics_cadence: Duration,
    pub cohort_cadence: Duration,
    pub roi_cadence: Duration,
    pub snapshot_cadence: Duration,
    pub maintenance_cadence: Duration,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            leaderboard_cadence: LEADERBOARD_CADENCE,
            tournament_board_cadence: TOURNAMENT_BOARD_CADENCE,
            tournament_lifecycle_cadence: TOURNAMENT_LIFECYCLE_CADENCE,
            analytics_cadence: ANALYTICS_CADENCE,
            cohort_cadence: COHORT_CADENCE,
            roi_cadence: ROI_CADENCE,
            snapshot_cadence: SNAPSHOT_CADENCE,
            maintenance_cadence: MAINTENANCE_CADENCE,
        }
    }
}

impl JobsConfig {
    pub fn batch_size(mut self, value: u16) -> Self {
        self.batch_size = value;
        self
    }

    /// One interval for every job; handy in tests.
    pub fn all_cadences(mut self, value: Duration) -> Self {
        self.leaderboard_cadence = value;
        self.tournament_board_cadence = value;
        self.tournament_lifecycle_cadence = value;
        self.analytics_cadence = value;
        self.cohort_cadence = value;
        self.roi_cadence = value;
        self.snapshot_cadence = value;
        self.maintenance_cadence = value;
        self
    }
}
