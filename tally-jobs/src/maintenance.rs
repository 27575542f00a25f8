use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tally_store::{EventStore, PartitionManager};

use crate::{
    config::JobsConfig,
    error::Result,
    scheduler::{Job, JobReport},
};

/// Daily partition upkeep: create the weeks ahead, retire the weeks past
/// retention. Failures are logged by the scheduler and retried next cycle;
/// if a future week is still missing when its first event arrives, `append`
/// fails loudly rather than dropping the event.
#[derive(Clone)]
pub struct PartitionMaintenanceJob {
    events: EventStore,
    partitions: PartitionManager,
    config: JobsConfig,
}

impl PartitionMaintenanceJob {
    pub fn new(events: &EventStore) -> Self {
        Self {
            events: events.clone(),
            partitions: PartitionManager::new(events),
            config: JobsConfig::default(),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;

        self
    }
}

#[async_trait]
impl Job for PartitionMaintenanceJob {
    fn name(&self) -> &'static str {
        "partition-maintenance"
    }

    fn cadence(&self) -> Duration {
        self.config.maintenance_cadence
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<JobReport> {
        let store_config = self.events.store_config();

        let created = self
            .partitions
            .ensure_future_partitions(now, store_config.partition_horizon_weeks)
            .await?;

        let dropped = self
            .partitions
            .retire_old_partitions(now, store_config.partition_retention_weeks)
            .await?;

        Ok(JobReport {
            applied: created.len() + dropped.len(),
            failed: 0,
        })
    }
}
