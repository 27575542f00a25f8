use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{error::Result, store::EventStore};

/// One ISO week. Boundaries are Monday 00:00 UTC, the single week-start
/// convention every partition and weekly aggregate shares, so a weekly
/// aggregate never straddles a partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct WeekKey {
    pub year: i32,
    pub week: u32,
}

impl WeekKey {
    pub fn of(at: DateTime<Utc>) -> Self {
        let iso = at.date_naive().iso_week();

        Self {
            year: iso.year(),
            week: iso.week(),
        }
    }

    /// Monday 00:00:00 UTC.
    pub fn start(&self) -> DateTime<Utc> {
        let date = NaiveDate::from_isoywd_opt(self.year, self.week, Weekday::Mon)
            .unwrap_or_default();

        Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
    }

    /// Exclusive upper bound: the next week's Monday 00:00:00 UTC.
    pub fn end(&self) -> DateTime<Utc> {
        self.start() + Duration::weeks(1)
    }

    pub fn next(&self) -> Self {
        Self::of(self.start() + Duration::weeks(1))
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start() <= at && at < self.end()
    }

    /// Partition-name suffix, e.g. `2026w32`.
    pub fn label(&self) -> String {
        format!("{}w{:02}", self.year, self.week)
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let (year, week) = label.split_once('w')?;

        Some(Self {
            year: year.parse().ok()?,
            week: week.parse().ok()?,
        })
    }
}

/// Creates future weekly partitions and retires expired ones.
///
/// Creation is idempotent. Retirement drops whole partitions and is
/// irreversible; callers must have exported anything they still need, and
/// only weeks entirely older than the retention window are eligible, so
/// retirement can never race with writes still targeting a partition.
#[derive(Clone)]
pub struct PartitionManager {
    store: EventStore,
}

impl PartitionManager {
    pub fn new(store: &EventStore) -> Self {
        Self {
            store: store.clone(),
        }
    }

    /// Ensures a partition exists for the week containing `now` and each of
    /// the next `horizon_weeks` weeks. Returns the weeks actually created.
    pub async fn ensure_future_partitions(
        &self,
        now: DateTime<Utc>,
        horizon_weeks: u32,
    ) -> Result<Vec<WeekKey>> {
        let mut created = Vec::new();
        let mut week = WeekKey::of(now);

        for _ in 0..=horizon_weeks {
            if self.store.engine().create_partition(week).await? {
                info!("created partition {}", week.label());
                created.push(week);
            }

            week = week.next();
        }

        Ok(created)
    }

    /// Drops every partition entirely older than `retention_weeks` weeks
    /// before `now`. Returns the weeks dropped.
    pub async fn retire_old_partitions(
        &self,
        now: DateTime<Utc>,
        retention_weeks: u32,
    ) -> Result<Vec<WeekKey>> {
        let cutoff = WeekKey::of(now - Duration::weeks(i64::from(retention_weeks))).start();
        let mut dropped = Vec::new();

        for week in self.store.engine().partitions().await? {
            if week.end() > cutoff {
                continue;
            }

            if self.store.engine().drop_partition(week).await? {
                info!("retired partition {}", week.label());
                dropped.push(week);
            }
        }

        Ok(dropped)
    }

    pub async fn partitions(&self) -> Result<Vec<WeekKey>> {
        self.store.engine().partitions().await
    }
}
