use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use tally_store::{Event, EventStore};

use crate::{
    config::JobsConfig,
    error::Result,
    events::{kinds, PurchaseCompleted, TutorialStep},
    scheduler::{Job, JobReport},
};

/// Event types whose processed flag the analytics aggregator owns.
const ANALYTICS_KINDS: &[&str] = &[
    kinds::APP_INSTALLED,
    kinds::SESSION_STARTED,
    kinds::SESSION_ENDED,
    kinds::PURCHASE_COMPLETED,
    kinds::CRASH_REPORTED,
    kinds::TUTORIAL_STEP,
    kinds::AD_IMPRESSION,
];

/// Per-day aggregate row served to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct DailyMetricsRow {
    pub date: NaiveDate,
    pub dau: u64,
    pub mau: u64,
    pub sessions: u64,
    pub revenue: Decimal,
    pub crashes: u64,
    pub new_users: u64,
    pub ad_impressions: u64,
}

/// Lifetime totals for one user.
#[derive(Debug, Clone, Serialize)]
pub struct UserTotals {
    pub user_id: String,
    pub sessions: u64,
    pub revenue: Decimal,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Default)]
struct DayStats {
    active: HashSet<String>,
    sessions: u64,
    revenue: Decimal,
    crashes: u64,
    new_users: u64,
    ad_impressions: u64,
    // funnel step -> distinct users that reached it this day
    funnel: HashMap<String, HashSet<String>>,
}

/// Target tables of the analytics aggregator. Every unique-user figure is
/// backed by a set, never an event count.
#[derive(Clone, Default)]
pub struct MetricsStore(Arc<RwLock<MetricsInner>>);

#[derive(Default)]
struct MetricsInner {
    days: BTreeMap<NaiveDate, DayStats>,
    users: HashMap<String, UserTotals>,
    installed: HashSet<String>,
    seen: HashSet<Uuid>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the per-day and per-user tables. Replays of an
    /// already-folded event are no-ops.
    pub fn fold(&self, event: &Event) -> Result<bool> {
        let mut inner = self.0.write();

        if inner.seen.contains(&event.id) {
            return Ok(false);
        }

        let day = event.day();
        let user = event.user_id.to_owned();

        match event.event_type.as_str() {
            kinds::SESSION_STARTED => {
                inner.days.entry(day).or_default().sessions += 1;
            }
            kinds::SESSION_ENDED => {}
            kinds::PURCHASE_COMPLETED => {
                let payload: PurchaseCompleted = event.to_payload()?;
                inner.days.entry(day).or_default().revenue += payload.amount;
            }
            kinds::CRASH_REPORTED => {
                inner.days.entry(day).or_default().crashes += 1;
            }
            kinds::APP_INSTALLED => {
                if inner.installed.insert(user.to_owned()) {
                    inner.days.entry(day).or_default().new_users += 1;
                }
            }
            kinds::TUTORIAL_STEP => {
                let payload: TutorialStep = event.to_payload()?;
                inner
                    .days
                    .entry(day)
                    .or_default()
                    .funnel
                    .entry(payload.step)
                    .or_default()
                    .insert(user.to_owned());
            }
            kinds::AD_IMPRESSION => {
                inner.days.entry(day).or_default().ad_impressions += 1;
            }
            _ => return Ok(false),
        }

        inner
            .days
            .entry(day)
            .or_default()
            .active
            .insert(user.to_owned());

        let revenue = match event.event_type.as_str() {
            kinds::PURCHASE_COMPLETED => event.to_payload::<PurchaseCompleted>()?.amount,
            _ => Decimal::ZERO,
        };
        let session = event.event_type == kinds::SESSION_STARTED;
        let at = event.received_at;

        inner
            .users
            .entry(user.to_owned())
            .and_modify(|totals| {
                totals.sessions += u64::from(session);
                totals.revenue += revenue;
                totals.first_seen = totals.first_seen.min(at);
                totals.last_seen = totals.last_seen.max(at);
            })
            .or_insert_with(|| UserTotals {
                user_id: user,
                sessions: u64::from(session),
                revenue,
                first_seen: at,
                last_seen: at,
            });

        inner.seen.insert(event.id);

        Ok(true)
    }

    /// Distinct users active on `date`.
    pub fn dau(&self, date: NaiveDate) -> u64 {
        self.0
            .read()
            .days
            .get(&date)
            .map(|d| d.active.len() as u64)
            .unwrap_or(0)
    }

    /// Distinct users active in the trailing 30-day window ending at `date`.
    /// A rolling union, never a per-day snapshot, so `mau(d) >= dau(d)`.
    pub fn mau(&self, date: NaiveDate) -> u64 {
        let from = date.checked_sub_days(Days::new(29)).unwrap_or(NaiveDate::MIN);
        let inner = self.0.read();
        let mut users: HashSet<&String> = HashSet::new();

        for (_, stats) in inner.days.range(from..=date) {
            users.extend(stats.active.iter());
        }

        users.len() as u64
    }

    /// Distinct users that reached `step` on `date`. The same user firing the
    /// step five times still counts once.
    pub fn funnel_count(&self, date: NaiveDate, step: &str) -> u64 {
        self.0
            .read()
            .days
            .get(&date)
            .and_then(|d| d.funnel.get(step))
            .map(|users| users.len() as u64)
            .unwrap_or(0)
    }

    pub fn daily_row(&self, date: NaiveDate) -> DailyMetricsRow {
        let mau = self.mau(date);
        let inner = self.0.read();
        let stats = inner.days.get(&date);

        DailyMetricsRow {
            date,
            dau: stats.map(|d| d.active.len() as u64).unwrap_or(0),
            mau,
            sessions: stats.map(|d| d.sessions).unwrap_or(0),
            revenue: stats.map(|d| d.revenue).unwrap_or(Decimal::ZERO),
            crashes: stats.map(|d| d.crashes).unwrap_or(0),
            new_users: stats.map(|d| d.new_users).unwrap_or(0),
            ad_impressions: stats.map(|d| d.ad_impressions).unwrap_or(0),
        }
    }

    /// Every day with data, oldest first.
    pub fn daily_rows(&self) -> Vec<DailyMetricsRow> {
        let dates = self.0.read().days.keys().copied().collect::<Vec<NaiveDate>>();

        dates.into_iter().map(|date| self.daily_row(date)).collect()
    }

    pub fn user(&self, user_id: &str) -> Option<UserTotals> {
        self.0.read().users.get(user_id).cloned()
    }
}

/// Hourly processed-flag consumer of the session/revenue/crash/install/funnel
/// event family.
#[derive(Clone)]
pub struct AnalyticsJob {
    events: EventStore,
    metrics: MetricsStore,
    config: JobsConfig,
}

impl AnalyticsJob {
    pub fn new(events: &EventStore, metrics: &MetricsStore) -> Self {
        Self {
            events: events.clone(),
            metrics: metrics.clone(),
            config: JobsConfig::default(),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;

        self
    }
}

#[async_trait]
impl Job for AnalyticsJob {
    fn name(&self) -> &'static str {
        "analytics"
    }

    fn cadence(&self) -> Duration {
        self.config.analytics_cadence
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        let mut report = JobReport::default();

        loop {
            let batch = self
                .events
                .fetch_unprocessed(ANALYTICS_KINDS, self.config.batch_size)
                .await?;

            if batch.is_empty() {
                break;
            }

            let mut done = Vec::with_capacity(batch.len());

            for event in batch.iter() {
                match self.metrics.fold(event) {
                    Ok(applied) => {
                        done.push(event.id);

                        if applied {
                            report.applied += 1;
                        }
                    }
                    Err(e) => {
                        error!("analytics failed on event {}: {e}", event.id);
                        report.failed += 1;
                        self.events.mark_failed(event.id, &e.to_string()).await?;
                    }
                }
            }

            if done.is_empty() {
                break;
            }

            self.events.mark_processed(&done).await?;
        }

        Ok(report)
    }
}
