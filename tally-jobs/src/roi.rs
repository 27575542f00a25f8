use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dyn_clone::DynClone;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use tally_store::{Event, EventCursor, EventStore};

use crate::{
    config::JobsConfig,
    error::{JobError, Result},
    events::{kinds, AppInstalled, PurchaseCompleted},
    scheduler::{Job, JobReport},
};

/// One day of imported ad spend for one campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    pub date: NaiveDate,
    pub campaign: String,
    pub cost: Decimal,
}

/// External cost import. Fallible by nature; a failed fetch skips the ROI
/// cycle without touching its cursor and without affecting any other job.
#[async_trait]
pub trait SpendImport: DynClone + Send + Sync {
    async fn fetch(&self) -> anyhow::Result<Vec<SpendRecord>>;
}

dyn_clone::clone_trait_object!(SpendImport);

/// Derived per-campaign row. `cpi` and `roi_percent` are `None`, not zero,
/// when their denominator is zero.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignRoiRow {
    pub campaign: String,
    pub cost: Decimal,
    pub installs: u64,
    pub revenue: Decimal,
    pub cpi: Option<Decimal>,
    pub roi_percent: Option<Decimal>,
}

/// Target tables of the campaign ROI aggregator.
#[derive(Clone, Default)]
pub struct RoiStore(Arc<RwLock<RoiInner>>);

#[derive(Default)]
struct RoiInner {
    // (campaign, date) -> cost; re-imports overwrite, they never add up
    spend: BTreeMap<(String, NaiveDate), Decimal>,
    // user -> campaign of their first install
    attribution: HashMap<String, String>,
    // campaign -> distinct installed users
    installs: HashMap<String, HashSet<String>>,
    revenue: HashMap<String, Decimal>,
    seen: HashSet<Uuid>,
}

impl RoiStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn import_spend(&self, records: Vec<SpendRecord>) {
        let mut inner = self.0.write();

        for record in records {
            inner
                .spend
                .insert((record.campaign, record.date), record.cost);
        }
    }

    /// Attributes one install to a campaign; the first install wins and the
    /// distinct-user set makes duplicate installs harmless.
    pub fn record_install(&self, user_id: &str, campaign: &str) {
        let mut inner = self.0.write();

        if !inner.attribution.contains_key(user_id) {
            inner
                .attribution
                .insert(user_id.to_owned(), campaign.to_owned());
        }

        inner
            .installs
            .entry(campaign.to_owned())
            .or_default()
            .insert(user_id.to_owned());
    }

    /// Adds purchase revenue to the buyer's attributed campaign. Replays of
    /// an already-folded purchase are no-ops.
    pub fn record_purchase(&self, event_id: Uuid, user_id: &str, amount: Decimal) -> bool {
        let mut inner = self.0.write();

        if !inner.seen.insert(event_id) {
            return false;
        }

        let campaign = inner
            .attribution
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| "organic".to_owned());

        *inner.revenue.entry(campaign).or_default() += amount;

        true
    }

    pub fn rows(&self) -> Vec<CampaignRoiRow> {
        let inner = self.0.read();

        let mut campaigns = HashSet::new();
        campaigns.extend(inner.spend.keys().map(|(c, _)| c.to_owned()));
        campaigns.extend(inner.installs.keys().cloned());
        campaigns.extend(inner.revenue.keys().cloned());

        let mut rows = campaigns
            .into_iter()
            .map(|campaign| {
                let cost: Decimal = inner
                    .spend
                    .range((campaign.to_owned(), NaiveDate::MIN)..)
                    .take_while(|((c, _), _)| c == &campaign)
                    .map(|(_, cost)| *cost)
                    .sum();
                let installs = inner
                    .installs
                    .get(&campaign)
                    .map(|users| users.len() as u64)
                    .unwrap_or(0);
                let revenue = inner
                    .revenue
                    .get(&campaign)
                    .copied()
                    .unwrap_or(Decimal::ZERO);

                let cpi = (installs > 0).then(|| cost / Decimal::from(installs));
                let roi_percent =
                    (!cost.is_zero()).then(|| (revenue - cost) / cost * Decimal::from(100));

                CampaignRoiRow {
                    campaign,
                    cost,
                    installs,
                    revenue,
                    cpi,
                    roi_percent,
                }
            })
            .collect::<Vec<CampaignRoiRow>>();

        rows.sort_by(|a, b| a.campaign.cmp(&b.campaign));

        rows
    }

    pub fn row(&self, campaign: &str) -> Option<CampaignRoiRow> {
        self.rows().into_iter().find(|r| r.campaign == campaign)
    }
}

/// Daily cursor consumer joining imported spend with attributed installs and
/// revenue.
#[derive(Clone)]
pub struct CampaignRoiJob {
    events: EventStore,
    store: RoiStore,
    import: Box<dyn SpendImport>,
    cursor: Arc<RwLock<Option<EventCursor>>>,
    config: JobsConfig,
}

impl CampaignRoiJob {
    pub fn new<I: SpendImport + 'static>(
        events: &EventStore,
        store: &RoiStore,
        import: I,
    ) -> Self {
        Self {
            events: events.clone(),
            store: store.clone(),
            import: Box::new(import),
            cursor: Arc::new(RwLock::new(None)),
            config: JobsConfig::default(),
        }
    }

    pub fn config(mut self, config: JobsConfig) -> Self {
        self.config = config;

        self
    }

    fn fold(&self, event: &Event) -> Result<bool> {
        match event.event_type.as_str() {
            kinds::APP_INSTALLED => {
                let payload: AppInstalled = event.to_payload()?;
                self.store.record_install(&event.user_id, &payload.campaign);

                Ok(true)
            }
            kinds::PURCHASE_COMPLETED => {
                let payload: PurchaseCompleted = event.to_payload()?;

                Ok(self
                    .store
                    .record_purchase(event.id, &event.user_id, payload.amount))
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl Job for CampaignRoiJob {
    fn name(&self) -> &'static str {
        "campaign-roi"
    }

    fn cadence(&self) -> Duration {
        self.config.roi_cadence
    }

    async fn run(&self, _now: DateTime<Utc>) -> Result<JobReport> {
        // The external import comes first: if it fails, this cycle is
        // skipped, the cursor stays put and every other job keeps running.
        let spend = self.import.fetch().await.map_err(|e| JobError::Dependency {
            name: "spend-import",
            source: e,
        })?;

        self.store.import_spend(spend);

        let mut report = JobReport::default();

        loop {
            let after = *self.cursor.read();
            let batch = self
                .events
                .read_since(
                    after,
                    &[kinds::APP_INSTALLED, kinds::PURCHASE_COMPLETED],
                    self.config.batch_size,
                )
                .await?;

            if batch.is_empty() {
                break;
            }

            for event in batch.iter() {
                match self.fold(event) {
                    Ok(true) => report.applied += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!("campaign roi failed on event {}: {e}", event.id);
                        report.failed += 1;
                    }
                }

                *self.cursor.write() = Some((event.received_at, event.id));
            }
        }

        Ok(report)
    }
}
