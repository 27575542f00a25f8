use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dyn_clone::DynClone;
use uuid::Uuid;

use crate::{error::Result, event::Event, partition::WeekKey};

#[cfg(feature = "memory")]
mod memory;
#[cfg(feature = "pg")]
mod pg;

#[cfg(feature = "memory")]
pub use memory::*;
#[cfg(feature = "pg")]
pub use pg::*;

/// Position of a cursor-tracked consumer: the last `(received_at, id)` it has
/// folded. Events sort by that pair, so resuming after it is unambiguous even
/// when several events share a timestamp.
pub type EventCursor = (DateTime<Utc>, Uuid);

/// An empty `event_types` slice means "all types" on every read operation.
#[async_trait]
pub trait Engine: DynClone + Send + Sync {
    async fn append(&self, events: Vec<Event>) -> Result<Vec<Event>>;

    async fn fetch_unprocessed(&self, event_types: &[&str], limit: u16) -> Result<Vec<Event>>;

    async fn mark_processed(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<()>;

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()>;

    async fn fetch_failed(&self, min_attempts: i32, limit: u16) -> Result<Vec<Event>>;

    async fn read_since(
        &self,
        after: Option<EventCursor>,
        event_types: &[&str],
        limit: u16,
    ) -> Result<Vec<Event>>;

    async fn read_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        event_types: &[&str],
    ) -> Result<Vec<Event>>;

    async fn create_partition(&self, week: WeekKey) -> Result<bool>;

    async fn drop_partition(&self, week: WeekKey) -> Result<bool>;

    async fn partitions(&self) -> Result<Vec<WeekKey>>;
}

dyn_clone::clone_trait_object!(Engine);
