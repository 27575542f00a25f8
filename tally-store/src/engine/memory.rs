use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    engine::{Engine, EventCursor},
    error::{Result, StoreError},
    event::Event,
    partition::WeekKey,
    store::EventStore,
};

impl EventStore {
    /// Store backed by the in-memory engine, for tests and single-process
    /// runs.
    pub fn in_memory() -> Self {
        EventStore::new(Memory::default())
    }
}

/// Weekly partitions modelled as metadata buckets over immutable rows.
#[derive(Debug, Clone, Default)]
pub struct Memory(Arc<RwLock<BTreeMap<WeekKey, Vec<Event>>>>);

impl Memory {
    fn collect(&self, event_types: &[&str]) -> Vec<Event> {
        let mut events = self
            .0
            .read()
            .values()
            .flatten()
            .filter(|e| event_types.is_empty() || event_types.contains(&e.event_type.as_str()))
            .cloned()
            .collect::<Vec<Event>>();

        events.sort_by(|a, b| (a.received_at, a.id).cmp(&(b.received_at, b.id)));

        events
    }
}

#[async_trait]
impl Engine for Memory {
    async fn append(&self, events: Vec<Event>) -> Result<Vec<Event>> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let mut partitions = self.0.write();

        for event in events.iter() {
            if !partitions.contains_key(&WeekKey::of(event.received_at)) {
                return Err(StoreError::MissingPartition(event.received_at));
            }
        }

        for event in events.iter() {
            let bucket = partitions
                .get_mut(&WeekKey::of(event.received_at))
                .ok_or(StoreError::MissingPartition(event.received_at))?;

            bucket.push(event.clone());
        }

        Ok(events)
    }

    async fn fetch_unprocessed(&self, event_types: &[&str], limit: u16) -> Result<Vec<Event>> {
        let mut events = self.collect(event_types);

        events.retain(|e| e.processed_at.is_none());
        events.truncate(usize::from(limit));

        Ok(events)
    }

    async fn mark_processed(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        let ids = ids.iter().collect::<HashSet<_>>();
        let mut partitions = self.0.write();

        for event in partitions.values_mut().flatten() {
            if ids.contains(&event.id) && event.processed_at.is_none() {
                event.processed_at = Some(at);
            }
        }

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let mut partitions = self.0.write();

        for event in partitions.values_mut().flatten() {
            if event.id == id {
                event.processing_attempts += 1;
                event.processing_error = Some(error.to_owned());

                return Ok(());
            }
        }

        Err(StoreError::EventNotFound(id))
    }

    async fn fetch_failed(&self, min_attempts: i32, limit: u16) -> Result<Vec<Event>> {
        let mut events = self.collect(&[]);

        events.retain(|e| e.processed_at.is_none() && e.processing_attempts >= min_attempts);
        events.truncate(usize::from(limit));

        Ok(events)
    }

    async fn read_since(
        &self,
        after: Option<EventCursor>,
        event_types: &[&str],
        limit: u16,
    ) -> Result<Vec<Event>> {
        let mut events = self.collect(event_types);

        if let Some((at, id)) = after {
            events.retain(|e| (e.received_at, e.id) > (at, id));
        }

        events.truncate(usize::from(limit));

        Ok(events)
    }

    async fn read_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        event_types: &[&str],
    ) -> Result<Vec<Event>> {
        let mut events = self.collect(event_types);

        events.retain(|e| from <= e.received_at && e.received_at < to);

        Ok(events)
    }

    async fn create_partition(&self, week: WeekKey) -> Result<bool> {
        let mut partitions = self.0.write();

        if partitions.contains_key(&week) {
            return Ok(false);
        }

        partitions.insert(week, Vec::new());

        Ok(true)
    }

    async fn drop_partition(&self, week: WeekKey) -> Result<bool> {
        Ok(self.0.write().remove(&week).is_some())
    }

    async fn partitions(&self) -> Result<Vec<WeekKey>> {
        Ok(self.0.read().keys().copied().collect())
    }
}
