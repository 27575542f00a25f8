use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::StoreConfig,
    engine::{Engine, EventCursor},
    error::{Result, StoreError},
    event::{is_flat_document, Event, WriteEvent},
    registry::{EventTypes, UnknownTypePolicy, HOLDING_TYPE},
};

/// Facade over the storage engine: validating ingestion plus the processing
/// surface the aggregators consume.
#[derive(Clone)]
pub struct EventStore {
    engine: Box<dyn Engine>,
    types: Arc<EventTypes>,
    policy: UnknownTypePolicy,
    config: StoreConfig,
}

impl EventStore {
    pub fn new<E: Engine + 'static>(engine: E) -> Self {
        Self {
            engine: Box::new(engine),
            types: Arc::new(EventTypes::builtin()),
            policy: UnknownTypePolicy::default(),
            config: StoreConfig::default(),
        }
    }

    pub fn types(mut self, types: EventTypes) -> Self {
        self.types = Arc::new(types);

        self
    }

    pub fn policy(mut self, policy: UnknownTypePolicy) -> Self {
        self.policy = policy;

        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;

        self
    }

    /// Validates and appends a single event. The caller retries on its own
    /// schedule; the store does not dedup retransmissions, so everything
    /// downstream tolerates duplicates.
    pub async fn append(&self, event: WriteEvent) -> Result<Event> {
        let events = self.append_all(vec![event]).await?;

        events.into_iter().next().ok_or(StoreError::EmptyAppend)
    }

    pub async fn append_all(&self, events: Vec<WriteEvent>) -> Result<Vec<Event>> {
        let mut validated = Vec::with_capacity(events.len());

        for write in events {
            validated.push(self.validate(write)?);
        }

        self.engine.append(validated).await
    }

    fn validate(&self, write: WriteEvent) -> Result<Event> {
        if write.user_id.trim().is_empty() {
            return Err(StoreError::EmptyUserId);
        }

        if !is_flat_document(&write.payload) {
            return Err(StoreError::PayloadNotFlat);
        }

        let mut event = write.to_event();

        if !self.types.allows(&event.event_type) {
            match self.policy {
                UnknownTypePolicy::Reject => {
                    return Err(StoreError::UnknownEventType(event.event_type))
                }
                UnknownTypePolicy::Hold => {
                    if let Value::Object(payload) = &mut event.payload {
                        payload.insert(
                            "submitted_type".to_owned(),
                            Value::String(event.event_type.to_owned()),
                        );
                    }

                    event.event_type = HOLDING_TYPE.to_owned();
                }
            }
        }

        Ok(event)
    }

    /// Unprocessed events of the given types, oldest first.
    pub async fn fetch_unprocessed(&self, event_types: &[&str], limit: u16) -> Result<Vec<Event>> {
        self.engine.fetch_unprocessed(event_types, limit).await
    }

    /// The sole commit boundary for flag-owning aggregators.
    pub async fn mark_processed(&self, ids: &[Uuid]) -> Result<()> {
        self.engine.mark_processed(ids, Utc::now()).await
    }

    /// Records a processing failure. The event keeps its place and its data;
    /// it is retried next cycle until it exhausts its attempts.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        self.engine.mark_failed(id, error).await
    }

    /// Events that exhausted their processing attempts, surfaced for
    /// inspection. They are never deleted or moved.
    pub async fn fetch_failed(&self, limit: u16) -> Result<Vec<Event>> {
        self.engine
            .fetch_failed(self.config.max_processing_attempts, limit)
            .await
    }

    /// Cursor read for consumers that track their own progress.
    pub async fn read_since(
        &self,
        after: Option<EventCursor>,
        event_types: &[&str],
        limit: u16,
    ) -> Result<Vec<Event>> {
        self.engine.read_since(after, event_types, limit).await
    }

    /// Every event with `from <= received_at < to`, for replays and snapshot
    /// rebuilds.
    pub async fn read_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        event_types: &[&str],
    ) -> Result<Vec<Event>> {
        self.engine.read_range(from, to, event_types).await
    }

    pub fn store_config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }
}
