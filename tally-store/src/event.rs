use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// Builder for an event about to be appended.
#[derive(Debug, Clone)]
pub struct WriteEvent {
    pub event_type: String,
    pub user_id: String,
    pub payload: Value,
    pub received_at: Option<DateTime<Utc>>,
}

impl WriteEvent {
    pub fn new<N: Into<String>>(event_type: N) -> Self {
        Self {
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    pub fn user<U: Into<String>>(mut self, user_id: U) -> Self {
        self.user_id = user_id.into();

        self
    }

    pub fn payload<D: Serialize>(mut self, value: D) -> Result<Self> {
        let payload = serde_json::to_value(&value)?;

        if !is_flat_document(&payload) {
            return Err(StoreError::PayloadNotFlat);
        }

        self.payload = payload;

        Ok(self)
    }

    /// Overrides the ingestion timestamp. Defaults to now at append time.
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);

        self
    }

    pub fn to_event(&self) -> Event {
        Event {
            event_type: self.event_type.to_owned(),
            user_id: self.user_id.to_owned(),
            payload: self.payload.clone(),
            received_at: self.received_at.unwrap_or_else(Utc::now),
            ..Default::default()
        }
    }
}

impl Default for WriteEvent {
    fn default() -> Self {
        Self {
            event_type: String::default(),
            user_id: String::default(),
            payload: Value::Object(serde_json::Map::default()),
            received_at: None,
        }
    }
}

/// A single immutable fact. `event_type`, `user_id`, `payload` and
/// `received_at` never change after append; only the processing-metadata
/// fields mutate, and events never move between partitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[cfg_attr(feature = "pg", derive(sqlx::FromRow))]
pub struct Event {
    pub id: Uuid,
    pub event_type: String,
    pub user_id: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_attempts: i32,
    pub processing_error: Option<String>,
}

impl Event {
    pub fn to_payload<D: DeserializeOwned>(&self) -> Result<D> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// UTC calendar day the event was received on.
    pub fn day(&self) -> NaiveDate {
        self.received_at.date_naive()
    }
}

impl Default for Event {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: String::default(),
            user_id: String::default(),
            payload: Value::Object(serde_json::Map::default()),
            received_at: Utc::now(),
            processed_at: None,
            processing_attempts: 0,
            processing_error: None,
        }
    }
}

/// A payload is flat when it is a json object whose values are all scalars.
pub fn is_flat_document(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.values().all(|v| !v.is_object() && !v.is_array()),
        _ => false,
    }
}
