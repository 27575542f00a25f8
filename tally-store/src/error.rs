use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("event type `{0}` is not in the allow-list")]
    UnknownEventType(String),

    #[error("user id must not be empty")]
    EmptyUserId,

    #[error("payload must be a flat json object")]
    PayloadNotFlat,

    #[error("no partition covers {0}")]
    MissingPartition(DateTime<Utc>),

    #[error("event `{0}` not found")]
    EventNotFound(Uuid),

    #[error("event type version {version} must be greater than {current}")]
    StaleTypeVersion { version: u16, current: u16 },

    #[error("unexpected empty result when appending a single event")]
    EmptyAppend,

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
