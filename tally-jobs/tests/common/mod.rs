use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;

use tally_jobs::kinds;
use tally_store::{EventStore, PartitionManager, WriteEvent};

/// Thursday of ISO week 32, 2026.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap()
}

/// Memory store with partitions covering six weeks back through four ahead.
pub async fn store() -> Result<EventStore> {
    let store = EventStore::in_memory();

    PartitionManager::new(&store)
        .ensure_future_partitions(now() - Duration::weeks(6), 10)
        .await?;

    Ok(store)
}

pub fn game(user: &str, mode: &str, score: i64, at: DateTime<Utc>) -> WriteEvent {
    WriteEvent::new(kinds::GAME_ENDED)
        .user(user)
        .payload(json!({ "mode": mode, "score": score, "duration_secs": 60 }))
        .unwrap()
        .received_at(at)
}

pub fn install(user: &str, campaign: &str, platform: &str, at: DateTime<Utc>) -> WriteEvent {
    WriteEvent::new(kinds::APP_INSTALLED)
        .user(user)
        .payload(json!({ "campaign": campaign, "platform": platform }))
        .unwrap()
        .received_at(at)
}

pub fn session(user: &str, at: DateTime<Utc>) -> WriteEvent {
    WriteEvent::new(kinds::SESSION_STARTED)
        .user(user)
        .received_at(at)
}

pub fn purchase(user: &str, amount: Decimal, at: DateTime<Utc>) -> WriteEvent {
    WriteEvent::new(kinds::PURCHASE_COMPLETED)
        .user(user)
        .payload(json!({ "amount": amount }))
        .unwrap()
        .received_at(at)
}

pub fn tutorial(user: &str, step: &str, at: DateTime<Utc>) -> WriteEvent {
    WriteEvent::new(kinds::TUTORIAL_STEP)
        .user(user)
        .payload(json!({ "step": step }))
        .unwrap()
        .received_at(at)
}

pub fn crash(user: &str, at: DateTime<Utc>) -> WriteEvent {
    WriteEvent::new(kinds::CRASH_REPORTED).user(user).received_at(at)
}
