use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parse_display::Display;
use serde::Serialize;
use tally_store::{
    EventStore, PartitionManager, StoreError, UnknownTypePolicy, WeekKey, WriteEvent, HOLDING_TYPE,
};

#[derive(Display)]
#[display(style = "snake_case")]
pub enum Kind {
    GameEnded,
    SessionStarted,
}

#[derive(Serialize)]
pub struct GameEnded {
    pub mode: String,
    pub score: i64,
    pub duration_secs: u64,
}

// Thursday of ISO week 32, 2026.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap()
}

pub async fn fixture() -> Result<EventStore> {
    let store = EventStore::in_memory();

    PartitionManager::new(&store)
        .ensure_future_partitions(now(), 2)
        .await?;

    Ok(store)
}

pub fn game_ended(user: &str, score: i64, at: DateTime<Utc>) -> WriteEvent {
    WriteEvent::new(Kind::GameEnded.to_string())
        .user(user)
        .payload(GameEnded {
            mode: "endless".to_owned(),
            score,
            duration_secs: 60,
        })
        .unwrap()
        .received_at(at)
}

pub async fn test_append_validates(store: &EventStore) -> Result<()> {
    let unknown = store
        .append(WriteEvent::new("made_up").user("u1").received_at(now()))
        .await;
    assert!(matches!(unknown, Err(StoreError::UnknownEventType(_))));

    let empty_user = store
        .append(WriteEvent::new(Kind::GameEnded.to_string()).received_at(now()))
        .await;
    assert!(matches!(empty_user, Err(StoreError::EmptyUserId)));

    let nested = WriteEvent::new(Kind::GameEnded.to_string())
        .user("u1")
        .payload(serde_json::json!({ "inner": { "score": 1 } }));
    assert!(matches!(nested, Err(StoreError::PayloadNotFlat)));

    let event = store.append(game_ended("u1", 42, now())).await?;
    assert_eq!(event.event_type, "game_ended");
    assert_eq!(event.processing_attempts, 0);
    assert!(event.processed_at.is_none());

    Ok(())
}

pub async fn test_missing_partition_fails_loudly(store: &EventStore) -> Result<()> {
    let far_future = now() + Duration::weeks(52);
    let res = store.append(game_ended("u1", 10, far_future)).await;

    assert!(matches!(res, Err(StoreError::MissingPartition(_))));

    Ok(())
}

pub async fn test_holding_policy(store: &EventStore) -> Result<()> {
    let store = store.clone().policy(UnknownTypePolicy::Hold);

    let held = store
        .append(
            WriteEvent::new("brand_new_thing")
                .user("u1")
                .payload(serde_json::json!({ "k": 1 }))?
                .received_at(now()),
        )
        .await?;

    assert_eq!(held.event_type, HOLDING_TYPE);
    assert_eq!(held.payload["submitted_type"], "brand_new_thing");
    assert_eq!(held.payload["k"], 1);

    Ok(())
}

pub async fn test_fetch_and_mark(store: &EventStore) -> Result<()> {
    let later = store.append(game_ended("u2", 80, now() + Duration::minutes(5))).await?;
    let earlier = store.append(game_ended("u1", 50, now())).await?;
    store
        .append(
            WriteEvent::new(Kind::SessionStarted.to_string())
                .user("u1")
                .received_at(now()),
        )
        .await?;

    // Type filter plus received_at ordering regardless of insert order.
    let batch = store.fetch_unprocessed(&["game_ended"], 10).await?;
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].id, earlier.id);
    assert_eq!(batch[1].id, later.id);

    let limited = store.fetch_unprocessed(&["game_ended"], 1).await?;
    assert_eq!(limited.len(), 1);

    store.mark_processed(&[earlier.id, later.id]).await?;

    let rest = store.fetch_unprocessed(&["game_ended"], 10).await?;
    assert!(rest.is_empty());

    let sessions = store.fetch_unprocessed(&["session_started"], 10).await?;
    assert_eq!(sessions.len(), 1);

    Ok(())
}

pub async fn test_mark_failed_keeps_event(store: &EventStore) -> Result<()> {
    let event = store.append(game_ended("u1", 50, now())).await?;
    let max = store.store_config().max_processing_attempts;

    for _ in 0..max {
        store.mark_failed(event.id, "boom").await?;
    }

    // Still fetchable, never dropped.
    let batch = store.fetch_unprocessed(&["game_ended"], 10).await?;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].processing_attempts, max);
    assert_eq!(batch[0].processing_error.as_deref(), Some("boom"));

    let failed = store.fetch_failed(10).await?;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, event.id);

    Ok(())
}

pub async fn test_cursor_read(store: &EventStore) -> Result<()> {
    for i in 0..5 {
        store
            .append(game_ended("u1", i, now() + Duration::seconds(i)))
            .await?;
    }

    let first = store.read_since(None, &["game_ended"], 3).await?;
    assert_eq!(first.len(), 3);

    let cursor = first.last().map(|e| (e.received_at, e.id));
    let rest = store.read_since(cursor, &["game_ended"], 10).await?;
    assert_eq!(rest.len(), 2);

    let cursor = rest.last().map(|e| (e.received_at, e.id));
    let done = store.read_since(cursor, &["game_ended"], 10).await?;
    assert!(done.is_empty());

    Ok(())
}

pub async fn test_partition_boundary(store: &EventStore) -> Result<()> {
    let monday = Utc.with_ymd_and_hms(2026, 8, 10, 0, 0, 0).unwrap();
    let sunday = monday - Duration::milliseconds(1);

    let before = store.append(game_ended("u1", 10, sunday)).await?;
    let after = store.append(game_ended("u1", 20, monday)).await?;

    let week_a = WeekKey::of(sunday);
    let week_b = WeekKey::of(monday);
    assert_ne!(week_a, week_b);

    // Each event is counted in exactly one week's range.
    let in_a = store
        .read_range(week_a.start(), week_a.end(), &["game_ended"])
        .await?;
    let in_b = store
        .read_range(week_b.start(), week_b.end(), &["game_ended"])
        .await?;

    assert_eq!(in_a.iter().filter(|e| e.id == before.id).count(), 1);
    assert_eq!(in_a.iter().filter(|e| e.id == after.id).count(), 0);
    assert_eq!(in_b.iter().filter(|e| e.id == after.id).count(), 1);
    assert_eq!(in_b.iter().filter(|e| e.id == before.id).count(), 0);

    Ok(())
}

pub async fn test_partition_maintenance(store: &EventStore) -> Result<()> {
    let partitions = PartitionManager::new(store);

    // fixture already created this week + 2; re-running creates nothing.
    let created = partitions.ensure_future_partitions(now(), 2).await?;
    assert!(created.is_empty());

    let created = partitions.ensure_future_partitions(now(), 4).await?;
    assert_eq!(created.len(), 2);

    // Nothing is young enough to retire yet.
    let dropped = partitions.retire_old_partitions(now(), 4).await?;
    assert!(dropped.is_empty());

    // A year later everything current has aged out.
    let much_later = now() + Duration::weeks(52);
    let dropped = partitions.retire_old_partitions(much_later, 4).await?;
    assert_eq!(dropped.len(), 5);

    Ok(())
}
