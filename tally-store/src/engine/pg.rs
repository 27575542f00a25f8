use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    engine::{Engine, EventCursor},
    error::{Result, StoreError},
    event::Event,
    partition::WeekKey,
    store::EventStore,
};

/// Postgres engine over one declaratively range-partitioned table, one
/// partition per ISO week. A partial index on `(event_type, received_at)`
/// restricted to unprocessed rows keeps `fetch_unprocessed` cheap regardless
/// of table size.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    prefix: Option<String>,
}

impl PgStore {
    pub fn new(pool: &PgPool) -> EventStore {
        EventStore::new(Self {
            pool: pool.clone(),
            prefix: None,
        })
    }

    pub fn with_prefix(pool: &PgPool, prefix: impl Into<String>) -> EventStore {
        EventStore::new(Self {
            pool: pool.clone(),
            prefix: Some(prefix.into()),
        })
    }

    /// Creates the parent table and its indexes. Idempotent; run at startup
    /// before any partition maintenance.
    pub async fn setup(pool: &PgPool) -> Result<()> {
        let engine = Self {
            pool: pool.clone(),
            prefix: None,
        };
        let table = engine.table_events();

        sqlx::query(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id UUID NOT NULL,
                    event_type VARCHAR(50) NOT NULL,
                    user_id VARCHAR(100) NOT NULL,
                    payload JSONB NOT NULL,
                    received_at TIMESTAMPTZ NOT NULL,
                    processed_at TIMESTAMPTZ,
                    processing_attempts INT NOT NULL DEFAULT 0,
                    processing_error TEXT,
                    PRIMARY KEY (id, received_at)
                ) PARTITION BY RANGE (received_at)
                "#
            )
            .as_str(),
        )
        .execute(pool)
        .await?;

        sqlx::query(
            format!(
                r#"
                CREATE INDEX IF NOT EXISTS {table}_unprocessed_idx
                ON {table} (event_type, received_at)
                WHERE processed_at IS NULL
                "#
            )
            .as_str(),
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    fn table(&self, name: impl Into<String>) -> String {
        format!(
            "{}_{}",
            self.prefix.as_ref().unwrap_or(&"tally".to_owned()),
            name.into()
        )
    }

    fn table_events(&self) -> String {
        self.table("event")
    }

    fn partition_name(&self, week: WeekKey) -> String {
        format!("{}_{}", self.table_events(), week.label())
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
            .bind(name)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }
}

#[async_trait]
impl Engine for PgStore {
    async fn append(&self, events: Vec<Event>) -> Result<Vec<Event>> {
        if events.is_empty() {
            return Ok(events);
        }

        let table_events = self.table_events();
        let first_received_at = events[0].received_at;
        let mut tx = self.pool.begin().await?;

        for chunk in events.chunks(100) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table_events} (id, event_type, user_id, payload, received_at, processing_attempts) "
            ));

            query_builder.push_values(chunk, |mut b, event| {
                b.push_bind(event.id)
                    .push_bind(event.event_type.to_owned())
                    .push_bind(event.user_id.to_owned())
                    .push_bind(event.payload.clone())
                    .push_bind(event.received_at)
                    .push_bind(event.processing_attempts);
            });

            if let Err(e) = query_builder.build().execute(&mut *tx).await {
                // 23514: no partition of relation found for row. Ingestion
                // for a week without a partition must fail loudly.
                let missing = e
                    .as_database_error()
                    .and_then(|d| d.code())
                    .map(|code| code == "23514")
                    .unwrap_or(false);

                tx.rollback().await?;

                return Err(if missing {
                    StoreError::MissingPartition(first_received_at)
                } else {
                    e.into()
                });
            }
        }

        tx.commit().await?;

        Ok(events)
    }

    async fn fetch_unprocessed(&self, event_types: &[&str], limit: u16) -> Result<Vec<Event>> {
        let table_events = self.table_events();
        let types = event_types
            .iter()
            .map(|t| (*t).to_owned())
            .collect::<Vec<String>>();

        let events = if types.is_empty() {
            sqlx::query_as::<_, Event>(
                format!(
                    r#"
                    SELECT * FROM {table_events}
                    WHERE processed_at IS NULL
                    ORDER BY received_at ASC, id ASC
                    LIMIT $1
                    "#
                )
                .as_str(),
            )
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, Event>(
                format!(
                    r#"
                    SELECT * FROM {table_events}
                    WHERE processed_at IS NULL AND event_type = ANY($1)
                    ORDER BY received_at ASC, id ASC
                    LIMIT $2
                    "#
                )
                .as_str(),
            )
            .bind(types)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
        };

        Ok(events)
    }

    async fn mark_processed(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<()> {
        let table_events = self.table_events();

        sqlx::query(
            format!(
                r#"
                UPDATE {table_events}
                SET processed_at = $2
                WHERE id = ANY($1) AND processed_at IS NULL
                "#
            )
            .as_str(),
        )
        .bind(ids.to_vec())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let table_events = self.table_events();

        let updated = sqlx::query(
            format!(
                r#"
                UPDATE {table_events}
                SET processing_attempts = processing_attempts + 1, processing_error = $2
                WHERE id = $1
                "#
            )
            .as_str(),
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::EventNotFound(id));
        }

        Ok(())
    }

    async fn fetch_failed(&self, min_attempts: i32, limit: u16) -> Result<Vec<Event>> {
        let table_events = self.table_events();

        let events = sqlx::query_as::<_, Event>(
            format!(
                r#"
                SELECT * FROM {table_events}
                WHERE processed_at IS NULL AND processing_attempts >= $1
                ORDER BY received_at ASC, id ASC
                LIMIT $2
                "#
            )
            .as_str(),
        )
        .bind(min_attempts)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    async fn read_since(
        &self,
        after: Option<EventCursor>,
        event_types: &[&str],
        limit: u16,
    ) -> Result<Vec<Event>> {
        let table_events = self.table_events();
        let types = event_types
            .iter()
            .map(|t| (*t).to_owned())
            .collect::<Vec<String>>();

        let events = match (after, types.is_empty()) {
            (Some((at, id)), false) => {
                sqlx::query_as::<_, Event>(
                    format!(
                        r#"
                        SELECT * FROM {table_events}
                        WHERE (received_at, id) > ($1, $2) AND event_type = ANY($3)
                        ORDER BY received_at ASC, id ASC
                        LIMIT $4
                        "#
                    )
                    .as_str(),
                )
                .bind(at)
                .bind(id)
                .bind(types)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            (Some((at, id)), true) => {
                sqlx::query_as::<_, Event>(
                    format!(
                        r#"
                        SELECT * FROM {table_events}
                        WHERE (received_at, id) > ($1, $2)
                        ORDER BY received_at ASC, id ASC
                        LIMIT $3
                        "#
                    )
                    .as_str(),
                )
                .bind(at)
                .bind(id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            (None, false) => {
                sqlx::query_as::<_, Event>(
                    format!(
                        r#"
                        SELECT * FROM {table_events}
                        WHERE event_type = ANY($1)
                        ORDER BY received_at ASC, id ASC
                        LIMIT $2
                        "#
                    )
                    .as_str(),
                )
                .bind(types)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            (None, true) => {
                sqlx::query_as::<_, Event>(
                    format!(
                        r#"
                        SELECT * FROM {table_events}
                        ORDER BY received_at ASC, id ASC
                        LIMIT $1
                        "#
                    )
                    .as_str(),
                )
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(events)
    }

    async fn read_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        event_types: &[&str],
    ) -> Result<Vec<Event>> {
        let table_events = self.table_events();
        let types = event_types
            .iter()
            .map(|t| (*t).to_owned())
            .collect::<Vec<String>>();

        let events = if types.is_empty() {
            sqlx::query_as::<_, Event>(
                format!(
                    r#"
                    SELECT * FROM {table_events}
                    WHERE received_at >= $1 AND received_at < $2
                    ORDER BY received_at ASC, id ASC
                    "#
                )
                .as_str(),
            )
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, Event>(
                format!(
                    r#"
                    SELECT * FROM {table_events}
                    WHERE received_at >= $1 AND received_at < $2 AND event_type = ANY($3)
                    ORDER BY received_at ASC, id ASC
                    "#
                )
                .as_str(),
            )
            .bind(from)
            .bind(to)
            .bind(types)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(events)
    }

    async fn create_partition(&self, week: WeekKey) -> Result<bool> {
        let name = self.partition_name(week);

        if self.table_exists(&name).await? {
            return Ok(false);
        }

        let table_events = self.table_events();
        let from = week.start().to_rfc3339_opts(SecondsFormat::Secs, true);
        let to = week.end().to_rfc3339_opts(SecondsFormat::Secs, true);

        sqlx::query(
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {name}
                PARTITION OF {table_events}
                FOR VALUES FROM ('{from}') TO ('{to}')
                "#
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(true)
    }

    async fn drop_partition(&self, week: WeekKey) -> Result<bool> {
        let name = self.partition_name(week);

        if !self.table_exists(&name).await? {
            return Ok(false);
        }

        sqlx::query(format!("DROP TABLE IF EXISTS {name}").as_str())
            .execute(&self.pool)
            .await?;

        Ok(true)
    }

    async fn partitions(&self) -> Result<Vec<WeekKey>> {
        let table_events = self.table_events();

        let names: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT c.relname
            FROM pg_inherits i
            JOIN pg_class c ON c.oid = i.inhrelid
            JOIN pg_class p ON p.oid = i.inhparent
            WHERE p.relname = $1
            "#,
        )
        .bind(&table_events)
        .fetch_all(&self.pool)
        .await?;

        let prefix = format!("{table_events}_");
        let mut weeks = names
            .iter()
            .filter_map(|(name,)| WeekKey::from_label(name.strip_prefix(&prefix)?))
            .collect::<Vec<WeekKey>>();

        weeks.sort();

        Ok(weeks)
    }
}
