//! `PostgreSQL` [`OutboxLedger`] so replay survives process restarts.
//!
//! Timestamps are stored as epoch milliseconds (`BIGINT`). Per-key atomicity
//! comes from the primary key on `correlation_id`.

use async_trait::async_trait;
use chrono::DateTime;
use employee_core::OutboxRecord;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::traits::OutboxLedger;

/// Outbox ledger persisted in the `employee_outbox` table.
pub struct PostgresOutboxLedger {
    pool: PgPool,
}

impl PostgresOutboxLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and creates the ledger table if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema creation fails.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        let ledger = Self::new(pool);
        ledger.init_schema().await?;
        Ok(ledger)
    }

    /// Creates the ledger table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the DDL statement fails.
    pub async fn init_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS employee_outbox (
                correlation_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                reply_to TEXT,
                created_at BIGINT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxLedger for PostgresOutboxLedger {
    async fn find(&self, correlation_id: &str) -> anyhow::Result<Option<OutboxRecord>> {
        let row = sqlx::query(
            "SELECT correlation_id, payload, reply_to, created_at FROM employee_outbox WHERE correlation_id = $1",
        )
        .bind(correlation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at_ms: i64 = row.try_get("created_at")?;
        let created_at = DateTime::from_timestamp_millis(created_at_ms)
            .ok_or_else(|| anyhow::anyhow!("invalid created_at timestamp {created_at_ms}"))?;

        Ok(Some(OutboxRecord {
            correlation_id: row.try_get("correlation_id")?,
            payload: row.try_get("payload")?,
            reply_to: row.try_get("reply_to")?,
            created_at,
        }))
    }

    async fn save(&self, record: OutboxRecord) -> anyhow::Result<()> {
        let result = sqlx::query(
            "INSERT INTO employee_outbox (correlation_id, payload, reply_to, created_at) VALUES ($1, $2, $3, $4) ON CONFLICT (correlation_id) DO NOTHING",
        )
        .bind(&record.correlation_id)
        .bind(&record.payload)
        .bind(&record.reply_to)
        .bind(record.created_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(correlation_id = %record.correlation_id, "outbox record already present");
        }
        Ok(())
    }

    async fn delete(&self, correlation_id: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM employee_outbox WHERE correlation_id = $1")
            .bind(correlation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
