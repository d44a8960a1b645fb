//! `PostgreSQL` secondary event store.
//!
//! # Overview
//!
//! Consuming services keep their copy of events in their own database:
//!
//! ```text
//! Attendance DB (Write)     →  Event Bus  →  Consumer DB (Read)
//! ┌──────────────────┐                     ┌──────────────────┐
//! │ events           │                     │ secondary_events │
//! │ participants     │      snapshots      │                  │
//! └──────────────────┘        →→→          └──────────────────┘
//! ```
//!
//! Each row holds the full record as JSONB keyed by event id. Upserts
//! overwrite unconditionally (last-applied-wins).
//!
//! # Example
//!
//! ```ignore
//! use rsvp_projections::PostgresSecondaryEventStore;
//!
//! let store = PostgresSecondaryEventStore::connect(
//!     "postgres://localhost/analytics",
//!     "secondary_events".to_string(),
//! ).await?;
//! store.migrate().await?;
//! ```

use rsvp_core::ids::EventId;
use rsvp_core::projection::{ProjectionError, Result, SecondaryEventRecord, SecondaryEventStore};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;

/// Default table created by the bundled migration.
pub const DEFAULT_TABLE: &str = "secondary_events";

/// `PostgreSQL`-backed [`SecondaryEventStore`].
///
/// ```sql
/// CREATE TABLE secondary_events (
///     event_id BIGINT PRIMARY KEY,
///     data JSONB NOT NULL,
///     applied_at TIMESTAMPTZ NOT NULL,
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
/// );
/// ```
#[derive(Clone, Debug)]
pub struct PostgresSecondaryEventStore {
    pool: PgPool,
    table_name: String,
}

impl PostgresSecondaryEventStore {
    /// Use an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool, table_name: String) -> Self {
        Self { pool, table_name }
    }

    /// Open a dedicated pool to the consumer database.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if the connection fails.
    pub async fn connect(database_url: &str, table_name: String) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool, table_name))
    }

    /// Create the default table if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Storage`] if migration fails.
    pub async fn migrate(&self) -> Result<()> {
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }
}

impl SecondaryEventStore for PostgresSecondaryEventStore {
    async fn upsert(&self, record: &SecondaryEventRecord) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (event_id, data, applied_at, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (event_id)
             DO UPDATE SET data = EXCLUDED.data, applied_at = EXCLUDED.applied_at, updated_at = now()",
            self.table_name
        );

        sqlx::query(&query)
            .bind(record.event_id.get())
            .bind(Json(record))
            .bind(record.applied_at)
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to save: {e}")))?;

        Ok(())
    }

    async fn remove(&self, event_id: EventId) -> Result<bool> {
        let query = format!("DELETE FROM {} WHERE event_id = $1", self.table_name);

        let result = sqlx::query(&query)
            .bind(event_id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to delete: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, event_id: EventId) -> Result<Option<SecondaryEventRecord>> {
        let query = format!("SELECT data FROM {} WHERE event_id = $1", self.table_name);

        let row = sqlx::query(&query)
            .bind(event_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ProjectionError::Storage(format!("Failed to load: {e}")))?;

        row.map(|row| {
            row.try_get::<Json<SecondaryEventRecord>, _>("data")
                .map(|Json(record)| record)
                .map_err(|e| ProjectionError::Serialization(format!("Failed to decode: {e}")))
        })
        .transpose()
    }
}
