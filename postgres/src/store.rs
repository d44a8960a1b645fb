//! `PostgreSQL` attendance store.
//!
//! # Atomic unit
//!
//! A transition is one transaction:
//!
//! ```text
//! BEGIN
//!   SELECT ... FROM events WHERE event_id = $1 FOR UPDATE   -- per-event row lock
//!   SELECT ... FROM participants WHERE event_id = $1 AND user_id = $2
//!   -- run the decision
//!   INSERT ... ON CONFLICT (user_id, event_id) DO UPDATE    -- or DELETE
//!   UPDATE events SET count = $2 WHERE event_id = $1
//! COMMIT
//! ```
//!
//! The row lock serializes transitions for one event and leaves other events
//! untouched. A rejected decision drops the transaction, which rolls back.

use crate::error::{StoreError, db};
use futures::future::BoxFuture;
use rsvp_core::error::AttendanceError;
use rsvp_core::event::{EventRecord, NewEvent};
use rsvp_core::ids::{EventId, GroupId, ImageId, LocationId, ParticipantId, UserId};
use rsvp_core::participation::{ParticipantWrite, ParticipationRecord, ParticipationStatus};
use rsvp_core::store::{
    CapacityInvariantStore, CommitResult, DecisionFn, EventRepository, ParticipationQuery,
};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::time::Instant;

const EVENT_COLUMNS: &str = "event_id, group_id, title, description, location_id, start_time, \
                             end_time, status, count, capacity, image_id";

const PARTICIPANT_COLUMNS: &str = "participant_id, user_id, event_id, status";

/// `PostgreSQL` implementation of the attendance and catalog stores.
///
/// # Example
///
/// ```ignore
/// use rsvp_postgres::PostgresAttendanceStore;
///
/// let store = PostgresAttendanceStore::connect("postgres://localhost/rsvp", 10).await?;
/// store.migrate().await?;
/// ```
#[derive(Clone, Debug)]
pub struct PostgresAttendanceStore {
    pool: PgPool,
}

impl PostgresAttendanceStore {
    /// Use an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool with at most `max_connections` connections.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Create the tables if missing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        // The consumer tables migrate into the same history table.
        let mut migrator = sqlx::migrate!("./migrations");
        migrator.set_ignore_missing(true);
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.into()))
    }

    /// Connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_event(
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
    ) -> Result<EventRecord, AttendanceError> {
        let row = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1 FOR UPDATE"
        ))
        .bind(event_id.get())
        .fetch_optional(&mut **tx)
        .await
        .map_err(db)?;

        match row {
            Some(row) => Ok(row_to_event(&row)?),
            None => Err(AttendanceError::not_found(format!("event {event_id}"))),
        }
    }

    async fn write_participant(
        tx: &mut Transaction<'_, Postgres>,
        event_id: EventId,
        user_id: &UserId,
        write: ParticipantWrite,
    ) -> Result<Option<ParticipationRecord>, AttendanceError> {
        match write {
            ParticipantWrite::Upsert(status) => {
                let row = sqlx::query(&format!(
                    "INSERT INTO participants (user_id, event_id, status)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (user_id, event_id) DO UPDATE SET status = EXCLUDED.status
                     RETURNING {PARTICIPANT_COLUMNS}"
                ))
                .bind(user_id.as_str())
                .bind(event_id.get())
                .bind(status.as_str())
                .fetch_one(&mut **tx)
                .await
                .map_err(db)?;
                Ok(Some(row_to_participant(&row)?))
            }
            ParticipantWrite::Remove => {
                sqlx::query("DELETE FROM participants WHERE event_id = $1 AND user_id = $2")
                    .bind(event_id.get())
                    .bind(user_id.as_str())
                    .execute(&mut **tx)
                    .await
                    .map_err(db)?;
                Ok(None)
            }
        }
    }
}

impl CapacityInvariantStore for PostgresAttendanceStore {
    fn apply_transition<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
        decide: DecisionFn,
    ) -> BoxFuture<'a, Result<CommitResult, AttendanceError>> {
        Box::pin(async move {
            let start = Instant::now();
            let mut tx = self.pool.begin().await.map_err(db)?;

            let mut event = Self::lock_event(&mut tx, event_id).await?;
            let current = sqlx::query(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = $1 AND user_id = $2"
            ))
            .bind(event_id.get())
            .bind(user_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db)?
            .as_ref()
            .map(row_to_participant)
            .transpose()?;

            let decision = decide(&event, current.as_ref())?;

            if decision.is_noop() {
                tx.commit().await.map_err(db)?;
                return Ok(CommitResult {
                    decision,
                    event,
                    participant: current,
                });
            }

            let participant =
                Self::write_participant(&mut tx, event_id, user_id, decision.write).await?;

            sqlx::query("UPDATE events SET count = $2 WHERE event_id = $1")
                .bind(event_id.get())
                .bind(count_to_db(decision.new_count)?)
                .execute(&mut *tx)
                .await
                .map_err(db)?;

            tx.commit().await.map_err(db)?;
            event.count = decision.new_count;

            metrics::histogram!("rsvp_store_transaction_duration_seconds")
                .record(start.elapsed().as_secs_f64());
            tracing::debug!(
                event_id = %event_id,
                user_id = %user_id,
                count = event.count,
                "Participation committed"
            );

            Ok(CommitResult {
                decision,
                event,
                participant,
            })
        })
    }
}

impl ParticipationQuery for PostgresAttendanceStore {
    fn participant<'a>(
        &'a self,
        event_id: EventId,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Option<ParticipationRecord>, AttendanceError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = $1 AND user_id = $2"
            ))
            .bind(event_id.get())
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

            Ok(row.as_ref().map(row_to_participant).transpose()?)
        })
    }

    fn participants(
        &self,
        event_id: EventId,
    ) -> BoxFuture<'_, Result<Vec<ParticipationRecord>, AttendanceError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = $1 \
                 ORDER BY participant_id"
            ))
            .bind(event_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

            rows.iter()
                .map(|row| row_to_participant(row).map_err(AttendanceError::from))
                .collect()
        })
    }

    fn participations_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, Result<Vec<(EventRecord, ParticipationStatus)>, AttendanceError>> {
        Box::pin(async move {
            let rows = sqlx::query(
                r"
                SELECT e.event_id, e.group_id, e.title, e.description, e.location_id,
                       e.start_time, e.end_time, e.status, e.count, e.capacity, e.image_id,
                       p.status AS participation_status
                FROM participants p
                JOIN events e ON e.event_id = p.event_id
                WHERE p.user_id = $1
                ORDER BY e.event_id
                ",
            )
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;

            rows.iter()
                .map(|row| {
                    let event = row_to_event(row)?;
                    let raw: &str = row.try_get("participation_status").map_err(db)?;
                    let status = parse_participation_status(raw)?;
                    Ok((event, status))
                })
                .collect()
        })
    }
}

impl EventRepository for PostgresAttendanceStore {
    fn insert(&self, event: NewEvent) -> BoxFuture<'_, Result<EventRecord, AttendanceError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "INSERT INTO events (group_id, title, description, location_id, start_time, \
                 end_time, status, count, capacity, image_id)
                 VALUES ($1, $2, $3, $4, $5, $6, 'SCHEDULED', 0, $7, $8)
                 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(event.group_id.get())
            .bind(&event.title)
            .bind(&event.description)
            .bind(event.location_id.get())
            .bind(event.start_time)
            .bind(event.end_time)
            .bind(count_to_db(event.capacity)?)
            .bind(event.image_id.map(ImageId::get))
            .fetch_one(&self.pool)
            .await
            .map_err(db)?;

            Ok(row_to_event(&row)?)
        })
    }

    fn get(&self, event_id: EventId) -> BoxFuture<'_, Result<Option<EventRecord>, AttendanceError>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE event_id = $1"))
                .bind(event_id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;

            Ok(row.as_ref().map(row_to_event).transpose()?)
        })
    }

    fn update(
        &self,
        event_id: EventId,
        change: Box<dyn FnOnce(&EventRecord) -> Result<EventRecord, AttendanceError> + Send>,
    ) -> BoxFuture<'_, Result<EventRecord, AttendanceError>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db)?;
            let current = Self::lock_event(&mut tx, event_id).await?;

            let mut updated = change(&current)?;
            updated.event_id = current.event_id;
            updated.count = current.count;
            updated.capacity = current.capacity;

            sqlx::query(
                r"
                UPDATE events
                SET group_id = $2, title = $3, description = $4, location_id = $5,
                    start_time = $6, end_time = $7, status = $8, image_id = $9
                WHERE event_id = $1
                ",
            )
            .bind(event_id.get())
            .bind(updated.group_id.get())
            .bind(&updated.title)
            .bind(&updated.description)
            .bind(updated.location_id.get())
            .bind(updated.start_time)
            .bind(updated.end_time)
            .bind(updated.status.as_str())
            .bind(updated.image_id.map(ImageId::get))
            .execute(&mut *tx)
            .await
            .map_err(db)?;

            tx.commit().await.map_err(db)?;
            Ok(updated)
        })
    }

    fn delete(&self, event_id: EventId) -> BoxFuture<'_, Result<EventRecord, AttendanceError>> {
        Box::pin(async move {
            // Participants go with the event (ON DELETE CASCADE).
            let row = sqlx::query(&format!(
                "DELETE FROM events WHERE event_id = $1 RETURNING {EVENT_COLUMNS}"
            ))
            .bind(event_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?;

            match row {
                Some(row) => Ok(row_to_event(&row)?),
                None => Err(AttendanceError::not_found(format!("event {event_id}"))),
            }
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<EventRecord>, AttendanceError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY event_id"))
                .fetch_all(&self.pool)
                .await
                .map_err(db)?;
            rows_to_events(&rows)
        })
    }

    fn by_group(&self, group_id: GroupId) -> BoxFuture<'_, Result<Vec<EventRecord>, AttendanceError>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE group_id = $1 ORDER BY event_id"
            ))
            .bind(group_id.get())
            .fetch_all(&self.pool)
            .await
            .map_err(db)?;
            rows_to_events(&rows)
        })
    }
}

fn rows_to_events(rows: &[PgRow]) -> Result<Vec<EventRecord>, AttendanceError> {
    rows.iter()
        .map(|row| row_to_event(row).map_err(AttendanceError::from))
        .collect()
}

fn corrupt(what: &str, error: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what}: {error}"))
}

fn count_to_db(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|e| corrupt("count out of range", e))
}

fn count_from_db(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|e| corrupt("negative count", e))
}

fn parse_participation_status(raw: &str) -> Result<ParticipationStatus, StoreError> {
    raw.parse().map_err(|e| corrupt("participation status", e))
}

/// Convert an `events` row.
fn row_to_event(row: &PgRow) -> Result<EventRecord, StoreError> {
    let status: &str = row.try_get("status")?;
    let image_id: Option<i64> = row.try_get("image_id")?;

    Ok(EventRecord {
        event_id: EventId::new(row.try_get("event_id")?).map_err(|e| corrupt("event_id", e))?,
        group_id: GroupId::new(row.try_get("group_id")?).map_err(|e| corrupt("group_id", e))?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        location_id: LocationId::new(row.try_get("location_id")?)
            .map_err(|e| corrupt("location_id", e))?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        status: status.parse().map_err(|e| corrupt("event status", e))?,
        count: count_from_db(row.try_get("count")?)?,
        capacity: count_from_db(row.try_get("capacity")?)?,
        image_id: image_id
            .map(ImageId::new)
            .transpose()
            .map_err(|e| corrupt("image_id", e))?,
    })
}

/// Convert a `participants` row.
fn row_to_participant(row: &PgRow) -> Result<ParticipationRecord, StoreError> {
    let user_id: &str = row.try_get("user_id")?;

    Ok(ParticipationRecord {
        participant_id: ParticipantId::new(row.try_get("participant_id")?)
            .map_err(|e| corrupt("participant_id", e))?,
        user_id: UserId::parse(user_id).map_err(|e| corrupt("user_id", e))?,
        event_id: EventId::new(row.try_get("event_id")?).map_err(|e| corrupt("event_id", e))?,
        status: parse_participation_status(row.try_get("status")?)?,
    })
}
