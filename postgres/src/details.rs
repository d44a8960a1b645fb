//! Location and image lookups used to enrich published snapshots.

use crate::error::db;
use futures::future::BoxFuture;
use rsvp_core::error::AttendanceError;
use rsvp_core::event::Location;
use rsvp_core::ids::{ImageId, LocationId};
use rsvp_core::store::EventDetailsLookup;
use sqlx::PgPool;
use sqlx::Row;

/// Resolves locations from the `locations` table and images to
/// `{image_base_url}/{object_key}`.
#[derive(Clone, Debug)]
pub struct PostgresEventDetails {
    pool: PgPool,
    image_base_url: String,
}

impl PostgresEventDetails {
    /// Create the lookup. A trailing `/` on `image_base_url` is ignored.
    #[must_use]
    pub fn new(pool: PgPool, image_base_url: impl Into<String>) -> Self {
        let mut image_base_url = image_base_url.into();
        while image_base_url.ends_with('/') {
            image_base_url.pop();
        }
        Self {
            pool,
            image_base_url,
        }
    }

    /// Store a location and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    pub async fn add_location(&self, location: &Location) -> Result<LocationId, AttendanceError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO locations (street, city, province, country)
            VALUES ($1, $2, $3, $4)
            RETURNING location_id
            ",
        )
        .bind(&location.street)
        .bind(&location.city)
        .bind(&location.province)
        .bind(&location.country)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;

        LocationId::new(id)
    }

    /// Store an image reference and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::Storage`] on engine failures.
    pub async fn add_image(&self, object_key: &str) -> Result<ImageId, AttendanceError> {
        let (id,): (i64,) =
            sqlx::query_as("INSERT INTO images (object_key) VALUES ($1) RETURNING image_id")
                .bind(object_key)
                .fetch_one(&self.pool)
                .await
                .map_err(db)?;

        ImageId::new(id)
    }
}

impl EventDetailsLookup for PostgresEventDetails {
    fn location(&self, location_id: LocationId) -> BoxFuture<'_, Result<Location, AttendanceError>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT street, city, province, country FROM locations WHERE location_id = $1",
            )
            .bind(location_id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)?
            .ok_or_else(|| AttendanceError::not_found(format!("location {location_id}")))?;

            Ok(Location {
                street: row.try_get("street").map_err(db)?,
                city: row.try_get("city").map_err(db)?,
                province: row.try_get("province").map_err(db)?,
                country: row.try_get("country").map_err(db)?,
            })
        })
    }

    fn image_url(&self, image_id: ImageId) -> BoxFuture<'_, Result<Option<String>, AttendanceError>> {
        Box::pin(async move {
            let key: Option<(String,)> =
                sqlx::query_as("SELECT object_key FROM images WHERE image_id = $1")
                    .bind(image_id.get())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(db)?;

            if key.is_none() {
                tracing::debug!(image_id = %image_id, "Image not found, publishing without URL");
            }
            Ok(key.map(|(key,)| format!("{}/{key}", self.image_base_url)))
        })
    }
}
