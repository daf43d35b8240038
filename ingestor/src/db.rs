use crate::errors::Result;
use crate::model::{DevicePresence, ImageRecord};
use crate::store::{ImageStore, PresenceStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Append-only image metadata in Postgres.
pub struct PgImageStore {
    pool: PgPool,
}

impl PgImageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImageStore for PgImageStore {
    async fn append(&self, record: &ImageRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO images (id, device_id, ts, camera_params, file_path)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.device_id)
        .bind(record.timestamp)
        .bind(&record.camera_params)
        .bind(&record.file_path)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn latest_for_device(&self, device_id: &str) -> Result<Option<ImageRecord>> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, device_id, ts AS timestamp, camera_params, file_path
            FROM images
            WHERE device_id = $1
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_recent(
        &self,
        device_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageRecord>> {
        let records = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, device_id, ts AS timestamp, camera_params, file_path
            FROM images
            WHERE ($1::text IS NULL OR device_id = $1)
            ORDER BY ts DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(device_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }
}

/// Device presence in Postgres. Both mutations are single conditional
/// statements, safe against the concurrent upsert/sweep race.
pub struct PgPresenceStore {
    pool: PgPool,
}

impl PgPresenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PresenceStore for PgPresenceStore {
    async fn upsert_online(
        &self,
        device_id: &str,
        last_seen: DateTime<Utc>,
        active_params: &serde_json::Value,
    ) -> Result<()> {
        // The WHERE guard makes a late replay with an older timestamp a
        // no-op: last_seen never regresses.
        sqlx::query(
            r#"
            INSERT INTO device_presence (device_id, status, last_seen, active_params)
            VALUES ($1, 'online', $2, $3)
            ON CONFLICT (device_id) DO UPDATE
            SET status = 'online',
                last_seen = EXCLUDED.last_seen,
                active_params = EXCLUDED.active_params
            WHERE device_presence.last_seen <= EXCLUDED.last_seen
            "#,
        )
        .bind(device_id)
        .bind(last_seen)
        .bind(active_params)
        .execute(&self.pool)
        .await
        .map_err(|e| crate::errors::Error::PresenceUpdate(e.to_string()))?;

        Ok(())
    }

    async fn mark_stale_offline(&self, threshold: Duration, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = now - threshold;
        let result = sqlx::query(
            r#"
            UPDATE device_presence
            SET status = 'offline'
            WHERE status = 'online' AND last_seen < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get(&self, device_id: &str) -> Result<Option<DevicePresence>> {
        let row = sqlx::query_as::<_, DevicePresence>(
            r#"
            SELECT device_id, status, last_seen, active_params
            FROM device_presence
            WHERE device_id = $1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list(&self) -> Result<Vec<DevicePresence>> {
        let rows = sqlx::query_as::<_, DevicePresence>(
            r#"
            SELECT device_id, status, last_seen, active_params
            FROM device_presence
            ORDER BY device_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
