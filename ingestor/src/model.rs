use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One decoded image+telemetry report from a camera device.
///
/// Transient: produced by the decoder, consumed once by the ingestion
/// coordinator, never persisted as-is.
#[derive(Debug, Clone)]
pub struct DeviceReport {
    pub device_id: String,
    pub captured_at: DateTime<Utc>,
    pub image_bytes: Vec<u8>,
    pub camera_params: serde_json::Value,
}

/// Online/offline classification of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "device_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// Durable metadata row for one stored image. Append-only, never mutated.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: Uuid,
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub camera_params: serde_json::Value,
    pub file_path: String,
}

/// Current state of one known device, keyed by device id.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DevicePresence {
    pub device_id: String,
    pub status: DeviceStatus,
    pub last_seen: DateTime<Utc>,
    pub active_params: serde_json::Value,
}

/// Device list entry returned by the query API: presence joined with the
/// device's most recent image at read time.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub device_id: String,
    pub status: DeviceStatus,
    pub last_seen: DateTime<Utc>,
    pub active_params: serde_json::Value,
    pub last_image: Option<ImageRecord>,
}

/// Operator command published to a device's control topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Value,
}
