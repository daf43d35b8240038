use crate::errors::{Error, Result};
use crate::model::DeviceReport;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};

/// Decodes a raw wire payload into a [`DeviceReport`].
///
/// The wire format is a JSON envelope:
/// `{ "image": <base64>, "device": <string>, "cameraParams": <object> }`
/// where `cameraParams` is optional and passed through opaquely.
///
/// `received_at` becomes the report's `captured_at`; the wire format does not
/// carry a trustworthy device-side timestamp. Pure transformation, no I/O.
pub fn decode(payload: &[u8], received_at: DateTime<Utc>) -> Result<DeviceReport> {
    let envelope: serde_json::Value =
        serde_json::from_slice(payload).map_err(Error::MalformedPayload)?;

    let device = envelope
        .get("device")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidReport("missing device identifier".to_string()))?;
    if device.is_empty() {
        return Err(Error::InvalidReport("empty device identifier".to_string()));
    }

    let image = envelope
        .get("image")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidReport("missing image field".to_string()))?;

    let image_bytes = STANDARD
        .decode(image)
        .map_err(Error::InvalidImageEncoding)?;

    let camera_params = envelope
        .get("cameraParams")
        .cloned()
        .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));

    Ok(DeviceReport {
        device_id: device.to_string(),
        captured_at: received_at,
        image_bytes,
        camera_params,
    })
}
