use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;
use serde::Serialize;

/// Wire envelope published by a simulated camera device.
#[derive(Debug, Serialize)]
pub struct ReportEnvelope {
    pub image: String,
    pub device: String,
    #[serde(rename = "cameraParams")]
    pub camera_params: serde_json::Value,
}

impl ReportEnvelope {
    pub fn random(rng: &mut impl Rng, device: String) -> Self {
        Self {
            image: STANDARD.encode(fake_jpeg(rng)),
            device,
            camera_params: serde_json::json!({
                "iso": ([100, 200, 400, 800][rng.gen_range(0..4)]),
                "shutterMs": rng.gen_range(1..40),
                "whiteBalance": if rng.gen_bool(0.8) { "auto" } else { "daylight" },
            }),
        }
    }
}

/// A few KiB of noise wrapped in JPEG markers, enough to exercise the
/// pipeline without shipping real frames.
fn fake_jpeg(rng: &mut impl Rng) -> Vec<u8> {
    let body_len = rng.gen_range(2048..8192);
    let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
    bytes.extend((0..body_len).map(|_| rng.gen::<u8>()));
    bytes.extend([0xFF, 0xD9]);
    bytes
}
