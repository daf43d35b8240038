use crate::errors::{Error, Result};
use crate::metrics::{
    IMAGES_STORED_TOTAL, INGEST_LATENCY_SECONDS, PRESENCE_FAILURES_TOTAL, STORAGE_FAILURES_TOTAL,
};
use crate::model::{DeviceReport, ImageRecord};
use crate::store::{BlobStore, ImageStore, PresenceStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Orchestrates the persistence of one report: blob write, metadata append,
/// presence upsert.
pub struct Ingestor {
    blobs: Arc<dyn BlobStore>,
    images: Arc<dyn ImageStore>,
    presence: Arc<dyn PresenceStore>,
    storage_timeout: Duration,
}

impl Ingestor {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        images: Arc<dyn ImageStore>,
        presence: Arc<dyn PresenceStore>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            blobs,
            images,
            presence,
            storage_timeout,
        }
    }

    /// Persists one report. The blob write must succeed before anything else
    /// is recorded; metadata append and presence upsert then run as
    /// independent side effects, so a presence failure never discards the
    /// stored image and a metadata failure never blocks the presence update.
    pub async fn ingest(&self, report: DeviceReport) -> Result<ImageRecord> {
        let start = Instant::now();

        let name = blob_name(&report);
        let file_path = match timeout(
            self.storage_timeout,
            self.blobs.put(&name, &report.image_bytes),
        )
        .await
        {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => {
                STORAGE_FAILURES_TOTAL.inc();
                return Err(Error::Storage(format!(
                    "blob write for device {} failed: {}",
                    report.device_id, e
                )));
            }
            Err(_) => {
                STORAGE_FAILURES_TOTAL.inc();
                return Err(Error::Storage(format!(
                    "blob write for device {} timed out",
                    report.device_id
                )));
            }
        };

        let record = ImageRecord {
            id: Uuid::new_v4(),
            device_id: report.device_id.clone(),
            timestamp: report.captured_at,
            camera_params: report.camera_params.clone(),
            file_path,
        };

        let (meta_result, presence_result) = tokio::join!(
            timeout(self.storage_timeout, self.images.append(&record)),
            timeout(
                self.storage_timeout,
                self.presence.upsert_online(
                    &report.device_id,
                    report.captured_at,
                    &report.camera_params
                )
            ),
        );

        // Presence reflects "device is alive"; its failure is logged, never
        // propagated.
        match presence_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                PRESENCE_FAILURES_TOTAL.inc();
                warn!(
                    "Presence update for device {} failed: {}",
                    report.device_id, e
                );
            }
            Err(_) => {
                PRESENCE_FAILURES_TOTAL.inc();
                warn!("Presence update for device {} timed out", report.device_id);
            }
        }

        match meta_result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                STORAGE_FAILURES_TOTAL.inc();
                return Err(Error::Storage(format!(
                    "metadata write for device {} (blob {}) failed: {}",
                    report.device_id, record.file_path, e
                )));
            }
            Err(_) => {
                STORAGE_FAILURES_TOTAL.inc();
                return Err(Error::Storage(format!(
                    "metadata write for device {} (blob {}) timed out",
                    report.device_id, record.file_path
                )));
            }
        }

        IMAGES_STORED_TOTAL.inc();
        INGEST_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        debug!(
            "Ingested report from {} as {}",
            record.device_id, record.file_path
        );

        Ok(record)
    }
}

/// Blob names carry the device id, capture time and a random suffix, so two
/// reports landing in the same clock tick cannot collide.
fn blob_name(report: &DeviceReport) -> String {
    // Device ids are free-form wire input; keep path syntax out of the name.
    let device: String = report
        .device_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}/{}-{}.jpg",
        device,
        report.captured_at.timestamp_micros(),
        Uuid::new_v4()
    )
}

/// Consumes decoded reports from the channel and ingests them with bounded
/// concurrency. Exits when the channel closes, after draining in-flight work.
pub async fn run_workers(
    mut rx: mpsc::Receiver<DeviceReport>,
    ingestor: Arc<Ingestor>,
    concurrency: usize,
) {
    info!("Starting ingest workers with concurrency={}", concurrency);
    let permits = Arc::new(Semaphore::new(concurrency));

    while let Some(report) = rx.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = ingestor.ingest(report).await {
                error!("Failed to ingest report: {}", e);
            }
        });
    }

    // Channel closed: wait for in-flight ingests before reporting stopped.
    let _ = permits.acquire_many(concurrency as u32).await;
    info!("Ingest workers stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceStatus;
    use crate::store::memory::{MemBlobStore, MemImageStore, MemPresenceStore};
    use chrono::{DateTime, Utc};

    fn report(device: &str, captured_at: DateTime<Utc>) -> DeviceReport {
        DeviceReport {
            device_id: device.to_string(),
            captured_at,
            image_bytes: b"JPEGBYTES".to_vec(),
            camera_params: serde_json::json!({ "iso": 400 }),
        }
    }

    fn fixture() -> (
        Arc<MemBlobStore>,
        Arc<MemImageStore>,
        Arc<MemPresenceStore>,
        Ingestor,
    ) {
        let blobs = Arc::new(MemBlobStore::default());
        let images = Arc::new(MemImageStore::default());
        let presence = Arc::new(MemPresenceStore::default());
        let ingestor = Ingestor::new(
            blobs.clone(),
            images.clone(),
            presence.clone(),
            Duration::from_secs(5),
        );
        (blobs, images, presence, ingestor)
    }

    #[tokio::test]
    async fn test_ingest_stores_image_and_marks_device_online() {
        let (blobs, images, presence, ingestor) = fixture();
        let now = Utc::now();

        let record = ingestor.ingest(report("cam-7", now)).await.unwrap();

        assert_eq!(record.device_id, "cam-7");
        assert!(blobs.contains(&record.file_path));
        assert_eq!(images.all().len(), 1);
        assert_eq!(images.all()[0].camera_params["iso"], 400);

        let row = presence.get("cam-7").await.unwrap().unwrap();
        assert_eq!(row.status, DeviceStatus::Online);
        assert_eq!(row.last_seen, now);
        assert_eq!(row.active_params["iso"], 400);
    }

    #[tokio::test]
    async fn test_blob_failure_aborts_whole_report() {
        let (blobs, images, presence, ingestor) = fixture();
        blobs.fail_next();

        let err = ingestor.ingest(report("cam-1", Utc::now())).await.unwrap_err();

        assert!(matches!(err, Error::Storage(_)));
        assert!(images.all().is_empty());
        assert_eq!(presence.row_count(), 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_still_updates_presence() {
        let (_blobs, images, presence, ingestor) = fixture();
        images.fail_next();

        let err = ingestor.ingest(report("cam-1", Utc::now())).await.unwrap_err();

        assert!(matches!(err, Error::Storage(_)));
        let row = presence.get("cam-1").await.unwrap().unwrap();
        assert_eq!(row.status, DeviceStatus::Online);
    }

    #[tokio::test]
    async fn test_presence_failure_keeps_stored_image() {
        let (_blobs, images, presence, ingestor) = fixture();
        presence.fail_next();

        let record = ingestor.ingest(report("cam-1", Utc::now())).await.unwrap();

        assert_eq!(images.all().len(), 1);
        assert_eq!(images.all()[0].id, record.id);
    }

    #[tokio::test]
    async fn test_replay_appends_image_but_presence_unchanged() {
        let (blobs, images, presence, ingestor) = fixture();
        let now = Utc::now();

        ingestor.ingest(report("cam-1", now)).await.unwrap();
        ingestor.ingest(report("cam-1", now)).await.unwrap();

        // Append-only metadata: two rows, two blobs. One presence row with
        // the same final state.
        assert_eq!(images.all().len(), 2);
        assert_eq!(blobs.len(), 2);
        assert_eq!(presence.row_count(), 1);
        let row = presence.get("cam-1").await.unwrap().unwrap();
        assert_eq!(row.last_seen, now);
    }

    #[tokio::test]
    async fn test_out_of_order_report_never_regresses_last_seen() {
        let (_blobs, _images, presence, ingestor) = fixture();
        let older = Utc::now();
        let newer = older + chrono::Duration::seconds(30);

        let mut late = report("cam-1", older);
        late.camera_params = serde_json::json!({ "iso": 100 });

        ingestor.ingest(report("cam-1", newer)).await.unwrap();
        ingestor.ingest(late).await.unwrap();

        let row = presence.get("cam-1").await.unwrap().unwrap();
        assert_eq!(row.last_seen, newer);
        assert_eq!(row.active_params["iso"], 400);
    }

    #[test]
    fn test_blob_name_sanitizes_device_id() {
        let r = report("../evil", Utc::now());
        let name = blob_name(&r);
        assert!(name.starts_with("___evil/"));
        assert!(!name.contains(".."));
    }
}
