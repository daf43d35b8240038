use crate::errors::Result;
use crate::model::{DevicePresence, ImageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Write path for raw image blobs, stored separately from their metadata.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes a new blob under `name` and returns the reference recorded in
    /// image metadata. Must fail rather than overwrite an existing blob.
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<String>;
}

/// Append-only image metadata. One record per accepted report, no
/// deduplication.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn append(&self, record: &ImageRecord) -> Result<()>;

    /// Most recent record for a device, resolved at read time.
    async fn latest_for_device(&self, device_id: &str) -> Result<Option<ImageRecord>>;

    /// Records newest-first, optionally filtered by device.
    async fn list_recent(
        &self,
        device_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ImageRecord>>;
}

/// Current state of every known device. The only resource mutated by two
/// concurrent actors (ingestion and the sweeper), so every mutation is a
/// single conditional statement at the storage layer, never a
/// read-modify-write pair in the application.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Creates or advances the row for `device_id` to online. Last-write-wins
    /// keyed by `last_seen`: a call carrying an older timestamp than the
    /// stored row leaves the row entirely unchanged.
    async fn upsert_online(
        &self,
        device_id: &str,
        last_seen: DateTime<Utc>,
        active_params: &serde_json::Value,
    ) -> Result<()>;

    /// Demotes every online row silent for longer than `threshold`, each
    /// evaluated against its own `last_seen` and the single `now` snapshot.
    /// Returns the number of rows changed.
    async fn mark_stale_offline(&self, threshold: Duration, now: DateTime<Utc>) -> Result<u64>;

    async fn get(&self, device_id: &str) -> Result<Option<DevicePresence>>;

    async fn list(&self) -> Result<Vec<DevicePresence>>;
}

/// In-memory store implementations mirroring the Postgres semantics, with
/// injectable failures. Test support only.
#[cfg(test)]
pub mod memory {
    use super::*;
    use crate::errors::Error;
    use crate::model::DeviceStatus;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemBlobStore {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
        fail: AtomicBool,
    }

    impl MemBlobStore {
        pub fn fail_next(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        pub fn contains(&self, name: &str) -> bool {
            self.blobs.lock().unwrap().contains_key(name)
        }

        pub fn len(&self) -> usize {
            self.blobs.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BlobStore for MemBlobStore {
        async fn put(&self, name: &str, bytes: &[u8]) -> Result<String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("injected blob failure".to_string()));
            }
            let mut blobs = self.blobs.lock().unwrap();
            if blobs.contains_key(name) {
                return Err(Error::Storage(format!("blob {} already exists", name)));
            }
            blobs.insert(name.to_string(), bytes.to_vec());
            Ok(name.to_string())
        }
    }

    #[derive(Default)]
    pub struct MemImageStore {
        rows: Mutex<Vec<ImageRecord>>,
        fail: AtomicBool,
    }

    impl MemImageStore {
        pub fn fail_next(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        pub fn all(&self) -> Vec<ImageRecord> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageStore for MemImageStore {
        async fn append(&self, record: &ImageRecord) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("injected metadata failure".to_string()));
            }
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn latest_for_device(&self, device_id: &str) -> Result<Option<ImageRecord>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.device_id == device_id)
                .max_by_key(|r| r.timestamp)
                .cloned())
        }

        async fn list_recent(
            &self,
            device_id: Option<&str>,
            limit: i64,
            offset: i64,
        ) -> Result<Vec<ImageRecord>> {
            let mut rows: Vec<ImageRecord> = self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| device_id.map_or(true, |d| r.device_id == d))
                .cloned()
                .collect();
            rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            Ok(rows
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }
    }

    #[derive(Default)]
    pub struct MemPresenceStore {
        rows: Mutex<HashMap<String, DevicePresence>>,
        fail: AtomicBool,
    }

    impl MemPresenceStore {
        pub fn fail_next(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        pub fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        pub fn insert_row(&self, row: DevicePresence) {
            self.rows.lock().unwrap().insert(row.device_id.clone(), row);
        }
    }

    #[async_trait]
    impl PresenceStore for MemPresenceStore {
        async fn upsert_online(
            &self,
            device_id: &str,
            last_seen: DateTime<Utc>,
            active_params: &serde_json::Value,
        ) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::PresenceUpdate("injected failure".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            match rows.get_mut(device_id) {
                // Older than the stored row: a late replay, leave it as-is.
                Some(row) if row.last_seen > last_seen => {}
                Some(row) => {
                    row.status = DeviceStatus::Online;
                    row.last_seen = last_seen;
                    row.active_params = active_params.clone();
                }
                None => {
                    rows.insert(
                        device_id.to_string(),
                        DevicePresence {
                            device_id: device_id.to_string(),
                            status: DeviceStatus::Online,
                            last_seen,
                            active_params: active_params.clone(),
                        },
                    );
                }
            }
            Ok(())
        }

        async fn mark_stale_offline(
            &self,
            threshold: Duration,
            now: DateTime<Utc>,
        ) -> Result<u64> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("injected sweep failure".to_string()));
            }
            let cutoff = now - threshold;
            let mut flipped = 0;
            for row in self.rows.lock().unwrap().values_mut() {
                if row.status == DeviceStatus::Online && row.last_seen < cutoff {
                    row.status = DeviceStatus::Offline;
                    flipped += 1;
                }
            }
            Ok(flipped)
        }

        async fn get(&self, device_id: &str) -> Result<Option<DevicePresence>> {
            Ok(self.rows.lock().unwrap().get(device_id).cloned())
        }

        async fn list(&self) -> Result<Vec<DevicePresence>> {
            let mut rows: Vec<DevicePresence> =
                self.rows.lock().unwrap().values().cloned().collect();
            rows.sort_by(|a, b| a.device_id.cmp(&b.device_id));
            Ok(rows)
        }
    }
}
