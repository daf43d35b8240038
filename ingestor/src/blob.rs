use crate::errors::Result;
use crate::store::BlobStore;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Filesystem blob store. Images land under `root`, one subdirectory per
/// device.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates the root directory if missing. An unwritable root is a startup
    /// failure, not something to discover on the first report.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        info!("Blob store root: {}", root.display());
        Ok(Self { root })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.root.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // create_new: a colliding name is an error, never an overwrite.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;

        Ok(path.to_string_lossy().into_owned())
    }
}
