//! File-backed payload store
//!
//! One JSON file per handle under a single directory. Handles are operation
//! ids, so the file name is stable across restarts and a restored recovery
//! job finds its payload again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use stratasync_core::{PayloadStore, SyncError, SyncResult};
use stratasync_domain::{Batch, OperationId, PayloadHandle};
use tracing::{debug, instrument};

use crate::errors::{InfraError, InfraResult};
use crate::fs::write_atomic;

const EXTENSION: &str = "json";

/// [`PayloadStore`] writing batches to a directory
#[derive(Debug, Clone)]
pub struct FilePayloadStore {
    dir: PathBuf,
}

impl FilePayloadStore {
    /// Open the store, creating `dir` if needed
    pub async fn open(dir: impl Into<PathBuf>) -> InfraResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| InfraError::io(&dir, e))?;
        debug!(dir = %dir.display(), "Payload store opened");
        Ok(Self { dir })
    }

    /// Directory holding the payload files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, handle: &PayloadHandle) -> SyncResult<PathBuf> {
        let name = handle.as_str();
        let valid = !name.is_empty()
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SyncError::Payload(format!("invalid payload handle '{name}'")));
        }
        Ok(self.dir.join(format!("{name}.{EXTENSION}")))
    }

    /// Handles currently on disk, sorted
    pub async fn handles(&self) -> InfraResult<Vec<PayloadHandle>> {
        let mut entries =
            tokio::fs::read_dir(&self.dir).await.map_err(|e| InfraError::io(&self.dir, e))?;
        let mut handles = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| InfraError::io(&self.dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.starts_with('.') {
                    handles.push(PayloadHandle::new(stem));
                }
            }
        }
        handles.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(handles)
    }
}

#[async_trait]
impl PayloadStore for FilePayloadStore {
    #[instrument(skip(self, batch), fields(operation_id = %operation_id, records = batch.len()))]
    async fn put(&self, operation_id: OperationId, batch: Arc<Batch>) -> SyncResult<PayloadHandle> {
        let handle = PayloadHandle::new(operation_id.to_string());
        let path = self.path_for(&handle)?;
        let bytes = serde_json::to_vec(batch.as_ref()).map_err(InfraError::from)?;
        write_atomic(&path, &bytes).await?;
        Ok(handle)
    }

    async fn get(&self, handle: &PayloadHandle) -> SyncResult<Option<Arc<Batch>>> {
        let path = self.path_for(handle)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(InfraError::io(&path, err).into()),
        };
        let batch: Batch = serde_json::from_slice(&bytes).map_err(InfraError::from)?;
        Ok(Some(Arc::new(batch)))
    }

    async fn release(&self, handle: &PayloadHandle) -> SyncResult<()> {
        let path = self.path_for(handle)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(InfraError::io(&path, err).into()),
        }
    }
}
