//! File journal for recovery state
//!
//! Persists [`RecoverySnapshot`]s so scheduled and escalated jobs survive a
//! restart. Each save replaces the file atomically; the envelope carries a
//! SHA-256 of the snapshot text and loads refuse a mismatching file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stratasync_domain::RecoverySnapshot;
use tracing::{debug, info};

use crate::errors::{InfraError, InfraResult};
use crate::fs::write_atomic;

const JOURNAL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: u32,
    checksum: String,
    snapshot: String,
}

fn checksum(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Single-file journal of recovery state
#[derive(Debug, Clone)]
pub struct RecoveryJournal {
    path: PathBuf,
}

impl RecoveryJournal {
    /// Journal stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Journal file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the journal with `snapshot`
    pub async fn save(&self, snapshot: &RecoverySnapshot) -> InfraResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| InfraError::io(parent, e))?;
        }

        let text = serde_json::to_string(snapshot)?;
        let envelope = Envelope { version: JOURNAL_VERSION, checksum: checksum(&text), snapshot: text };
        let bytes = serde_json::to_vec_pretty(&envelope)?;
        write_atomic(&self.path, &bytes).await?;

        debug!(
            path = %self.path.display(),
            jobs = snapshot.jobs.len(),
            records = snapshot.records.len(),
            "Recovery journal saved"
        );
        Ok(())
    }

    /// Read the last saved snapshot; `None` when no journal exists yet
    pub async fn load(&self) -> InfraResult<Option<RecoverySnapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(InfraError::io(&self.path, err)),
        };

        let envelope: Envelope = serde_json::from_slice(&bytes)?;
        if envelope.version != JOURNAL_VERSION {
            return Err(InfraError::Serialization(format!(
                "unsupported journal version {} in {}",
                envelope.version,
                self.path.display()
            )));
        }

        let actual = checksum(&envelope.snapshot);
        if actual != envelope.checksum {
            return Err(InfraError::Checksum {
                path: self.path.clone(),
                expected: envelope.checksum,
                actual,
            });
        }

        let snapshot: RecoverySnapshot = serde_json::from_str(&envelope.snapshot)?;
        info!(
            path = %self.path.display(),
            jobs = snapshot.jobs.len(),
            records = snapshot.records.len(),
            "Recovery journal loaded"
        );
        Ok(Some(snapshot))
    }
}
