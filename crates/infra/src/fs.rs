//! Atomic file replacement

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;

use crate::errors::{InfraError, InfraResult};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_path(path: &Path) -> PathBuf {
    let seq = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path.file_name().map_or_else(|| "file".into(), |n| n.to_string_lossy().into_owned());
    path.with_file_name(format!(".{name}.{}.{seq}.tmp", std::process::id()))
}

/// Write `bytes` to a sibling temp file, fsync it, then rename over `path`
///
/// Readers see either the previous contents or the new contents, never a
/// partial write.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> InfraResult<()> {
    let tmp = temp_path(path);

    let result = async {
        let mut file = tokio::fs::File::create(&tmp).await.map_err(|e| InfraError::io(&tmp, e))?;
        file.write_all(bytes).await.map_err(|e| InfraError::io(&tmp, e))?;
        file.sync_all().await.map_err(|e| InfraError::io(&tmp, e))?;
        drop(file);
        tokio::fs::rename(&tmp, path).await.map_err(|e| InfraError::io(path, e))
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, b"first").await.unwrap();
        write_atomic(&path, b"second").await.unwrap();

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"second");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_atomic_missing_dir_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("state.json");

        let err = write_atomic(&path, b"x").await.unwrap_err();
        assert!(matches!(err, InfraError::Io { .. }));
    }
}
