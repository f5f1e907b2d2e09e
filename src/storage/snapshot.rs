//! Flat-file snapshot: a JSON object mapping metric id to its scalar.
//!
//! Kinds are not recorded, so a restored counter and a restored gauge look
//! the same until the next update names its kind again.

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize `values` with sorted keys and replace the file atomically.
    pub async fn write(&self, values: &HashMap<String, f64>) -> StoreResult<()> {
        let ordered: BTreeMap<&str, f64> = values.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let body = serde_json::to_vec_pretty(&ordered).map_err(|e| StoreError::snapshot(&self.path, e))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::snapshot(&self.path, e))?;
        }

        let staging = self.path.with_extension("tmp");
        tokio::fs::write(&staging, &body)
            .await
            .map_err(|e| StoreError::snapshot(&staging, e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| StoreError::snapshot(&self.path, e))?;

        debug!(
            target: "vitals::snapshot",
            path = %self.path.display(),
            metrics = values.len(),
            bytes = body.len(),
            "Snapshot written"
        );
        Ok(())
    }

    /// Read the snapshot back. A missing file yields an empty map.
    pub async fn read(&self) -> StoreResult<HashMap<String, f64>> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    target: "vitals::snapshot",
                    path = %self.path.display(),
                    "No snapshot to restore"
                );
                return Ok(HashMap::new());
            }
            Err(e) => return Err(StoreError::snapshot(&self.path, e)),
        };

        serde_json::from_slice(&body).map_err(|e| StoreError::snapshot(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("metrics.json"));

        let mut values = HashMap::new();
        values.insert("Alloc".to_string(), 123.45);
        values.insert("PollCount".to_string(), 7.0);
        file.write(&values).await.unwrap();

        assert_eq!(file.read().await.unwrap(), values);
        assert!(!file.path().with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("absent.json"));
        assert!(file.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = SnapshotFile::new(&path).read().await.unwrap_err();
        assert!(matches!(err, StoreError::Snapshot { .. }));
    }

    #[tokio::test]
    async fn test_file_is_flat_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let file = SnapshotFile::new(dir.path().join("nested/metrics.json"));
        let mut values = HashMap::new();
        values.insert("b".to_string(), 2.0);
        values.insert("a".to_string(), 1.5);
        file.write(&values).await.unwrap();

        let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(file.path()).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"a": 1.5, "b": 2.0}));
    }
}
