//! # File Store
//!
//! This module implements a file-backed record store. Each record is one
//! file under the store root, written to a temporary sibling first and then
//! renamed into place so readers never observe a half-written record.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io;
use tracing::{debug, warn};

use crate::error::CacheResult;
use crate::store::provider::BlobStore;
use crate::store::validate_record_name;

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    initialized: Arc<AtomicBool>,
}

impl FileStore {
    /// Create a file store rooted at the given directory. The directory is
    /// created lazily on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Root directory holding the record files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn ensure_initialized(&self) -> io::Result<()> {
        // Fast path - already initialized
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }

        // Concurrent losers just repeat the create_dir_all, which is
        // idempotent
        fs::create_dir_all(&self.root).await?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl BlobStore for FileStore {
    async fn contains(&self, name: &str) -> CacheResult<bool> {
        validate_record_name(name)?;
        self.ensure_initialized().await?;

        Ok(fs::try_exists(self.record_path(name)).await?)
    }

    async fn get(&self, name: &str) -> CacheResult<Option<Bytes>> {
        validate_record_name(name)?;
        self.ensure_initialized().await?;

        let path = self.record_path(name);
        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to read record file");
                Err(e.into())
            }
        }
    }

    async fn put(&self, name: &str, data: Bytes) -> CacheResult<()> {
        validate_record_name(name)?;
        self.ensure_initialized().await?;

        let path = self.record_path(name);
        let temp_path = self.root.join(format!("{name}.tmp"));

        // Write to a temporary file then rename, so a crash mid-write cannot
        // leave a truncated record under the final name
        if let Err(e) = fs::write(&temp_path, &data).await {
            warn!(path = ?temp_path, error = %e, "Failed to write record file");
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&temp_path, &path).await {
            warn!(
                from = ?temp_path,
                to = ?path,
                error = %e,
                "Failed to rename temporary record file"
            );
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(name = %name, len = data.len(), "Wrote record file");
        Ok(())
    }

    async fn remove(&self, name: &str) -> CacheResult<()> {
        validate_record_name(name)?;
        self.ensure_initialized().await?;

        let path = self.record_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = ?path, error = %e, "Failed to remove record file");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use tempfile::TempDir;

    fn store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("records"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let (_dir, store) = store();
        let data = Bytes::from_static(b"hello records");

        store.put("item1", data.clone()).await.unwrap();
        assert_eq!(store.get("item1").await.unwrap(), Some(data));
    }

    #[tokio::test]
    async fn test_get_absent_is_none() {
        let (_dir, store) = store();
        assert_eq!(store.get("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_replaces_previous_contents() {
        let (_dir, store) = store();
        store.put("item1", Bytes::from_static(b"old")).await.unwrap();
        store.put("item1", Bytes::from_static(b"new")).await.unwrap();
        assert_eq!(
            store.get("item1").await.unwrap(),
            Some(Bytes::from_static(b"new"))
        );
    }

    #[tokio::test]
    async fn test_no_temporary_file_left_behind() {
        let (_dir, store) = store();
        store.put("item1", Bytes::from_static(b"data")).await.unwrap();
        assert!(!store.root().join("item1.tmp").exists());
        assert!(store.root().join("item1").exists());
    }

    #[tokio::test]
    async fn test_contains_and_remove() {
        let (_dir, store) = store();
        assert!(!store.contains("item1").await.unwrap());

        store.put("item1", Bytes::from_static(b"data")).await.unwrap();
        assert!(store.contains("item1").await.unwrap());

        store.remove("item1").await.unwrap();
        assert!(!store.contains("item1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_absent_is_ok() {
        let (_dir, store) = store();
        assert!(store.remove("ghost").await.is_ok());
    }

    #[tokio::test]
    async fn test_records_survive_reopening() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("records");

        let store = FileStore::new(&root);
        store.put("item1", Bytes::from_static(b"durable")).await.unwrap();
        drop(store);

        let reopened = FileStore::new(&root);
        assert_eq!(
            reopened.get("item1").await.unwrap(),
            Some(Bytes::from_static(b"durable"))
        );
    }

    #[tokio::test]
    async fn test_escaping_names_rejected() {
        let (_dir, store) = store();
        let result = store.put("../escape", Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(CacheError::InvalidRecordName(_))));
        assert!(matches!(
            store.get("a/b").await,
            Err(CacheError::InvalidRecordName(_))
        ));
    }
}
