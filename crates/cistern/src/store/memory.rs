//! # Memory Store
//!
//! In-memory record store used by tests and by embedders that want cache
//! semantics without touching disk. Records live in a plain guarded map and
//! are never evicted, matching the rule that only external policy deletes
//! cached data.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::CacheResult;
use crate::store::provider::BlobStore;
use crate::store::validate_record_name;

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn contains(&self, name: &str) -> CacheResult<bool> {
        validate_record_name(name)?;
        Ok(self.records.read().contains_key(name))
    }

    async fn get(&self, name: &str) -> CacheResult<Option<Bytes>> {
        validate_record_name(name)?;
        Ok(self.records.read().get(name).cloned())
    }

    async fn put(&self, name: &str, data: Bytes) -> CacheResult<()> {
        validate_record_name(name)?;
        debug!(name = %name, len = data.len(), "Stored record in memory");
        self.records.write().insert(name.to_string(), data);
        Ok(())
    }

    async fn remove(&self, name: &str) -> CacheResult<()> {
        validate_record_name(name)?;
        self.records.write().remove(name);
        Ok(())
    }
}
