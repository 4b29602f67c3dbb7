//! # Chunk Store
//!
//! Chunk records are the persisted payload pieces of a resource, one blob
//! per flushed range, addressed by `(resource key, absolute offset)`. This
//! is a thin naming layer over a `BlobStore`; which offsets exist for a
//! resource is tracked explicitly in its metadata record, never inferred
//! from the record namespace or a stride.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::CacheResult;
use crate::key::ResourceKey;
use crate::store::BlobStore;

/// Record name for the chunk of `key` starting at `offset`.
///
/// This layout is load-bearing: the legacy migration and any external tool
/// reading the store directly address chunk records by exactly this name.
pub fn chunk_record_name(key: &ResourceKey, offset: u64) -> String {
    format!("{key}_chunk_{offset}")
}

/// Blob facade for chunk records.
#[derive(Clone)]
pub struct ChunkStore {
    store: Arc<dyn BlobStore>,
}

impl ChunkStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Persist one chunk blob.
    ///
    /// The caller indexes the offset in the resource's metadata only after
    /// this returns, so a failure here never leaves a dangling index entry.
    pub async fn put(&self, key: &ResourceKey, offset: u64, data: Bytes) -> CacheResult<()> {
        let name = chunk_record_name(key, offset);
        let len = data.len();
        self.store.put(&name, data).await?;
        debug!(key = %key, offset, len, "Persisted chunk record");
        Ok(())
    }

    /// Read one chunk blob. Absent and unreadable records both come back as
    /// `None`; a read problem on one chunk degrades the lookup rather than
    /// failing it.
    pub async fn get(&self, key: &ResourceKey, offset: u64) -> Option<Bytes> {
        let name = chunk_record_name(key, offset);
        match self.store.get(&name).await {
            Ok(data) => data,
            Err(e) => {
                warn!(key = %key, offset, error = %e, "Failed to read chunk record");
                None
            }
        }
    }
}
