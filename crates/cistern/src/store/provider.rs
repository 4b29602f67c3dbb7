//! # Blob Store Provider
//!
//! This module defines the record store trait that all persistence backends
//! must follow.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CacheResult;

/// A flat store of named byte records.
///
/// Record names form one namespace per store. The engine composes them from
/// resource keys (metadata under the bare key, chunks under
/// `{key}_chunk_{offset}`), and implementations must reject names that could
/// escape the namespace.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check whether a record exists
    async fn contains(&self, name: &str) -> CacheResult<bool>;

    /// Read a record. An absent record yields `Ok(None)`
    async fn get(&self, name: &str) -> CacheResult<Option<Bytes>>;

    /// Write a record, replacing any previous contents
    async fn put(&self, name: &str, data: Bytes) -> CacheResult<()>;

    /// Remove a record. Removing an absent record is not an error
    async fn remove(&self, name: &str) -> CacheResult<()>;
}
