//! # Record Stores
//!
//! Persistence backends for metadata and chunk records. The engine only
//! talks to the `BlobStore` trait, so tests and embedders can substitute
//! their own backend without touching cache logic.

mod file;
mod memory;
mod provider;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use provider::BlobStore;

use crate::error::{CacheError, CacheResult};

/// Reject record names that could escape a store's namespace.
pub(crate) fn validate_record_name(name: &str) -> CacheResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(CacheError::InvalidRecordName(name.to_string()));
    }
    Ok(())
}
