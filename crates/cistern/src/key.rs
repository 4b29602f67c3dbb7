//! # Resource Keys
//!
//! Stable identifiers for cached resources. A key appears verbatim in
//! persisted record names (the metadata record lives under the bare key,
//! chunk records under `{key}_chunk_{offset}`), so the same source must map
//! to the same key across process restarts for cached data to be found
//! again.

use sha2::{Digest, Sha256};
use url::Url;

/// Identifier for a cached resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Create a key from a caller-chosen identifier.
    ///
    /// The identifier is used as-is in record names, so it should be a
    /// simple token; stores reject names containing path separators.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive a key from a source URL.
    pub fn for_url(url: &Url) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(url.as_str());
        let hash = hasher.finalize();
        Self(hex::encode(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
