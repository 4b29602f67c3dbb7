use crate::error::{CacheError, CacheResult};

/// Unflushed bytes a write session accumulates before a streaming flush.
pub const DEFAULT_FLUSH_THRESHOLD: u64 = 512 * 1024;

/// Smallest accepted flush threshold. Anything lower would persist a chunk
/// record every few packets and grind the store with tiny writes.
pub const MIN_FLUSH_THRESHOLD: u64 = 256 * 1024;

/// Configurable options for the cache engine
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether write sessions flush incrementally while data streams in.
    /// When disabled, a session persists its buffer only on finish or
    /// cancel.
    pub incremental_flush: bool,

    /// Unflushed-byte threshold that triggers a streaming flush.
    pub flush_threshold: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            incremental_flush: true,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> crate::builder::CacheConfigBuilder {
        crate::builder::CacheConfigBuilder::new()
    }

    pub(crate) fn validate(&self) -> CacheResult<()> {
        if self.flush_threshold < MIN_FLUSH_THRESHOLD {
            return Err(CacheError::Config(format!(
                "flush threshold {} is below the minimum of {MIN_FLUSH_THRESHOLD} bytes",
                self.flush_threshold
            )));
        }
        Ok(())
    }
}
