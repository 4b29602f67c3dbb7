//! # Builder for CacheConfig
//!
//! This module provides a builder pattern implementation for creating and
//! customizing CacheConfig instances with a fluent API.
//!
//! # Example
//!
//! ```
//! use cistern_engine::CacheConfig;
//!
//! let config = CacheConfig::builder()
//!     .with_flush_threshold(1024 * 1024)
//!     .with_incremental_flush(true)
//!     .build();
//! ```

use crate::config::CacheConfig;

/// Builder for creating CacheConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct CacheConfigBuilder {
    /// Internal config being built
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    /// Enable or disable incremental flushing of in-flight write sessions
    pub fn with_incremental_flush(mut self, enabled: bool) -> Self {
        self.config.incremental_flush = enabled;
        self
    }

    /// Set the unflushed-byte threshold that triggers a streaming flush
    pub fn with_flush_threshold(mut self, threshold: u64) -> Self {
        self.config.flush_threshold = threshold;
        self
    }

    /// Build the CacheConfig instance
    pub fn build(self) -> CacheConfig {
        self.config
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
