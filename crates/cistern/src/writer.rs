//! # Incremental Writer
//!
//! Public handle for one write session. All mutation goes back through the
//! cache coordinator, so a writer is just the session id plus the resource
//! entry it belongs to. Opening a new session for the same resource leaves
//! old handles stale; their calls fail with
//! [`SessionClosed`](crate::error::CacheError::SessionClosed).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::coordinator::{ResourceCache, ResourceEntry};
use crate::error::CacheResult;
use crate::session::WriteStats;

/// Handle to an in-progress incremental write.
///
/// Obtained from [`ResourceCache::begin_write`]. Dropping a writer without
/// calling [`finish`](Self::finish) or [`cancel`](Self::cancel) flushes the
/// session on a best-effort basis and marks it incomplete.
pub struct IncrementalWriter {
    cache: ResourceCache,
    entry: Arc<ResourceEntry>,
    id: u64,
    start_offset: u64,
    closed: AtomicBool,
}

impl IncrementalWriter {
    pub(crate) fn new(
        cache: ResourceCache,
        entry: Arc<ResourceEntry>,
        id: u64,
        start_offset: u64,
    ) -> Self {
        Self {
            cache,
            entry,
            id,
            start_offset,
            closed: AtomicBool::new(false),
        }
    }

    /// Resource offset where this session started writing.
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    /// Append bytes to the session buffer.
    ///
    /// When incremental flushing is enabled and the unflushed suffix has
    /// reached the configured threshold, the suffix is persisted as one
    /// chunk before this returns.
    pub async fn append(&self, data: Bytes) -> CacheResult<()> {
        self.cache.session_append(&self.entry, self.id, data).await
    }

    /// Persist the unflushed suffix now. With `force` false the configured
    /// flush policy still applies. Returns the bytes persisted by this
    /// call.
    pub async fn flush(&self, force: bool) -> CacheResult<u64> {
        self.cache.session_flush(&self.entry, self.id, force).await
    }

    /// Flush the remainder and close the session as complete.
    pub async fn finish(self) -> CacheResult<WriteStats> {
        self.closed.store(true, Ordering::Release);
        self.cache.session_end(&self.entry, self.id, true).await
    }

    /// Flush whatever has arrived and close the session as incomplete.
    ///
    /// Cancelled data stays cached; the ranges it covered remain
    /// retrievable.
    pub async fn cancel(self) -> CacheResult<WriteStats> {
        self.closed.store(true, Ordering::Release);
        self.cache.session_end(&self.entry, self.id, false).await
    }
}

impl Drop for IncrementalWriter {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        warn!(
            key = %self.entry.key(),
            session = self.id,
            "Writer dropped without finish or cancel"
        );
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cache = self.cache.clone();
        let entry = Arc::clone(&self.entry);
        let id = self.id;
        handle.spawn(async move {
            match cache.session_end(&entry, id, false).await {
                Ok(stats) => debug!(
                    key = %entry.key(),
                    session = id,
                    persisted = stats.persisted,
                    "Flushed abandoned write session"
                ),
                Err(e) => debug!(
                    key = %entry.key(),
                    session = id,
                    error = %e,
                    "Abandoned write session had nothing to recover"
                ),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::CacheError;
    use crate::key::ResourceKey;
    use crate::store::MemoryStore;

    fn cache() -> ResourceCache {
        ResourceCache::with_defaults(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_stale_handle_after_replacement() {
        let cache = cache();
        let key = ResourceKey::new("res1");

        let first = cache.begin_write(&key, 0).await.unwrap();
        first.append(Bytes::from(vec![1u8; 500])).await.unwrap();

        // Opening a second session flushes and closes the first
        let second = cache.begin_write(&key, 500).await.unwrap();

        assert!(matches!(
            first.append(Bytes::from_static(b"late")).await,
            Err(CacheError::SessionClosed)
        ));
        assert!(matches!(first.flush(true).await, Err(CacheError::SessionClosed)));
        assert!(matches!(first.finish().await, Err(CacheError::SessionClosed)));

        // The first session's buffer was persisted by the replacement
        let outcome = cache.retrieve_range(&key, 0, 500).await;
        assert_eq!(outcome.bytes().map(|b| b.len()), Some(500));

        second.append(Bytes::from(vec![2u8; 100])).await.unwrap();
        let stats = second.finish().await.unwrap();
        assert!(stats.completed);

        let ranges: Vec<_> = cache
            .cached_ranges(&key)
            .await
            .iter()
            .map(|r| (r.offset, r.length))
            .collect();
        assert_eq!(ranges, vec![(0, 600)]);
    }

    #[tokio::test]
    async fn test_concurrent_force_flush_persists_once() {
        let cache = cache();
        let key = ResourceKey::new("res1");

        let writer = Arc::new(cache.begin_write(&key, 0).await.unwrap());
        writer.append(Bytes::from(vec![7u8; 10_000])).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let writer = Arc::clone(&writer);
            tasks.push(tokio::spawn(async move { writer.flush(true).await.unwrap() }));
        }
        let mut persisted = 0;
        for task in tasks {
            persisted += task.await.unwrap();
        }
        // One task flushed the whole suffix, the rest found nothing left
        assert_eq!(persisted, 10_000);

        let writer = Arc::into_inner(writer).unwrap();
        let stats = writer.finish().await.unwrap();
        assert_eq!(stats.persisted, 10_000);
        assert_eq!(stats.flushes, 1);
    }

    #[tokio::test]
    async fn test_cancel_flushes_remainder() {
        let cache = cache();
        let key = ResourceKey::new("res1");

        let writer = cache.begin_write(&key, 0).await.unwrap();
        writer.append(Bytes::from(vec![3u8; 300])).await.unwrap();
        let stats = writer.cancel().await.unwrap();

        assert_eq!(stats.appended, 300);
        assert_eq!(stats.persisted, 300);
        assert_eq!(stats.flushes, 1);
        assert!(!stats.completed);

        assert!(cache.retrieve_range(&key, 0, 300).await.is_hit());
    }

    #[tokio::test]
    async fn test_dropped_writer_recovers_buffer() {
        let cache = cache();
        let key = ResourceKey::new("res1");

        {
            let writer = cache.begin_write(&key, 0).await.unwrap();
            writer.append(Bytes::from(vec![9u8; 200])).await.unwrap();
        }
        // Cleanup runs on a spawned task
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(cache.retrieve_range(&key, 0, 200).await.is_hit());
    }

    #[tokio::test]
    async fn test_small_threshold_rejected_before_write() {
        let config = CacheConfig {
            incremental_flush: true,
            flush_threshold: 1024,
        };
        let result = ResourceCache::new(Arc::new(MemoryStore::new()), config);
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
