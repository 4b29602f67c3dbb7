//! # Cache Coordinator
//!
//! The single entry point for reading and writing cached resources. Every
//! resource gets one entry holding its metadata and its active write
//! session behind an async lock, so chunk commits, flush decisions, and
//! index updates for a resource never interleave. Reads take a snapshot of
//! the chunk index and then assemble from the store without holding the
//! lock.
//!
//! Range retrieval never fails: anything the store cannot produce is
//! reported as shorter data, down to a plain miss.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{OnceCell, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunks::ChunkStore;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::key::ResourceKey;
use crate::metadata::{AssetMetadata, ChunkRef, ContentInfo, MetadataStore};
use crate::ranges::ByteRange;
use crate::session::{WriteSession, WriteStats};
use crate::store::BlobStore;
use crate::writer::IncrementalWriter;

/// Result of a range retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeOutcome {
    /// The full requested window, assembled from cache.
    Hit(Bytes),
    /// A prefix of the requested window; the remainder is not cached.
    Partial(Bytes),
    /// Nothing cached at the start of the window.
    Miss,
}

impl RangeOutcome {
    /// The assembled bytes, if any.
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Hit(data) | Self::Partial(data) => Some(data),
            Self::Miss => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// Mutable per-resource state behind the entry lock.
#[derive(Default)]
pub(crate) struct ResourceState {
    meta: Option<AssetMetadata>,
    /// True once a load attempt completed, even if it found nothing.
    meta_loaded: bool,
    session: Option<WriteSession>,
}

/// One resource's serialization point.
pub(crate) struct ResourceEntry {
    key: ResourceKey,
    state: RwLock<ResourceState>,
    /// In-flight range reads keyed by window, so identical concurrent
    /// requests share one assembly.
    pending_reads: Mutex<HashMap<(u64, u64), Arc<OnceCell<RangeOutcome>>>>,
}

impl ResourceEntry {
    fn new(key: ResourceKey) -> Self {
        Self {
            key,
            state: RwLock::new(ResourceState::default()),
            pending_reads: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn key(&self) -> &ResourceKey {
        &self.key
    }
}

struct CacheShared {
    chunks: ChunkStore,
    metadata: MetadataStore,
    config: CacheConfig,
    resources: Mutex<HashMap<ResourceKey, Arc<ResourceEntry>>>,
    next_session_id: AtomicU64,
}

/// Handle to the cache engine. Clones are cheap and share all state.
#[derive(Clone)]
pub struct ResourceCache {
    shared: Arc<CacheShared>,
}

impl ResourceCache {
    /// Build a cache over `store` with the given configuration.
    pub fn new(store: Arc<dyn BlobStore>, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(store, config))
    }

    /// Build a cache over `store` with default configuration.
    pub fn with_defaults(store: Arc<dyn BlobStore>) -> Self {
        Self::from_parts(store, CacheConfig::default())
    }

    fn from_parts(store: Arc<dyn BlobStore>, config: CacheConfig) -> Self {
        let chunks = ChunkStore::new(Arc::clone(&store));
        let metadata = MetadataStore::new(store, chunks.clone());
        Self {
            shared: Arc::new(CacheShared {
                chunks,
                metadata,
                config,
                resources: Mutex::new(HashMap::new()),
                next_session_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    fn entry(&self, key: &ResourceKey) -> Arc<ResourceEntry> {
        let mut resources = self.shared.resources.lock();
        Arc::clone(
            resources
                .entry(key.clone())
                .or_insert_with(|| Arc::new(ResourceEntry::new(key.clone()))),
        )
    }

    /// Remove a resource's map slot once nothing is tracked for it,
    /// consuming the caller's handle. Reads of unknown keys would
    /// otherwise each leave a permanent entry behind.
    fn discard_idle_entry(&self, entry: Arc<ResourceEntry>) {
        let mut resources = self.shared.resources.lock();
        // Strong count 2 means the map slot and our handle hold the only
        // references, so the locks below cannot be contended
        let idle = Arc::strong_count(&entry) == 2
            && entry.pending_reads.lock().is_empty()
            && entry
                .state
                .try_read()
                .is_ok_and(|state| state.meta.is_none() && state.session.is_none());
        if idle
            && let Some(current) = resources.get(&entry.key)
            && Arc::ptr_eq(current, &entry)
        {
            resources.remove(&entry.key);
        }
    }

    /// Exclusive access to a resource's state with metadata loaded.
    ///
    /// A failing load surfaces here so a write path never overwrites a
    /// record it could not read.
    async fn state_loaded_mut<'a>(
        &self,
        entry: &'a ResourceEntry,
    ) -> CacheResult<RwLockWriteGuard<'a, ResourceState>> {
        let mut state = entry.state.write().await;
        if !state.meta_loaded {
            state.meta = self.shared.metadata.load(&entry.key).await?;
            state.meta_loaded = true;
        }
        Ok(state)
    }

    /// Shared access to a resource's state with metadata loaded. A failing
    /// load is reported as absent metadata and retried on the next call.
    async fn state_loaded<'a>(
        &self,
        entry: &'a ResourceEntry,
    ) -> RwLockReadGuard<'a, ResourceState> {
        {
            let state = entry.state.read().await;
            if state.meta_loaded {
                return state;
            }
        }

        let mut state = entry.state.write().await;
        if !state.meta_loaded {
            match self.shared.metadata.load(&entry.key).await {
                Ok(meta) => {
                    state.meta = meta;
                    state.meta_loaded = true;
                }
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Metadata load failed, treating as absent");
                }
            }
        }
        state.downgrade()
    }

    /// Content information recorded for a resource, if any.
    pub async fn content_info(&self, key: &ResourceKey) -> Option<ContentInfo> {
        let entry = self.entry(key);
        let state = self.state_loaded(&entry).await;
        let info = state.meta.as_ref().map(AssetMetadata::content_info);
        drop(state);
        self.discard_idle_entry(entry);
        info
    }

    /// Record content information for a resource and persist it.
    pub async fn save_content_info(
        &self,
        key: &ResourceKey,
        info: &ContentInfo,
    ) -> CacheResult<()> {
        let entry = self.entry(key);
        let mut state = self.state_loaded_mut(&entry).await?;

        let meta = state.meta.get_or_insert_with(AssetMetadata::new);
        meta.apply_content_info(info);
        if let Some(meta) = state.meta.as_ref() {
            self.shared.metadata.save(&entry.key, meta).await?;
        }
        debug!(key = %key, "Content info saved");
        Ok(())
    }

    /// Whether `[offset, offset + length)` is fully cached.
    pub async fn is_range_cached(&self, key: &ResourceKey, offset: u64, length: u64) -> bool {
        if length == 0 {
            return true;
        }
        let entry = self.entry(key);
        let state = self.state_loaded(&entry).await;
        let cached = state
            .meta
            .as_ref()
            .is_some_and(|meta| meta.cached_ranges.is_covered(offset, length));
        drop(state);
        self.discard_idle_entry(entry);
        cached
    }

    /// Merged byte ranges currently cached for a resource.
    pub async fn cached_ranges(&self, key: &ResourceKey) -> Vec<ByteRange> {
        let entry = self.entry(key);
        let state = self.state_loaded(&entry).await;
        let ranges = state
            .meta
            .as_ref()
            .map(|meta| meta.cached_ranges.as_slice().to_vec())
            .unwrap_or_default();
        drop(state);
        self.discard_idle_entry(entry);
        ranges
    }

    /// The portions of `[offset, offset + length)` not yet cached, in
    /// ascending order. Useful for planning which ranges to request from
    /// the source.
    pub async fn uncached_ranges(
        &self,
        key: &ResourceKey,
        offset: u64,
        length: u64,
    ) -> Vec<ByteRange> {
        let entry = self.entry(key);
        let state = self.state_loaded(&entry).await;
        let gaps = match state.meta.as_ref() {
            Some(meta) => meta.cached_ranges.gaps(offset, length),
            None if length == 0 => Vec::new(),
            None => vec![ByteRange::new(offset, length)],
        };
        drop(state);
        self.discard_idle_entry(entry);
        gaps
    }

    /// Offsets of the persisted chunk records for a resource, ascending.
    pub async fn chunk_offsets(&self, key: &ResourceKey) -> Vec<u64> {
        let entry = self.entry(key);
        let state = self.state_loaded(&entry).await;
        let offsets = state
            .meta
            .as_ref()
            .map(|meta| meta.chunk_offsets().to_vec())
            .unwrap_or_default();
        drop(state);
        self.discard_idle_entry(entry);
        offsets
    }

    /// Persist one fully-formed chunk at `offset` and index it. Empty
    /// chunks are ignored.
    pub async fn save_chunk(&self, key: &ResourceKey, offset: u64, data: Bytes) -> CacheResult<()> {
        if data.is_empty() {
            debug!(key = %key, offset, "Ignoring empty chunk");
            return Ok(());
        }
        let entry = self.entry(key);
        let mut state = self.state_loaded_mut(&entry).await?;
        self.commit_chunk(&entry, &mut state, offset, data).await
    }

    /// Open an incremental write session at `offset`.
    ///
    /// A resource has at most one active session. Opening a new one
    /// flushes and closes the previous session; its writer handle turns
    /// stale and reports [`CacheError::SessionClosed`] from then on.
    pub async fn begin_write(
        &self,
        key: &ResourceKey,
        offset: u64,
    ) -> CacheResult<IncrementalWriter> {
        let entry = self.entry(key);
        let mut state = self.state_loaded_mut(&entry).await?;

        if state.session.is_some() {
            warn!(key = %key, "Replacing active write session");
            self.flush_session(&entry, &mut state, true).await?;
            state.session = None;
        }

        let id = self.shared.next_session_id.fetch_add(1, Ordering::Relaxed);
        state.session = Some(WriteSession::new(id, offset));
        debug!(key = %key, session = id, offset, "Write session opened");

        drop(state);
        Ok(IncrementalWriter::new(self.clone(), entry, id, offset))
    }

    /// Stream a source body into the cache starting at `offset`.
    ///
    /// Data is appended as it arrives and flushed per the configured
    /// policy. Cancellation keeps what already arrived, flushes it, and
    /// reports the session as incomplete; a failing source does the same
    /// and then surfaces as [`CacheError::Source`].
    pub async fn write_stream<S, E>(
        &self,
        key: &ResourceKey,
        offset: u64,
        mut stream: S,
        cancel: CancellationToken,
    ) -> CacheResult<WriteStats>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::error::Error + Send + Sync + 'static,
    {
        let writer = self.begin_write(key, offset).await?;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(key = %key, "Write stream cancelled");
                    return writer.cancel().await;
                }
                next = stream.next() => match next {
                    Some(Ok(data)) => {
                        if !data.is_empty() {
                            writer.append(data).await?;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(key = %key, error = %e, "Source stream failed");
                        writer.cancel().await?;
                        return Err(CacheError::Source(Box::new(e)));
                    }
                    None => return writer.finish().await,
                },
            }
        }
    }

    /// Retrieve `[offset, offset + length)` from cache.
    ///
    /// Returns [`RangeOutcome::Hit`] with exactly `length` bytes when the
    /// window is fully cached, [`RangeOutcome::Partial`] with the
    /// available prefix when cached data runs out mid-window, and
    /// [`RangeOutcome::Miss`] when nothing is cached at `offset`.
    ///
    /// Concurrent calls for the same window share a single assembly.
    pub async fn retrieve_range(
        &self,
        key: &ResourceKey,
        offset: u64,
        length: u64,
    ) -> RangeOutcome {
        let entry = self.entry(key);
        let window = (offset, length);

        let cell = {
            let mut pending = entry.pending_reads.lock();
            Arc::clone(pending.entry(window).or_default())
        };

        let outcome = cell
            .get_or_init(|| self.assemble_range(&entry, offset, length))
            .await
            .clone();

        // Clear the window so later requests see fresh state, but only if
        // the slot still holds our cell
        let mut pending = entry.pending_reads.lock();
        if let Some(current) = pending.get(&window)
            && Arc::ptr_eq(current, &cell)
        {
            pending.remove(&window);
        }
        drop(pending);

        self.discard_idle_entry(entry);
        outcome
    }

    /// Assemble a window from indexed chunks. Anything the store cannot
    /// produce ends the assembly early; it never fails.
    async fn assemble_range(
        &self,
        entry: &ResourceEntry,
        offset: u64,
        length: u64,
    ) -> RangeOutcome {
        let Some(end) = offset.checked_add(length) else {
            warn!(key = %entry.key, offset, length, "Requested window overflows, treating as miss");
            return RangeOutcome::Miss;
        };
        if length == 0 {
            return RangeOutcome::Hit(Bytes::new());
        }

        let refs: Vec<ChunkRef> = {
            let state = self.state_loaded(entry).await;
            match state.meta.as_ref() {
                Some(meta) => meta.chunk_refs().collect(),
                None => return RangeOutcome::Miss,
            }
        };

        let mut assembled = BytesMut::new();
        let mut cursor = offset;

        for chunk in refs {
            // Already covered by an earlier, longer chunk
            if let Some(len) = chunk.length
                && chunk.offset.saturating_add(len) <= cursor
            {
                continue;
            }
            if chunk.offset >= end {
                break;
            }
            if chunk.offset > cursor {
                // Gap in cached data
                break;
            }

            let Some(blob) = self.shared.chunks.get(&entry.key, chunk.offset).await else {
                warn!(
                    key = %entry.key,
                    offset = chunk.offset,
                    "Indexed chunk missing from store, stopping assembly"
                );
                break;
            };
            let blob_len = blob.len() as u64;
            if let Some(len) = chunk.length
                && len != blob_len
            {
                warn!(
                    key = %entry.key,
                    offset = chunk.offset,
                    expected = len,
                    actual = blob_len,
                    "Chunk size does not match the index, stopping assembly"
                );
                break;
            }

            let chunk_end = chunk.offset.saturating_add(blob_len);
            if chunk_end <= cursor {
                continue;
            }

            let from = (cursor - chunk.offset) as usize;
            let to = (chunk_end.min(end) - chunk.offset) as usize;
            assembled.extend_from_slice(&blob[from..to]);
            cursor = chunk_end.min(end);
            if cursor >= end {
                break;
            }
        }

        if cursor >= end {
            debug!(key = %entry.key, offset, length, "Range fully served from cache");
            return RangeOutcome::Hit(assembled.freeze());
        }
        if !assembled.is_empty() {
            debug!(
                key = %entry.key,
                offset,
                length,
                available = assembled.len(),
                "Range partially served from cache"
            );
            return RangeOutcome::Partial(assembled.freeze());
        }
        RangeOutcome::Miss
    }

    /// Persist `data` as the chunk at `offset` and merge it into the
    /// index. The blob goes first so a crash in between leaves an orphan
    /// chunk, never an index entry pointing at nothing.
    async fn commit_chunk(
        &self,
        entry: &ResourceEntry,
        state: &mut ResourceState,
        offset: u64,
        data: Bytes,
    ) -> CacheResult<()> {
        let len = data.len() as u64;
        self.shared.chunks.put(&entry.key, offset, data).await?;

        state
            .meta
            .get_or_insert_with(AssetMetadata::new)
            .register_chunk(offset, len);
        if let Some(meta) = state.meta.as_ref() {
            self.shared.metadata.save(&entry.key, meta).await?;
        }
        debug!(key = %entry.key, offset, len, "Chunk committed");
        Ok(())
    }

    /// Flush the session's unflushed suffix as one chunk. With `force`
    /// false the configured policy applies. Returns the bytes persisted by
    /// this call; the flush cursor only advances after the chunk and its
    /// index entry are committed.
    async fn flush_session(
        &self,
        entry: &ResourceEntry,
        state: &mut ResourceState,
        force: bool,
    ) -> CacheResult<u64> {
        let (offset, data) = {
            let Some(session) = state.session.as_mut() else {
                return Err(CacheError::SessionClosed);
            };
            let unflushed = session.unflushed_len();
            if unflushed == 0 {
                return Ok(0);
            }
            let config = &self.shared.config;
            if !force && (!config.incremental_flush || unflushed < config.flush_threshold) {
                return Ok(0);
            }
            (
                session.flush_offset(),
                Bytes::copy_from_slice(session.unflushed()),
            )
        };

        let len = data.len() as u64;
        self.commit_chunk(entry, state, offset, data).await?;
        if let Some(session) = state.session.as_mut() {
            session.mark_flushed();
        }
        debug!(key = %entry.key, offset, len, "Session buffer flushed");
        Ok(len)
    }

    pub(crate) async fn session_append(
        &self,
        entry: &Arc<ResourceEntry>,
        id: u64,
        data: Bytes,
    ) -> CacheResult<()> {
        let mut state = self.state_loaded_mut(entry).await?;
        let Some(session) = state.session.as_mut().filter(|s| s.id() == id) else {
            return Err(CacheError::SessionClosed);
        };
        session.append(&data);

        let config = &self.shared.config;
        if config.incremental_flush && session.unflushed_len() >= config.flush_threshold {
            self.flush_session(entry, &mut state, false).await?;
        }
        Ok(())
    }

    pub(crate) async fn session_flush(
        &self,
        entry: &Arc<ResourceEntry>,
        id: u64,
        force: bool,
    ) -> CacheResult<u64> {
        let mut state = self.state_loaded_mut(entry).await?;
        if state.session.as_ref().is_none_or(|s| s.id() != id) {
            return Err(CacheError::SessionClosed);
        }
        self.flush_session(entry, &mut state, force).await
    }

    pub(crate) async fn session_end(
        &self,
        entry: &Arc<ResourceEntry>,
        id: u64,
        completed: bool,
    ) -> CacheResult<WriteStats> {
        let mut state = self.state_loaded_mut(entry).await?;
        if state.session.as_ref().is_none_or(|s| s.id() != id) {
            return Err(CacheError::SessionClosed);
        }
        self.flush_session(entry, &mut state, true).await?;

        let Some(session) = state.session.take() else {
            return Err(CacheError::SessionClosed);
        };
        let stats = session.stats(completed);
        if completed {
            debug!(
                key = %entry.key,
                session = id,
                appended = stats.appended,
                flushes = stats.flushes,
                "Write session finished"
            );
        } else {
            info!(
                key = %entry.key,
                session = id,
                appended = stats.appended,
                persisted = stats.persisted,
                "Write session closed incomplete"
            );
        }
        Ok(stats)
    }
}
