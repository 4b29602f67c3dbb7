//! # Asset Metadata
//!
//! Per-resource bookkeeping: content information reported by the source,
//! the merged set of cached ranges, and the explicit list of chunk offsets.
//! One JSON record per resource, stored under the bare resource key right
//! next to the chunk records it indexes.
//!
//! Loading tolerates damage. A record that fails to parse is discarded
//! (the chunks it pointed at are re-fetchable), missing fields fall back to
//! defaults, and a record still holding a raw payload from the old
//! single-blob cache is migrated into the chunked layout on first read.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunks::ChunkStore;
use crate::error::CacheResult;
use crate::key::ResourceKey;
use crate::ranges::RangeSet;
use crate::store::BlobStore;

/// Current metadata record format version.
pub const METADATA_VERSION: u32 = 1;

/// Content information reported by the source for a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentInfo {
    /// Total size of the resource in bytes, when the source reports one.
    pub content_length: Option<u64>,
    /// MIME type of the resource.
    pub content_type: Option<String>,
    /// Whether the source honors byte-range requests.
    pub accepts_byte_ranges: bool,
}

/// A chunk's indexed position and recorded size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRef {
    pub offset: u64,
    /// Recorded blob length. `None` only when reading a record written
    /// without lengths; such chunks are trusted at their stored size.
    pub length: Option<u64>,
}

/// Persisted per-resource metadata record.
///
/// The chunk index is kept as two parallel arrays so external tools that
/// only understand `chunk_offsets` keep working; `chunk_lengths` is what
/// lets retrieval detect a blob that shrank or grew behind the engine's
/// back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// Record format version.
    #[serde(default)]
    pub version: u32,
    /// Total size of the resource, if known.
    #[serde(default)]
    pub content_length: Option<u64>,
    /// MIME type reported by the source.
    #[serde(default)]
    pub content_type: Option<String>,
    /// Whether the source honors byte-range requests.
    #[serde(default)]
    pub accepts_byte_ranges: bool,
    /// Merged byte ranges present in the cache.
    #[serde(default)]
    pub cached_ranges: RangeSet,
    /// Offsets of persisted chunk records, ascending, no duplicates.
    #[serde(default)]
    chunk_offsets: Vec<u64>,
    /// Blob length for each entry of `chunk_offsets`; zero means unknown.
    #[serde(default)]
    chunk_lengths: Vec<u64>,
}

impl AssetMetadata {
    /// Fresh metadata with no content information yet.
    pub fn new() -> Self {
        Self {
            version: METADATA_VERSION,
            ..Default::default()
        }
    }

    /// Fresh metadata seeded from content information.
    pub fn from_content_info(info: &ContentInfo) -> Self {
        let mut meta = Self::new();
        meta.apply_content_info(info);
        meta
    }

    /// Merge content information into the record.
    pub fn apply_content_info(&mut self, info: &ContentInfo) {
        self.content_length = info.content_length;
        self.content_type = info.content_type.clone();
        self.accepts_byte_ranges = info.accepts_byte_ranges;
    }

    /// The record's content information.
    pub fn content_info(&self) -> ContentInfo {
        ContentInfo {
            content_length: self.content_length,
            content_type: self.content_type.clone(),
            accepts_byte_ranges: self.accepts_byte_ranges,
        }
    }

    /// Index a committed chunk: merge its range and record its offset and
    /// length. Re-committing an existing offset replaces the recorded
    /// length.
    pub fn register_chunk(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        self.cached_ranges.insert(offset, length);
        match self.chunk_offsets.binary_search(&offset) {
            Ok(idx) => self.chunk_lengths[idx] = length,
            Err(idx) => {
                self.chunk_offsets.insert(idx, offset);
                self.chunk_lengths.insert(idx, length);
            }
        }
    }

    /// Offsets of the persisted chunk records, ascending.
    pub fn chunk_offsets(&self) -> &[u64] {
        &self.chunk_offsets
    }

    /// Chunk index entries, ascending by offset.
    pub fn chunk_refs(&self) -> impl Iterator<Item = ChunkRef> + '_ {
        self.chunk_offsets
            .iter()
            .zip(&self.chunk_lengths)
            .map(|(&offset, &length)| ChunkRef {
                offset,
                length: (length > 0).then_some(length),
            })
    }

    /// Repair a deserialized record so the in-memory invariants hold:
    /// ranges canonical, offsets sorted and unique, the length array
    /// parallel to the offsets (unknown lengths become zero).
    fn normalize(&mut self) {
        self.cached_ranges.canonicalize();

        let lengths_valid = self.chunk_lengths.len() == self.chunk_offsets.len();
        if !lengths_valid && !self.chunk_offsets.is_empty() {
            warn!(
                offsets = self.chunk_offsets.len(),
                lengths = self.chunk_lengths.len(),
                "Chunk length list out of step with offsets, lengths reset to unknown"
            );
        }

        let mut pairs: Vec<(u64, u64)> = self
            .chunk_offsets
            .iter()
            .enumerate()
            .map(|(i, &offset)| {
                let length = if lengths_valid { self.chunk_lengths[i] } else { 0 };
                (offset, length)
            })
            .collect();
        pairs.sort_by_key(|&(offset, _)| offset);
        pairs.dedup_by_key(|pair| pair.0);

        self.chunk_offsets = pairs.iter().map(|&(offset, _)| offset).collect();
        self.chunk_lengths = pairs.iter().map(|&(_, length)| length).collect();
    }
}

/// Store for per-resource metadata records.
///
/// Holds a chunk store too, because migrating a legacy record means moving
/// its payload into a chunk record.
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn BlobStore>,
    chunks: ChunkStore,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn BlobStore>, chunks: ChunkStore) -> Self {
        Self { store, chunks }
    }

    /// Persist a metadata record under the bare resource key.
    pub async fn save(&self, key: &ResourceKey, meta: &AssetMetadata) -> CacheResult<()> {
        let encoded = serde_json::to_vec(meta)?;
        self.store.put(key.as_str(), Bytes::from(encoded)).await
    }

    /// Load the metadata record for a resource.
    ///
    /// A record that fails to parse is dropped with a warning and reported
    /// as absent, and a record still in the legacy single-blob shape is
    /// migrated to the chunked layout first. A store that cannot be read at
    /// all surfaces as an error instead, so callers can tell a missing
    /// record from an unreachable one.
    pub async fn load(&self, key: &ResourceKey) -> CacheResult<Option<AssetMetadata>> {
        let Some(raw) = self.store.get(key.as_str()).await? else {
            return Ok(None);
        };

        if looks_like_metadata(&raw) {
            return match serde_json::from_slice::<AssetMetadata>(&raw) {
                Ok(mut meta) => {
                    meta.normalize();
                    Ok(Some(meta))
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to parse metadata record, discarding it");
                    // Chunks the record pointed at stay behind as orphans;
                    // whatever re-downloads the resource re-indexes them.
                    let _ = self.store.remove(key.as_str()).await;
                    Ok(None)
                }
            };
        }

        self.migrate_legacy(key, raw).await.map(Some)
    }

    /// Rewrite a legacy whole-payload record into the chunked layout: the
    /// payload becomes the chunk at offset 0 and the key record becomes
    /// metadata covering `[0, len)`.
    ///
    /// The chunk is persisted before the key record is rewritten. If the
    /// process dies in between, the legacy record is still in place and the
    /// migration simply runs again.
    async fn migrate_legacy(
        &self,
        key: &ResourceKey,
        payload: Bytes,
    ) -> CacheResult<AssetMetadata> {
        let len = payload.len() as u64;
        info!(key = %key, len, "Migrating legacy single-blob cache record");

        self.chunks.put(key, 0, payload).await?;

        let mut meta = AssetMetadata::new();
        meta.content_length = Some(len);
        meta.register_chunk(0, len);
        self.save(key, &meta).await?;

        Ok(meta)
    }
}

/// Heuristic separating metadata records from legacy payload blobs:
/// metadata is a JSON object, media payloads do not start with `{`.
fn looks_like_metadata(raw: &[u8]) -> bool {
    raw.iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::chunk_record_name;
    use crate::error::CacheError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn key() -> ResourceKey {
        ResourceKey::new("res1")
    }

    fn meta_store() -> (Arc<MemoryStore>, MetadataStore) {
        let store = Arc::new(MemoryStore::new());
        let blob: Arc<dyn BlobStore> = store.clone();
        let meta = MetadataStore::new(blob.clone(), ChunkStore::new(blob));
        (store, meta)
    }

    #[test]
    fn test_register_chunk_merges_and_indexes() {
        let mut meta = AssetMetadata::new();
        meta.register_chunk(0, 100);
        meta.register_chunk(100, 50);

        let ranges: Vec<_> = meta
            .cached_ranges
            .iter()
            .map(|r| (r.offset, r.length))
            .collect();
        assert_eq!(ranges, vec![(0, 150)]);
        assert_eq!(meta.chunk_offsets(), &[0, 100]);
    }

    #[test]
    fn test_register_chunk_out_of_order_stays_sorted() {
        let mut meta = AssetMetadata::new();
        meta.register_chunk(512_000, 88_000);
        meta.register_chunk(0, 512_000);

        assert_eq!(meta.chunk_offsets(), &[0, 512_000]);
        let refs: Vec<_> = meta.chunk_refs().collect();
        assert_eq!(refs[0].length, Some(512_000));
        assert_eq!(refs[1].length, Some(88_000));
    }

    #[test]
    fn test_register_chunk_same_offset_replaces_length() {
        let mut meta = AssetMetadata::new();
        meta.register_chunk(0, 100);
        meta.register_chunk(0, 200);

        assert_eq!(meta.chunk_offsets(), &[0]);
        assert_eq!(meta.chunk_refs().next().unwrap().length, Some(200));
    }

    #[test]
    fn test_register_chunk_zero_length_ignored() {
        let mut meta = AssetMetadata::new();
        meta.register_chunk(0, 0);
        assert!(meta.chunk_offsets().is_empty());
        assert!(meta.cached_ranges.is_empty());
    }

    #[test]
    fn test_content_info_roundtrip() {
        let info = ContentInfo {
            content_length: Some(76_737),
            content_type: Some("video/mp4".to_string()),
            accepts_byte_ranges: true,
        };
        let meta = AssetMetadata::from_content_info(&info);
        assert_eq!(meta.version, METADATA_VERSION);
        assert_eq!(meta.content_info(), info);
    }

    #[test]
    fn test_serde_tolerates_missing_fields() {
        let meta: AssetMetadata = serde_json::from_str(r#"{"version":1}"#).unwrap();
        assert_eq!(meta.content_length, None);
        assert!(meta.cached_ranges.is_empty());
        assert!(meta.chunk_offsets().is_empty());
    }

    #[test]
    fn test_serde_tolerates_unknown_fields() {
        let meta: AssetMetadata =
            serde_json::from_str(r#"{"version":7,"some_future_field":[1,2,3]}"#).unwrap();
        assert_eq!(meta.version, 7);
    }

    #[test]
    fn test_normalize_repairs_length_mismatch() {
        let mut meta: AssetMetadata = serde_json::from_str(
            r#"{"version":1,"chunk_offsets":[100,0],"chunk_lengths":[5]}"#,
        )
        .unwrap();
        meta.normalize();

        assert_eq!(meta.chunk_offsets(), &[0, 100]);
        let refs: Vec<_> = meta.chunk_refs().collect();
        assert_eq!(refs[0].length, None);
        assert_eq!(refs[1].length, None);
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let (_store, metadata) = meta_store();
        let mut meta = AssetMetadata::from_content_info(&ContentInfo {
            content_length: Some(1000),
            content_type: Some("audio/mpeg".to_string()),
            accepts_byte_ranges: true,
        });
        meta.register_chunk(0, 600);

        metadata.save(&key(), &meta).await.unwrap();
        let loaded = metadata.load(&key()).await.unwrap().unwrap();
        assert_eq!(loaded, meta);
    }

    #[tokio::test]
    async fn test_load_absent_is_none() {
        let (_store, metadata) = meta_store();
        assert!(metadata.load(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_discarded() {
        let (store, metadata) = meta_store();
        store
            .put(key().as_str(), Bytes::from_static(b"{not valid json"))
            .await
            .unwrap();

        assert!(metadata.load(&key()).await.unwrap().is_none());
        // The damaged record is gone, not left to fail every load
        assert!(!store.contains(key().as_str()).await.unwrap());
    }

    struct FailingStore;

    #[async_trait]
    impl BlobStore for FailingStore {
        async fn contains(&self, _name: &str) -> CacheResult<bool> {
            Err(std::io::Error::other("disk on fire").into())
        }
        async fn get(&self, _name: &str) -> CacheResult<Option<Bytes>> {
            Err(std::io::Error::other("disk on fire").into())
        }
        async fn put(&self, _name: &str, _data: Bytes) -> CacheResult<()> {
            Err(std::io::Error::other("disk on fire").into())
        }
        async fn remove(&self, _name: &str) -> CacheResult<()> {
            Err(std::io::Error::other("disk on fire").into())
        }
    }

    #[tokio::test]
    async fn test_unreadable_store_fails_the_load() {
        let blob: Arc<dyn BlobStore> = Arc::new(FailingStore);
        let metadata = MetadataStore::new(blob.clone(), ChunkStore::new(blob));

        // Unreachable storage is an error, not a missing record, so a
        // caller about to write cannot mistake an unread record for none.
        let result = metadata.load(&key()).await;
        assert!(matches!(result, Err(CacheError::Io(_))));
    }

    #[tokio::test]
    async fn test_legacy_blob_migrated_on_first_load() {
        let (store, metadata) = meta_store();
        let payload = Bytes::from(vec![0xAAu8; 76_737]);
        store.put(key().as_str(), payload.clone()).await.unwrap();

        let meta = metadata.load(&key()).await.unwrap().unwrap();

        let ranges: Vec<_> = meta
            .cached_ranges
            .iter()
            .map(|r| (r.offset, r.length))
            .collect();
        assert_eq!(ranges, vec![(0, 76_737)]);
        assert_eq!(meta.chunk_offsets(), &[0]);
        assert_eq!(meta.content_length, Some(76_737));

        // Payload moved under the chunk record name
        assert_eq!(
            store.get(&chunk_record_name(&key(), 0)).await.unwrap(),
            Some(payload)
        );
        // The key record now parses as metadata, so a second load does not
        // migrate again
        let again = metadata.load(&key()).await.unwrap().unwrap();
        assert_eq!(again, meta);
    }

    #[tokio::test]
    async fn test_legacy_detection_ignores_leading_whitespace() {
        let (store, metadata) = meta_store();
        store
            .put(key().as_str(), Bytes::from_static(b"  \n{\"version\":1}"))
            .await
            .unwrap();

        let meta = metadata.load(&key()).await.unwrap().unwrap();
        assert_eq!(meta.version, 1);
        assert!(!store.contains(&chunk_record_name(&key(), 0)).await.unwrap());
    }
}
