//! # Cistern
//!
//! A progressive, range-addressable cache engine for large media payloads.
//! Resources are stored as chunk blobs keyed by byte offset plus one
//! metadata record tracking which byte ranges are present, so playback can
//! read back whatever prefix exists while a download is still in flight.
//!
//! ## Features
//!
//! - **Range tracking**: cached spans are kept as a sorted, merged set of
//!   byte ranges; adjacent and overlapping writes coalesce
//! - **Incremental writes**: streamed data is buffered per session and
//!   flushed as chunks once a configurable threshold accumulates
//! - **Partial retrieval**: a range request reports a full hit, the
//!   available prefix, or a miss; damaged or missing blobs shorten the
//!   answer instead of failing it
//! - **Corruption tolerance**: damaged metadata records are discarded
//!   and rebuilt, and records from the old whole-payload layout are
//!   migrated on first read
//! - **Pluggable storage**: chunk and metadata records go through the
//!   [`BlobStore`] trait, with filesystem and in-memory stores included
//!
//! ## Getting Started
//!
//! ```no_run
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use cistern_engine::{FileStore, ResourceCache, ResourceKey};
//!
//! # async fn example() -> cistern_engine::CacheResult<()> {
//! let cache = ResourceCache::with_defaults(Arc::new(FileStore::new("/tmp/media-cache")));
//! let key = ResourceKey::new("track-42");
//!
//! let writer = cache.begin_write(&key, 0).await?;
//! writer.append(Bytes::from_static(b"payload")).await?;
//! writer.finish().await?;
//!
//! let outcome = cache.retrieve_range(&key, 0, 7).await;
//! assert!(outcome.is_hit());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod chunks;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod key;
pub mod metadata;
pub mod ranges;
pub mod session;
pub mod store;
pub mod util;
pub mod writer;

pub use builder::CacheConfigBuilder;
pub use chunks::{ChunkStore, chunk_record_name};
pub use config::{CacheConfig, DEFAULT_FLUSH_THRESHOLD, MIN_FLUSH_THRESHOLD};
pub use coordinator::{RangeOutcome, ResourceCache};
pub use error::{CacheError, CacheResult};
pub use key::ResourceKey;
pub use metadata::{AssetMetadata, ChunkRef, ContentInfo, MetadataStore};
pub use ranges::{ByteRange, RangeSet};
pub use session::WriteStats;
pub use store::{BlobStore, FileStore, MemoryStore};
pub use util::{content_info_from_headers, content_info_from_response};
pub use writer::IncrementalWriter;
