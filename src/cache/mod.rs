//! Block cache.
//!
//! [`BlockCache`] keeps two [`alloc::collections::BTreeMap`] indices over the
//! same slot storage: one keyed by logical block address for lookups, one
//! keyed by LRU sequence number for eviction. Pinned (`refctr > 0`) and dirty
//! buffers are excluded from the LRU index, so eviction only ever touches a
//! block nobody holds and nothing needs to write back.
//!
//! [`CacheBuffer`] is the per-block unit: data, reference count, LRU id, and
//! [`CacheFlags`] (uptodate / dirty / flush-pending / tmp).
//!
//! The cache never performs I/O on its own — `alloc`/`free`/`lookup`/
//! `mark_dirty` are pure bookkeeping, and only the `flush_*` methods take a
//! `&mut dyn BlockDevice` and actually write. [`crate::block::BlockDev`] is
//! the layer that decides when to call them.

mod buffer;
mod block_cache;

pub use buffer::{BufferId, CacheBuffer, CacheFlags, EndWriteCallback};
pub use block_cache::{BlockCache, CacheStats, DEFAULT_CACHE_SIZE};
