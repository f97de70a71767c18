//! Tile cache for decoded tiles.
//!
//! This module provides a size-bounded LRU cache of decoded pixel buffers,
//! shared by every level of a slide and optionally by several slides.
//!
//! # Cache Key
//!
//! Tiles are cached by a composite key including:
//! - Slide identifier (unique per open slide)
//! - Pyramid level index
//! - Tile identity within the level
//!
//! # Reference Counting
//!
//! [`TileCache::get`] and [`TileCache::put`] hand out [`CachedTile`] handles.
//! While a handle is alive its entry is never evicted. If the entry leaves the
//! cache anyway (replaced by a newer `put`, or [`TileCache::clear`]) the
//! pixels stay alive for the handle holder but the entry is no longer found by
//! key and no longer counts against capacity. Dropping the last handle frees
//! the pixels and gives the cache a chance to evict down to capacity.

use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use tracing::debug;

use crate::grid::TileId;

use super::DecodedTile;

/// Default cache capacity: 32MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 32 * 1024 * 1024;

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for decoded tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    /// Identifier of the open slide
    pub slide: u64,

    /// Pyramid level (0 = highest resolution)
    pub level: usize,

    /// Tile within the level
    pub tile: TileId,
}

impl TileCacheKey {
    /// Create a new cache key.
    pub fn new(slide: u64, level: usize, tile: TileId) -> Self {
        Self { slide, level, tile }
    }
}

// =============================================================================
// Entries and Handles
// =============================================================================

#[derive(Debug)]
struct CacheEntry {
    tile: DecodedTile,
    size: usize,
}

struct CacheInner {
    /// Resident entries; the map holds one reference to each
    entries: LruCache<TileCacheKey, Arc<CacheEntry>>,
    /// Maximum total size in bytes
    capacity: usize,
    /// Total size of resident entries in bytes
    size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    /// Drop unreferenced entries, least recently used first, until the
    /// resident size fits the capacity.
    fn evict_to_capacity(&mut self) {
        if self.size <= self.capacity {
            return;
        }

        let mut excess = self.size - self.capacity;
        let mut victims = Vec::new();
        for (key, entry) in self.entries.iter().rev() {
            if excess == 0 {
                break;
            }
            // Handles are only created under the cache lock, so a count of
            // one cannot grow while we hold it
            if Arc::strong_count(entry) == 1 {
                excess = excess.saturating_sub(entry.size);
                victims.push(*key);
            }
        }

        for key in victims {
            if let Some(entry) = self.entries.pop(&key) {
                self.size -= entry.size;
                self.evictions += 1;
            }
        }

        if self.size > self.capacity {
            debug!(
                size = self.size,
                capacity = self.capacity,
                "Tile cache over capacity, remaining entries are in use"
            );
        }
    }
}

/// Counters describing cache activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub size: usize,
    pub capacity: usize,
}

/// A referenced tile.
///
/// Keeps its entry from being evicted until dropped.
pub struct CachedTile {
    entry: Option<Arc<CacheEntry>>,
    cache: Arc<Mutex<CacheInner>>,
}

impl Deref for CachedTile {
    type Target = DecodedTile;

    fn deref(&self) -> &DecodedTile {
        match &self.entry {
            Some(entry) => &entry.tile,
            // Only cleared in drop
            None => unreachable!("cached tile used after release"),
        }
    }
}

impl std::fmt::Debug for CachedTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTile")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

impl Drop for CachedTile {
    fn drop(&mut self) {
        // Release our reference first so the entry becomes evictable
        drop(self.entry.take());
        let mut inner = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        inner.evict_to_capacity();
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// LRU cache for decoded tiles with size-based capacity.
///
/// # Thread Safety
///
/// All bookkeeping sits behind one mutex owned by the cache, independent of
/// any slide lock. Share the cache between slides via `Arc`.
///
/// # Example
///
/// ```
/// use wsi_region::grid::TileId;
/// use wsi_region::tile::{DecodedTile, TileCache, TileCacheKey};
///
/// let cache = TileCache::with_capacity(1024 * 1024);
/// let key = TileCacheKey::new(1, 0, TileId::Cell { col: 0, row: 0 });
///
/// let tile = cache.put(key, DecodedTile::new(16, 16, vec![0xFF00_0000; 256]));
/// assert_eq!(tile.width, 16);
/// drop(tile);
///
/// assert!(cache.get(&key).is_some());
/// ```
pub struct TileCache {
    inner: Arc<Mutex<CacheInner>>,
}

impl TileCache {
    /// Create a new tile cache with default capacity (32MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a new tile cache with the specified capacity in bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                capacity,
                size: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, entry: Arc<CacheEntry>) -> CachedTile {
        CachedTile {
            entry: Some(entry),
            cache: Arc::clone(&self.inner),
        }
    }

    /// Look up a tile, marking it recently used.
    pub fn get(&self, key: &TileCacheKey) -> Option<CachedTile> {
        let mut inner = self.lock();
        match inner.entries.get(key).cloned() {
            Some(entry) => {
                inner.hits += 1;
                Some(self.handle(entry))
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Check if a tile is resident without updating LRU order.
    pub fn contains(&self, key: &TileCacheKey) -> bool {
        self.lock().entries.contains(key)
    }

    /// Insert a tile and return a handle to it.
    ///
    /// An existing entry for `key` is replaced; holders of the old entry keep
    /// their pixels. Unreferenced entries are then evicted least recently used
    /// first until the cache is within capacity.
    pub fn put(&self, key: TileCacheKey, tile: DecodedTile) -> CachedTile {
        let size = tile.byte_size();
        let entry = Arc::new(CacheEntry { tile, size });

        let mut inner = self.lock();
        if let Some(old) = inner.entries.pop(&key) {
            inner.size -= old.size;
        }
        inner.entries.put(key, Arc::clone(&entry));
        inner.size += size;
        let handle = self.handle(entry);
        inner.evict_to_capacity();

        handle
    }

    /// Change the capacity, evicting unreferenced entries if needed.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.lock();
        inner.capacity = capacity;
        inner.evict_to_capacity();
    }

    /// Remove every resident entry. Referenced tiles stay alive for their holders.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.size = 0;
    }

    /// Get the current number of resident tiles.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Get the current total size of resident tiles in bytes.
    pub fn size(&self) -> usize {
        self.lock().size
    }

    /// Get the maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.lock().capacity
    }

    /// Snapshot of cache counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries.len(),
            size: inner.size,
            capacity: inner.capacity,
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
