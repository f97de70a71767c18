//! Tile pipeline: from coded stream bytes to painted region pixels.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             RegionPainter               │
//! │  (grid query, clip, composite, errors)  │
//! └──────┬──────────────────────┬───────────┘
//!        │ miss                 │ hit
//!        ▼                      ▼
//! ┌──────────────┐     ┌─────────────────┐
//! │ Tile stream  │     │   TileCache     │
//! │ (header +    │     │ (decoded ARGB,  │
//! │  tile bytes) │     │  pinned by      │
//! └──────┬───────┘     │  CachedTile)    │
//!        ▼             └─────────────────┘
//! ┌──────────────┐             ▲
//! │ TileDecoder  │─────────────┘
//! └──────────────┘
//! ```
//!
//! # Components
//!
//! - [`RegionPainter`]: paints one level's tiles into a [`Region`]
//! - [`TileCache`]: byte-bounded LRU of decoded tiles, shareable between slides
//! - [`CachedTile`]: handle that keeps a cached tile alive while it is painted
//! - [`TileDecoder`]: codec boundary; [`JpegTileDecoder`] is the default
//! - [`build_tile_stream`]: assembles a standalone stream for one tile
//!
//! # Example
//!
//! ```
//! use wsi_region::grid::TileId;
//! use wsi_region::tile::{DecodedTile, TileCache, TileCacheKey};
//!
//! let cache = TileCache::with_capacity(1024 * 1024);
//! let key = TileCacheKey::new(1, 0, TileId::Cell { col: 0, row: 0 });
//!
//! let tile = cache.put(key, DecodedTile::new(2, 2, vec![0xFF000000; 4]));
//! assert_eq!(tile.width, 2);
//! assert!(cache.get(&key).is_some());
//! ```

mod bitstream;
mod cache;
mod composite;
mod decoder;
mod painter;

pub use bitstream::{build_tile_stream, TileStreamRange};
pub use cache::{CacheStats, CachedTile, TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use composite::{composite_tile, paint_over, Region};
pub use decoder::{
    scaled_size, DecodedTile, JpegTileDecoder, TileDecoder, JPEG_MAX_DIMENSION, SCALE_DENOMINATORS,
};
pub use painter::{RegionPainter, TileStreams};
