//! # WSI Region
//!
//! Region reads from tiled, pyramidal whole slide images whose pixels live in
//! JPEG restart-marker streams.
//!
//! A slide's metadata (which streams exist, where they live in which file,
//! how each pyramid level's tiles map onto them) is handed in as an
//! already-parsed [`SlideLayout`]. From there the library reads arbitrary
//! rectangles of any level by decoding only the tiles that cover them.
//!
//! ## Features
//!
//! - **Random access into restart-marker streams**: tile offsets are found on
//!   demand from the nearest known marker, validated vendor hints are used
//!   when present, and a background thread indexes the rest
//! - **Three tile layouts**: regular grids, sparse tile maps and overlapping
//!   range grids
//! - **Reduced decode levels**: 1/2, 1/4 and 1/8 levels synthesized from the
//!   codec's scaled decoding
//! - **Shared decoded-tile cache**: byte-bounded LRU whose entries stay alive
//!   while being painted, shareable across slides
//!
//! ## Architecture
//!
//! - [`io`] - Range readers over files and memory, with block caching
//! - [`mod@format`] - JPEG header parsing, restart index, slide layout
//! - [`grid`] - Tile layouts and region-to-tile queries
//! - [`tile`] - Tile cache, codec boundary, stream assembly, painting
//! - [`slide`] - Open slides, levels and the background scanner
//! - [`config`] - Engine settings
//!
//! ## Example
//!
//! ```rust,no_run
//! use wsi_region::{Config, LocalSlideSource, Slide, SlideLayout};
//!
//! let layout = SlideLayout::from_json(&std::fs::read_to_string("slide.json").unwrap()).unwrap();
//! let slide = Slide::open(&LocalSlideSource::new("/data"), &layout, Config::default()).unwrap();
//!
//! match slide.read_region(0, 0, 0, 1024, 1024) {
//!     Ok(region) => println!("read {}x{}", region.width, region.height),
//!     Err(e) => eprintln!("partial read: {}", e),
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod grid;
pub mod io;
pub mod slide;
pub mod tile;

// Re-export commonly used types
pub use config::Config;
pub use error::{DecodeError, IoError, JpegError, RegionError, SlideError};
pub use format::{RestartIndex, SlideLayout};
pub use grid::{GridLayout, TileGrid, TileId, TilePlacement, TileRef};
pub use io::{BlockCache, FileRangeReader, MemoryRangeReader, RangeReader};
pub use slide::{Level, LocalSlideSource, MemorySlideSource, ScannerState, Slide, SlideSource};
pub use tile::{
    CachedTile, DecodedTile, JpegTileDecoder, Region, TileCache, TileCacheKey, TileDecoder,
    DEFAULT_TILE_CACHE_CAPACITY,
};
