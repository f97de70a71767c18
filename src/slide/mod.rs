//! Slide layer: open slides, their levels and the restart-marker scanner.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                 Slide                   │
//! │  (levels, tile cache, failed state)     │
//! └──────┬──────────────────────┬───────────┘
//!        │ read_region          │ open
//!        ▼                      ▼
//! ┌──────────────┐     ┌─────────────────────┐
//! │RegionPainter │     │    SlideSource      │
//! └──────┬───────┘     │ (local dir, memory) │
//!        │             └─────────────────────┘
//!        ▼
//! ┌─────────────────────────────────────────┐
//! │  Marker index (one mutex per slide)     │◄── background scanner thread
//! │  RestartIndex per TileSource            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use wsi_region::format::layout::SlideLayout;
//! use wsi_region::slide::{LocalSlideSource, Slide};
//! use wsi_region::Config;
//!
//! let source = LocalSlideSource::new("/data/slides");
//! let layout = SlideLayout::single_stream("scan.jpg", 40000, 30000, 256, 8);
//! let slide = Slide::open(&source, &layout, Config::default()).unwrap();
//!
//! let level = slide.best_level_for_downsample(4.0);
//! let region = slide.read_region(1000, 1000, level, 512, 512).unwrap();
//! assert_eq!(region.pixels.len(), 512 * 512);
//! ```

mod level;
mod scanner;
mod slide;
mod source;

pub use level::{best_level_for_downsample, build_pyramid, Level, DERIVED_SCALES};
pub use scanner::ScannerState;
pub use slide::Slide;
pub use source::{LocalSlideSource, MemorySlideSource, SlideSource, TileSource};
