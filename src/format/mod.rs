//! Coded stream formats.
//!
//! - [`jpeg`]: marker segments, header parsing and frame patching
//! - [`restart`]: lazily filled restart-marker offsets of one stream
//! - [`layout`]: the serializable slide layout slides are opened from

pub mod jpeg;
pub mod layout;
pub mod restart;

pub use jpeg::{parse_header, JpegHeader, RestartGeometry};
pub use layout::{GridSpec, LevelSpec, RangeTileSpec, SlideLayout, TileMapEntrySpec, TileSourceSpec};
pub use restart::RestartIndex;
