//! Slide layout: the already-parsed metadata a slide is opened from.
//!
//! Vendor metadata parsing is not done here. Whatever reads the vendor files
//! produces a [`SlideLayout`] naming the coded streams (tile sources), where
//! they live in which file, and how each pyramid level's tiles map onto them.
//! Layouts serialize to JSON so they can be produced out of process.
//!
//! # Example
//!
//! ```
//! use wsi_region::format::layout::SlideLayout;
//!
//! let layout = SlideLayout::from_json(r#"{
//!     "sources": [{ "file": "slide.jpg" }],
//!     "levels": [{
//!         "width": 2048, "height": 1024,
//!         "grid": { "kind": "simple", "tile_width": 256, "tile_height": 8,
//!                   "tiles_across": 8, "tiles_down": 128 }
//!     }]
//! }"#).unwrap();
//!
//! assert_eq!(layout.levels.len(), 1);
//! assert!(layout.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SlideError;

/// Metadata describing every coded stream and level of a slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlideLayout {
    pub sources: Vec<TileSourceSpec>,
    pub levels: Vec<LevelSpec>,
}

/// One coded stream inside a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileSourceSpec {
    /// File identifier, resolved by the slide source
    pub file: String,

    /// Offset of the stream's SOI marker
    #[serde(default)]
    pub start: u64,

    /// Exclusive end of the stream; defaults to the end of the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,

    /// Uncoded tile width; defaults to the width implied by the restart interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_width: Option<u32>,

    /// Uncoded tile height; defaults to one MCU row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_height: Option<u32>,

    /// Tiles in the stream; defaults to the count implied by the restart interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tile_count: Option<u32>,

    /// Vendor-supplied restart offsets, validated before use
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Option<u64>>,
}

impl TileSourceSpec {
    /// A stream covering all of `file`, geometry taken from its header.
    pub fn whole_file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            start: 0,
            end: None,
            tile_width: None,
            tile_height: None,
            tile_count: None,
            hints: Vec::new(),
        }
    }
}

/// One pyramid level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSpec {
    pub width: u64,
    pub height: u64,
    pub grid: GridSpec,
}

fn one() -> u32 {
    1
}

/// How a level's tiles map onto tile sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridSpec {
    /// Regular grid over row-major streams starting at `first_source`
    Simple {
        tile_width: u32,
        tile_height: u32,
        tiles_across: u32,
        tiles_down: u32,
        #[serde(default = "one")]
        source_columns: u32,
        #[serde(default)]
        first_source: usize,
    },
    /// Sparse grid with explicit per-cell placement
    TileMap {
        tile_advance_x: u32,
        tile_advance_y: u32,
        tiles_across: u32,
        tiles_down: u32,
        tiles: Vec<TileMapEntrySpec>,
    },
    /// Free-standing, possibly overlapping tiles
    Range {
        bin_width: u32,
        bin_height: u32,
        tiles: Vec<RangeTileSpec>,
    },
}

/// A populated cell of a tile map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileMapEntrySpec {
    pub col: u32,
    pub row: u32,
    pub source: usize,
    pub tile: usize,
    #[serde(default)]
    pub offset_x: i64,
    #[serde(default)]
    pub offset_y: i64,
    #[serde(default)]
    pub src_x: u32,
    #[serde(default)]
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
}

/// A tile of a range grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeTileSpec {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub z: i32,
    pub source: usize,
    pub tile: usize,
}

impl SlideLayout {
    /// Parse a layout from JSON.
    pub fn from_json(json: &str) -> Result<Self, SlideError> {
        serde_json::from_str(json).map_err(|e| SlideError::InvalidLayout(e.to_string()))
    }

    /// Serialize the layout to JSON.
    pub fn to_json(&self) -> Result<String, SlideError> {
        serde_json::to_string_pretty(self).map_err(|e| SlideError::InvalidLayout(e.to_string()))
    }

    /// Layout of a single restart-marker stream forming one level.
    pub fn single_stream(
        file: impl Into<String>,
        width: u64,
        height: u64,
        tile_width: u32,
        tile_height: u32,
    ) -> Self {
        let tiles_across = width.div_ceil(tile_width.max(1) as u64) as u32;
        let tiles_down = height.div_ceil(tile_height.max(1) as u64) as u32;
        Self {
            sources: vec![TileSourceSpec::whole_file(file)],
            levels: vec![LevelSpec {
                width,
                height,
                grid: GridSpec::Simple {
                    tile_width,
                    tile_height,
                    tiles_across,
                    tiles_down,
                    source_columns: 1,
                    first_source: 0,
                },
            }],
        }
    }

    /// Check everything that can be checked without reading the streams.
    ///
    /// Tile indexes are checked against stream tile counts when the slide
    /// is opened.
    pub fn validate(&self) -> Result<(), SlideError> {
        let invalid = |msg: String| Err(SlideError::InvalidLayout(msg));

        if self.levels.is_empty() {
            return invalid("layout has no levels".to_string());
        }
        if self.sources.is_empty() {
            return invalid("layout has no tile sources".to_string());
        }

        for (i, source) in self.sources.iter().enumerate() {
            if let Some(end) = source.end {
                if end <= source.start {
                    return invalid(format!(
                        "tile source {} ends at {} before its start {}",
                        i, end, source.start
                    ));
                }
            }
            if source.tile_width == Some(0) || source.tile_height == Some(0) {
                return invalid(format!("tile source {} has zero tile size", i));
            }
            if source.tile_count == Some(0) {
                return invalid(format!("tile source {} has no tiles", i));
            }
            if let Some(count) = source.tile_count {
                if source.hints.len() > count as usize {
                    return invalid(format!(
                        "tile source {} has {} hints for {} tiles",
                        i,
                        source.hints.len(),
                        count
                    ));
                }
            }
        }

        for (i, level) in self.levels.iter().enumerate() {
            if level.width == 0 || level.height == 0 {
                return invalid(format!("level {} is empty", i));
            }
            self.validate_grid(i, &level.grid)?;
        }

        Ok(())
    }

    fn validate_grid(&self, level: usize, grid: &GridSpec) -> Result<(), SlideError> {
        let source_count = self.sources.len();
        let check_source = |source: usize| {
            if source >= source_count {
                Err(SlideError::InvalidLayout(format!(
                    "level {} references tile source {} of {}",
                    level, source, source_count
                )))
            } else {
                Ok(())
            }
        };

        match grid {
            GridSpec::Simple {
                tile_width,
                tile_height,
                source_columns,
                first_source,
                ..
            } => {
                if *tile_width == 0 || *tile_height == 0 || *source_columns == 0 {
                    return Err(SlideError::InvalidLayout(format!(
                        "level {} has degenerate simple grid",
                        level
                    )));
                }
                check_source(*first_source)
            }
            GridSpec::TileMap {
                tile_advance_x,
                tile_advance_y,
                tiles,
                ..
            } => {
                if *tile_advance_x == 0 || *tile_advance_y == 0 {
                    return Err(SlideError::InvalidLayout(format!(
                        "level {} has zero tile advance",
                        level
                    )));
                }
                tiles.iter().try_for_each(|t| check_source(t.source))
            }
            GridSpec::Range {
                bin_width,
                bin_height,
                tiles,
            } => {
                if *bin_width == 0 || *bin_height == 0 {
                    return Err(SlideError::InvalidLayout(format!(
                        "level {} has zero bin size",
                        level
                    )));
                }
                tiles.iter().try_for_each(|t| check_source(t.source))
            }
        }
    }
}
