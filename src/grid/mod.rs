//! Tile addressing for one pyramid level.
//!
//! A grid maps a rectangle of level pixels to the tiles that cover it. Three
//! layouts are supported:
//!
//! - [`SimpleGrid`]: a regular grid, every cell populated from a row-major
//!   arrangement of coded streams
//! - [`TileMapGrid`]: a sparse grid whose cells carry explicit placement
//!   and size
//! - [`RangeGrid`]: free-standing, possibly overlapping tiles painted in
//!   ascending z order
//!
//! Grids do not clip tiles to the level bounds; the painter does that.

mod range;
mod simple;
mod tilemap;

pub use range::RangeGrid;
pub use simple::{SimpleGrid, SourceTiles};
pub use tilemap::TileMapGrid;

/// Location of one coded tile: a tile source and the tile's index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRef {
    pub source: usize,
    pub tile: usize,
}

/// Identity of a tile within its level, used in cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileId {
    /// Cell of a simple grid or tile map
    Cell { col: i64, row: i64 },
    /// Entry of a range grid
    Index(usize),
}

/// Sub-rectangle of a decoded tile, in tile pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// One tile to paint for a region query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePlacement {
    pub id: TileId,
    pub tile: TileRef,
    /// Level x coordinate of the tile's pixel (0, 0)
    pub x: i64,
    /// Level y coordinate of the tile's pixel (0, 0)
    pub y: i64,
    /// Part of the tile that carries image data
    pub clip: ClipRect,
    /// Paint order; higher z paints over lower z
    pub z: i32,
}

impl TilePlacement {
    /// Whether the clipped tile intersects the rectangle `[x, x+w) x [y, y+h)`.
    pub fn intersects(&self, x: i64, y: i64, w: i64, h: i64) -> bool {
        let left = self.x.saturating_add(self.clip.x as i64);
        let top = self.y.saturating_add(self.clip.y as i64);
        let right = left.saturating_add(self.clip.width as i64);
        let bottom = top.saturating_add(self.clip.height as i64);
        left < x.saturating_add(w) && right > x && top < y.saturating_add(h) && bottom > y
    }
}

/// Operations shared by every tile layout.
pub trait GridLayout {
    /// Tiles overlapping `[x, x+w) x [y, y+h)`, in paint order.
    fn tiles_overlapping(&self, x: i64, y: i64, w: i64, h: i64) -> Vec<TilePlacement>;

    /// Distance between the origins of neighbouring tiles.
    fn tile_advance(&self) -> (u32, u32);

    /// Uniform tile size, or (0, 0) if tiles are not uniform.
    fn tile_size_hint(&self) -> (u32, u32);

    /// Every coded tile the grid references.
    fn tile_refs(&self) -> Vec<TileRef>;
}

/// A level's tile layout.
#[derive(Debug, Clone)]
pub enum TileGrid {
    Simple(SimpleGrid),
    TileMap(TileMapGrid),
    Range(RangeGrid),
}

impl GridLayout for TileGrid {
    fn tiles_overlapping(&self, x: i64, y: i64, w: i64, h: i64) -> Vec<TilePlacement> {
        if w <= 0 || h <= 0 {
            return Vec::new();
        }
        match self {
            TileGrid::Simple(g) => g.tiles_overlapping(x, y, w, h),
            TileGrid::TileMap(g) => g.tiles_overlapping(x, y, w, h),
            TileGrid::Range(g) => g.tiles_overlapping(x, y, w, h),
        }
    }

    fn tile_advance(&self) -> (u32, u32) {
        match self {
            TileGrid::Simple(g) => g.tile_advance(),
            TileGrid::TileMap(g) => g.tile_advance(),
            TileGrid::Range(g) => g.tile_advance(),
        }
    }

    fn tile_size_hint(&self) -> (u32, u32) {
        match self {
            TileGrid::Simple(g) => g.tile_size_hint(),
            TileGrid::TileMap(g) => g.tile_size_hint(),
            TileGrid::Range(g) => g.tile_size_hint(),
        }
    }

    fn tile_refs(&self) -> Vec<TileRef> {
        match self {
            TileGrid::Simple(g) => g.tile_refs(),
            TileGrid::TileMap(g) => g.tile_refs(),
            TileGrid::Range(g) => g.tile_refs(),
        }
    }
}

/// Half-open range of cells `[start, end)` covering `[pos, pos+len)` with
/// cells of size `cell`, clamped to `[0, count)`. Saturates at the ends of
/// the coordinate space.
pub(crate) fn cell_range(pos: i64, len: i64, cell: i64, count: i64) -> (i64, i64) {
    let start = pos.div_euclid(cell).clamp(0, count.max(0));
    let end = pos
        .saturating_add(len)
        .saturating_add(cell - 1)
        .div_euclid(cell)
        .min(count);
    (start, end.max(start))
}
