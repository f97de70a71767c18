use std::collections::HashMap;

use super::{cell_range, ClipRect, GridLayout, TileId, TilePlacement, TileRef};

#[derive(Debug, Clone)]
struct MappedTile {
    col: i64,
    row: i64,
    tile: TileRef,
    offset_x: i64,
    offset_y: i64,
    clip: ClipRect,
}

/// Sparse grid with per-cell placement.
///
/// Cells are addressed on a tile-advance grid but need not all be populated.
/// Each populated cell carries the tile's offset from the cell origin and the
/// part of the decoded tile that holds image data. Tiles may spill into
/// neighbouring cells; queries widen their cell range to catch them.
#[derive(Debug, Clone)]
pub struct TileMapGrid {
    tile_advance_x: u32,
    tile_advance_y: u32,
    tiles_across: u32,
    tiles_down: u32,
    tiles: Vec<MappedTile>,
    /// Bucket `row * tiles_across + col` to index into `tiles`
    buckets: HashMap<u64, usize>,
    extra_left: i64,
    extra_right: i64,
    extra_top: i64,
    extra_bottom: i64,
    uniform_size: Option<(u32, u32)>,
}

impl TileMapGrid {
    /// Create an empty tile map. Returns `None` for a zero advance.
    pub fn new(
        tile_advance_x: u32,
        tile_advance_y: u32,
        tiles_across: u32,
        tiles_down: u32,
    ) -> Option<Self> {
        if tile_advance_x == 0 || tile_advance_y == 0 {
            return None;
        }
        Some(Self {
            tile_advance_x,
            tile_advance_y,
            tiles_across,
            tiles_down,
            tiles: Vec::new(),
            buckets: HashMap::new(),
            extra_left: 0,
            extra_right: 0,
            extra_top: 0,
            extra_bottom: 0,
            uniform_size: None,
        })
    }

    /// Register the tile for cell (`col`, `row`).
    ///
    /// The clipped tile's top-left pixel lands at
    /// `(col * advance_x + offset_x, row * advance_y + offset_y)`.
    /// Returns `false`, leaving the map unchanged, if the cell lies outside the
    /// grid or already holds a tile.
    pub fn add_tile(
        &mut self,
        col: u32,
        row: u32,
        tile: TileRef,
        offset_x: i64,
        offset_y: i64,
        clip: ClipRect,
    ) -> bool {
        if col >= self.tiles_across || row >= self.tiles_down {
            return false;
        }
        let bucket = row as u64 * self.tiles_across as u64 + col as u64;
        if self.buckets.contains_key(&bucket) {
            return false;
        }

        let (left, right) = spill(offset_x, clip.width, self.tile_advance_x);
        let (top, bottom) = spill(offset_y, clip.height, self.tile_advance_y);
        self.extra_left = self.extra_left.max(left);
        self.extra_right = self.extra_right.max(right);
        self.extra_top = self.extra_top.max(top);
        self.extra_bottom = self.extra_bottom.max(bottom);

        self.uniform_size = match (self.tiles.is_empty(), self.uniform_size) {
            (true, _) => Some((clip.width, clip.height)),
            (false, Some(size)) if size == (clip.width, clip.height) => Some(size),
            _ => None,
        };

        self.buckets.insert(bucket, self.tiles.len());
        self.tiles.push(MappedTile {
            col: col as i64,
            row: row as i64,
            tile,
            offset_x,
            offset_y,
            clip,
        });
        true
    }

    /// Number of populated cells.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    fn placement(&self, mapped: &MappedTile) -> TilePlacement {
        let origin_x = (mapped.col * self.tile_advance_x as i64).saturating_add(mapped.offset_x);
        let origin_y = (mapped.row * self.tile_advance_y as i64).saturating_add(mapped.offset_y);
        TilePlacement {
            id: TileId::Cell {
                col: mapped.col,
                row: mapped.row,
            },
            tile: mapped.tile,
            x: origin_x.saturating_sub(mapped.clip.x as i64),
            y: origin_y.saturating_sub(mapped.clip.y as i64),
            clip: mapped.clip,
            z: 0,
        }
    }
}

/// Cells a tile reaches beyond its own on the (before, after) side.
///
/// A tile shifted forward by `offset` is found from cells after its own,
/// so the query has to look back that many cells, and vice versa.
fn spill(offset: i64, size: u32, advance: u32) -> (i64, i64) {
    let advance = advance as i64;
    let far_edge = offset.saturating_add(size as i64);
    let before = if far_edge > advance {
        ((far_edge - advance) as u64).div_ceil(advance as u64) as i64
    } else {
        0
    };
    let after = if offset < 0 {
        offset.unsigned_abs().div_ceil(advance as u64).min(i64::MAX as u64) as i64
    } else {
        0
    };
    (before, after)
}

impl GridLayout for TileMapGrid {
    fn tiles_overlapping(&self, x: i64, y: i64, w: i64, h: i64) -> Vec<TilePlacement> {
        let adv_x = self.tile_advance_x as i64;
        let adv_y = self.tile_advance_y as i64;
        let widen = |extra: i64, advance: i64| extra.saturating_mul(advance);
        let (col_start, col_end) = cell_range(
            x.saturating_sub(widen(self.extra_left, adv_x)),
            w.saturating_add(widen(self.extra_left.saturating_add(self.extra_right), adv_x)),
            adv_x,
            self.tiles_across as i64,
        );
        let (row_start, row_end) = cell_range(
            y.saturating_sub(widen(self.extra_top, adv_y)),
            h.saturating_add(widen(self.extra_top.saturating_add(self.extra_bottom), adv_y)),
            adv_y,
            self.tiles_down as i64,
        );

        let mut placements = Vec::new();
        for row in row_start..row_end {
            for col in col_start..col_end {
                let bucket = row as u64 * self.tiles_across as u64 + col as u64;
                let Some(&index) = self.buckets.get(&bucket) else {
                    continue;
                };
                let placement = self.placement(&self.tiles[index]);
                if placement.intersects(x, y, w, h) {
                    placements.push(placement);
                }
            }
        }
        placements
    }

    fn tile_advance(&self) -> (u32, u32) {
        (self.tile_advance_x, self.tile_advance_y)
    }

    fn tile_size_hint(&self) -> (u32, u32) {
        self.uniform_size.unwrap_or((0, 0))
    }

    fn tile_refs(&self) -> Vec<TileRef> {
        self.tiles.iter().map(|t| t.tile).collect()
    }
}
