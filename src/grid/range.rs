use std::collections::HashMap;

use super::{ClipRect, GridLayout, TileId, TilePlacement, TileRef};

#[derive(Debug, Clone)]
struct RangeTile {
    x: i64,
    y: i64,
    width: u32,
    height: u32,
    z: i32,
    tile: TileRef,
}

/// Free-standing tiles that may overlap.
///
/// Tiles are binned on a coarse grid so a query only inspects tiles from the
/// bins it touches. Results come back in ascending z, ties broken by
/// insertion order, so painting them in order leaves the highest z on top.
#[derive(Debug, Clone)]
pub struct RangeGrid {
    bin_width: u32,
    bin_height: u32,
    tiles: Vec<RangeTile>,
    bins: HashMap<(i64, i64), Vec<usize>>,
    uniform_size: Option<(u32, u32)>,
}

impl RangeGrid {
    /// Create an empty range grid. Returns `None` for a zero bin size.
    pub fn new(bin_width: u32, bin_height: u32) -> Option<Self> {
        if bin_width == 0 || bin_height == 0 {
            return None;
        }
        Some(Self {
            bin_width,
            bin_height,
            tiles: Vec::new(),
            bins: HashMap::new(),
            uniform_size: None,
        })
    }

    /// Add a tile whose top-left pixel lands at (`x`, `y`).
    ///
    /// Returns the tile's index, which is also its [`TileId::Index`].
    pub fn add_tile(
        &mut self,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
        z: i32,
        tile: TileRef,
    ) -> usize {
        let index = self.tiles.len();

        if width > 0 && height > 0 {
            let (bx0, bx1) = self.bin_span(x, width as i64, self.bin_width as i64);
            let (by0, by1) = self.bin_span(y, height as i64, self.bin_height as i64);
            for by in by0..=by1 {
                for bx in bx0..=bx1 {
                    self.bins.entry((bx, by)).or_default().push(index);
                }
            }
        }

        self.uniform_size = match (self.tiles.is_empty(), self.uniform_size) {
            (true, _) => Some((width, height)),
            (false, Some(size)) if size == (width, height) => Some(size),
            _ => None,
        };

        self.tiles.push(RangeTile {
            x,
            y,
            width,
            height,
            z,
            tile,
        });
        index
    }

    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Inclusive bin range covering `[pos, pos+len)`.
    fn bin_span(&self, pos: i64, len: i64, bin: i64) -> (i64, i64) {
        let last = pos.saturating_add(len).saturating_sub(1);
        (pos.div_euclid(bin), last.div_euclid(bin))
    }

    fn placement(&self, index: usize) -> TilePlacement {
        let tile = &self.tiles[index];
        TilePlacement {
            id: TileId::Index(index),
            tile: tile.tile,
            x: tile.x,
            y: tile.y,
            clip: ClipRect {
                x: 0,
                y: 0,
                width: tile.width,
                height: tile.height,
            },
            z: tile.z,
        }
    }
}

impl GridLayout for RangeGrid {
    fn tiles_overlapping(&self, x: i64, y: i64, w: i64, h: i64) -> Vec<TilePlacement> {
        let (bx0, bx1) = self.bin_span(x, w, self.bin_width as i64);
        let (by0, by1) = self.bin_span(y, h, self.bin_height as i64);

        let mut candidates = Vec::new();
        let span = bx1
            .saturating_sub(bx0)
            .saturating_add(1)
            .saturating_mul(by1.saturating_sub(by0).saturating_add(1));
        if span > self.bins.len() as i64 {
            // Query covers more bins than exist; walk the populated ones
            for ((bx, by), bin) in &self.bins {
                if (bx0..=bx1).contains(bx) && (by0..=by1).contains(by) {
                    candidates.extend_from_slice(bin);
                }
            }
        } else {
            for by in by0..=by1 {
                for bx in bx0..=bx1 {
                    if let Some(bin) = self.bins.get(&(bx, by)) {
                        candidates.extend_from_slice(bin);
                    }
                }
            }
        }
        candidates.sort_unstable();
        candidates.dedup();

        let mut placements: Vec<TilePlacement> = candidates
            .into_iter()
            .map(|index| self.placement(index))
            .filter(|p| p.intersects(x, y, w, h))
            .collect();
        placements.sort_by_key(|p| {
            let index = match p.id {
                TileId::Index(index) => index,
                TileId::Cell { .. } => usize::MAX,
            };
            (p.z, index)
        });
        placements
    }

    fn tile_advance(&self) -> (u32, u32) {
        (self.bin_width, self.bin_height)
    }

    fn tile_size_hint(&self) -> (u32, u32) {
        self.uniform_size.unwrap_or((0, 0))
    }

    fn tile_refs(&self) -> Vec<TileRef> {
        self.tiles.iter().map(|t| t.tile).collect()
    }
}
