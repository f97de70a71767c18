use super::{cell_range, ClipRect, GridLayout, TileId, TilePlacement, TileRef};

/// Tile layout of one coded stream in a simple grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceTiles {
    pub tiles_across: u32,
    pub tile_count: u32,
}

/// Regular grid of equally sized tiles.
///
/// The level is cut into `source_columns` columns of coded streams, laid out
/// row-major starting at `first_source`. Every stream covers the tile block of
/// the first stream; streams on the right and bottom edge may hold fewer
/// tiles, and cells they do not cover are empty.
#[derive(Debug, Clone)]
pub struct SimpleGrid {
    tile_width: u32,
    tile_height: u32,
    tiles_across: u32,
    tiles_down: u32,
    source_columns: u32,
    first_source: usize,
    sources: Vec<SourceTiles>,
    tiles_per_source_across: u32,
    tiles_per_source_down: u32,
}

impl SimpleGrid {
    /// Build a grid over `sources`, which start at tile source `first_source`.
    ///
    /// Returns `None` if the geometry is degenerate.
    pub fn new(
        tile_width: u32,
        tile_height: u32,
        tiles_across: u32,
        tiles_down: u32,
        source_columns: u32,
        first_source: usize,
        sources: Vec<SourceTiles>,
    ) -> Option<Self> {
        if tile_width == 0 || tile_height == 0 || source_columns == 0 {
            return None;
        }
        let first = sources.first()?;
        if first.tiles_across == 0 || first.tile_count == 0 {
            return None;
        }
        let tiles_per_source_across = first.tiles_across;
        let tiles_per_source_down = first.tile_count.div_ceil(first.tiles_across);

        Some(Self {
            tile_width,
            tile_height,
            tiles_across,
            tiles_down,
            source_columns,
            first_source,
            sources,
            tiles_per_source_across,
            tiles_per_source_down,
        })
    }

    /// Grid backed by tile source 0 alone, holding every tile.
    pub fn single_source(tile_width: u32, tile_height: u32, tiles_across: u32, tiles_down: u32) -> Self {
        Self {
            tile_width,
            tile_height,
            tiles_across,
            tiles_down,
            source_columns: 1,
            first_source: 0,
            sources: vec![SourceTiles {
                tiles_across,
                tile_count: tiles_across * tiles_down,
            }],
            tiles_per_source_across: tiles_across.max(1),
            tiles_per_source_down: tiles_down.max(1),
        }
    }

    /// Grid dimensions in tiles.
    pub fn tiles(&self) -> (u32, u32) {
        (self.tiles_across, self.tiles_down)
    }

    /// Coded tile behind cell (`col`, `row`), if the cell is populated.
    pub fn tile_at(&self, col: u32, row: u32) -> Option<TileRef> {
        if col >= self.tiles_across || row >= self.tiles_down {
            return None;
        }
        let source_col = col / self.tiles_per_source_across;
        let source_row = row / self.tiles_per_source_down;
        if source_col >= self.source_columns {
            return None;
        }
        let local = (source_row * self.source_columns + source_col) as usize;
        let source = self.sources.get(local)?;

        let local_col = col % self.tiles_per_source_across;
        let local_row = row % self.tiles_per_source_down;
        if local_col >= source.tiles_across {
            return None;
        }
        let tile = local_row * source.tiles_across + local_col;
        if tile >= source.tile_count {
            return None;
        }

        Some(TileRef {
            source: self.first_source + local,
            tile: tile as usize,
        })
    }
}

impl GridLayout for SimpleGrid {
    fn tiles_overlapping(&self, x: i64, y: i64, w: i64, h: i64) -> Vec<TilePlacement> {
        let tw = self.tile_width as i64;
        let th = self.tile_height as i64;
        let (col_start, col_end) = cell_range(x, w, tw, self.tiles_across as i64);
        let (row_start, row_end) = cell_range(y, h, th, self.tiles_down as i64);

        let mut placements = Vec::new();
        for row in row_start..row_end {
            for col in col_start..col_end {
                let Some(tile) = self.tile_at(col as u32, row as u32) else {
                    continue;
                };
                placements.push(TilePlacement {
                    id: TileId::Cell { col, row },
                    tile,
                    x: col * tw,
                    y: row * th,
                    clip: ClipRect {
                        x: 0,
                        y: 0,
                        width: self.tile_width,
                        height: self.tile_height,
                    },
                    z: 0,
                });
            }
        }
        placements
    }

    fn tile_advance(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    fn tile_size_hint(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    fn tile_refs(&self) -> Vec<TileRef> {
        (0..self.tiles_down)
            .flat_map(|row| (0..self.tiles_across).map(move |col| (col, row)))
            .filter_map(|(col, row)| self.tile_at(col, row))
            .collect()
    }
}
