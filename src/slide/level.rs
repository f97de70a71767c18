//! Pyramid levels.
//!
//! Every level from the layout is a base level with scale denominator 1.
//! When the decoder can shrink a level's tiles by 2, 4 or 8, reduced copies
//! of the level are added that share its grid and decode at that scale.

use std::sync::Arc;

use crate::grid::{ClipRect, GridLayout, TileGrid, TilePlacement};

/// Scale denominators used for derived levels.
pub const DERIVED_SCALES: [u32; 3] = [2, 4, 8];

/// One level of the pyramid.
#[derive(Debug, Clone)]
pub struct Level {
    /// Width in level pixels
    pub width: u64,
    /// Height in level pixels
    pub height: u64,
    /// Level-0 pixels per level pixel
    pub downsample: f64,
    /// Uniform tile size in level pixels, or (0, 0)
    pub tile_width: u32,
    pub tile_height: u32,
    /// Decode scale applied to the grid's tiles
    pub scale_denom: u32,
    grid: Arc<TileGrid>,
}

impl Level {
    /// A level painted from `grid` at full decode scale.
    pub fn new(width: u64, height: u64, grid: TileGrid) -> Self {
        let (tile_width, tile_height) = grid.tile_size_hint();
        Self {
            width,
            height,
            downsample: 1.0,
            tile_width,
            tile_height,
            scale_denom: 1,
            grid: Arc::new(grid),
        }
    }

    /// The same tiles decoded at 1/`scale_denom`.
    pub fn scaled(&self, scale_denom: u32) -> Self {
        let d = scale_denom.max(1);
        Self {
            width: self.width / d as u64,
            height: self.height / d as u64,
            downsample: 1.0,
            tile_width: self.tile_width / d,
            tile_height: self.tile_height / d,
            scale_denom: self.scale_denom * d,
            grid: Arc::clone(&self.grid),
        }
    }

    /// The underlying tile layout, in base-level pixels.
    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Whether this level shares its tiles with `other`.
    pub fn shares_grid(&self, other: &Level) -> bool {
        Arc::ptr_eq(&self.grid, &other.grid)
    }

    /// Tiles overlapping `[x, x+w) x [y, y+h)` in level pixels, in paint order.
    ///
    /// Placements are in level pixels; their clip rectangles address the tile
    /// as decoded at this level's scale.
    pub fn tiles_overlapping(&self, x: i64, y: i64, w: i64, h: i64) -> Vec<TilePlacement> {
        let d = self.scale_denom as i64;
        if d == 1 {
            return self.grid.tiles_overlapping(x, y, w, h);
        }

        self.grid
            .tiles_overlapping(
                x.saturating_mul(d),
                y.saturating_mul(d),
                w.saturating_mul(d),
                h.saturating_mul(d),
            )
            .into_iter()
            .map(|p| TilePlacement {
                x: p.x.div_euclid(d),
                y: p.y.div_euclid(d),
                clip: ClipRect {
                    x: p.clip.x / d as u32,
                    y: p.clip.y / d as u32,
                    width: p.clip.width.div_ceil(d as u32),
                    height: p.clip.height.div_ceil(d as u32),
                },
                ..p
            })
            .collect()
    }
}

/// Expand the base levels into the full pyramid.
///
/// With `scaled_levels`, each base level gains a derived level for every
/// denominator in [`DERIVED_SCALES`] that divides the tile size of every
/// tile source it uses, looked up through `source_tile_size`. Levels are
/// sorted by decreasing width; of two levels with equal width the one with
/// the smaller denominator is kept. Downsamples are relative to level 0.
pub fn build_pyramid(
    base: Vec<Level>,
    scaled_levels: bool,
    source_tile_size: impl Fn(usize) -> (u32, u32),
) -> Vec<Level> {
    let mut levels = Vec::with_capacity(base.len() * (DERIVED_SCALES.len() + 1));

    for level in base {
        if scaled_levels {
            let sizes: Vec<(u32, u32)> = level
                .grid
                .tile_refs()
                .iter()
                .map(|r| source_tile_size(r.source))
                .collect();
            for d in DERIVED_SCALES {
                let divisible = !sizes.is_empty()
                    && sizes.iter().all(|&(w, h)| w % d == 0 && h % d == 0);
                if divisible && level.width / d as u64 > 0 && level.height / d as u64 > 0 {
                    levels.push(level.scaled(d));
                }
            }
        }
        levels.push(level);
    }

    levels.sort_by(|a, b| {
        b.width
            .cmp(&a.width)
            .then(a.scale_denom.cmp(&b.scale_denom))
    });
    levels.dedup_by(|later, kept| later.width == kept.width);

    let (base_width, base_height) = levels.first().map_or((1, 1), |l| (l.width, l.height));
    for level in &mut levels {
        level.downsample = if level.height > 0 && base_height > 0 {
            base_height as f64 / level.height as f64
        } else {
            base_width as f64 / level.width.max(1) as f64
        };
    }

    levels
}

/// Index of the level with the largest downsample not above `downsample`.
///
/// Falls back to the coarsest level when every level is above it.
pub fn best_level_for_downsample(levels: &[Level], downsample: f64) -> usize {
    let mut best: Option<usize> = None;
    for (i, level) in levels.iter().enumerate() {
        if level.downsample <= downsample
            && best.map_or(true, |b| level.downsample > levels[b].downsample)
        {
            best = Some(i);
        }
    }

    best.unwrap_or_else(|| {
        levels
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.downsample.total_cmp(&b.1.downsample))
            .map_or(0, |(i, _)| i)
    })
}
