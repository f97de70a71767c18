//! Region painter.
//!
//! Painting a region walks the level's grid for the tiles overlapping the
//! requested rectangle, clips each to the level bounds, and composites it
//! into the destination. Decoded tiles come from the shared [`TileCache`];
//! misses are assembled, decoded and inserted. A tile that fails is logged
//! and skipped so the rest of the region is still painted; the first failure
//! is returned once every tile has been tried.

use bytes::Bytes;
use tracing::{trace, warn};

use crate::error::{DecodeError, SlideError};
use crate::grid::{ClipRect, TilePlacement, TileRef};
use crate::slide::Level;

use super::cache::{CachedTile, TileCache, TileCacheKey};
use super::composite::{composite_tile, Region};
use super::decoder::{scaled_size, TileDecoder};

/// Access to the coded tiles behind a slide's grids.
pub trait TileStreams {
    /// Standalone coded stream for one tile.
    fn tile_stream(&self, tile: TileRef) -> Result<Bytes, SlideError>;

    /// Uncoded tile size of a tile source, before any decode scaling.
    fn tile_size(&self, source: usize) -> (u32, u32);
}

/// Paints tiles of one slide into region buffers.
pub struct RegionPainter<'a, S: TileStreams + ?Sized> {
    slide: u64,
    cache: &'a TileCache,
    decoder: &'a dyn TileDecoder,
    streams: &'a S,
}

impl<'a, S: TileStreams + ?Sized> RegionPainter<'a, S> {
    /// Create a painter for the slide identified by `slide` in cache keys.
    pub fn new(
        slide: u64,
        cache: &'a TileCache,
        decoder: &'a dyn TileDecoder,
        streams: &'a S,
    ) -> Self {
        Self {
            slide,
            cache,
            decoder,
            streams,
        }
    }

    /// Paint `dest` from `level`, whose index is `level_index`, with the
    /// region's top-left at level pixel (`x`, `y`).
    pub fn paint(
        &self,
        level_index: usize,
        level: &Level,
        x: i64,
        y: i64,
        dest: &mut Region,
    ) -> Result<(), SlideError> {
        let placements =
            level.tiles_overlapping(x, y, dest.width as i64, dest.height as i64);
        trace!(
            level = level_index,
            x,
            y,
            width = dest.width,
            height = dest.height,
            tiles = placements.len(),
            "painting region"
        );

        let mut first_error = None;
        for placement in placements {
            let Some(clip) = clip_to_level(&placement, level) else {
                continue;
            };

            match self.load(level_index, level.scale_denom, &placement) {
                Ok(tile) => {
                    let dest_x = placement.x.saturating_sub(x);
                    let dest_y = placement.y.saturating_sub(y);
                    composite_tile(dest, &tile, dest_x, dest_y, clip);
                }
                Err(e) => {
                    warn!(
                        level = level_index,
                        source = placement.tile.source,
                        tile = placement.tile.tile,
                        error = %e,
                        "failed to paint tile"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Fetch a decoded tile from the cache, decoding it on a miss.
    fn load(
        &self,
        level_index: usize,
        scale_denom: u32,
        placement: &TilePlacement,
    ) -> Result<CachedTile, SlideError> {
        let key = TileCacheKey::new(self.slide, level_index, placement.id);
        if let Some(tile) = self.cache.get(&key) {
            return Ok(tile);
        }

        let stream = self.streams.tile_stream(placement.tile)?;
        let (width, height) = self.streams.tile_size(placement.tile.source);
        let decoded = self.decoder.decode(&stream, width, height, scale_denom)?;

        let (expected_width, expected_height) = scaled_size(width, height, scale_denom);
        if decoded.width != expected_width
            || decoded.height != expected_height
            || decoded.pixels.len() != decoded.width as usize * decoded.height as usize
        {
            return Err(DecodeError::DimensionMismatch {
                expected_width,
                expected_height,
                actual_width: decoded.width,
                actual_height: decoded.height,
            }
            .into());
        }

        Ok(self.cache.put(key, decoded))
    }
}

/// Narrow a placement's clip to the part inside the level.
fn clip_to_level(placement: &TilePlacement, level: &Level) -> Option<ClipRect> {
    let clip = placement.clip;
    let left = placement.x.saturating_add(clip.x as i64);
    let top = placement.y.saturating_add(clip.y as i64);
    let right = left
        .saturating_add(clip.width as i64)
        .min(level.width.min(i64::MAX as u64) as i64);
    let bottom = top
        .saturating_add(clip.height as i64)
        .min(level.height.min(i64::MAX as u64) as i64);
    let visible_left = left.max(0);
    let visible_top = top.max(0);
    if visible_left >= right || visible_top >= bottom {
        return None;
    }

    Some(ClipRect {
        x: (visible_left - placement.x) as u32,
        y: (visible_top - placement.y) as u32,
        width: (right - visible_left) as u32,
        height: (bottom - visible_top) as u32,
    })
}
