//! Region buffers and paint-over compositing.
//!
//! Pixels are premultiplied ARGB packed as `0xAARRGGBB`. Painting a tile uses
//! the standard "over" operator, `dst = src + dst * (1 - src_alpha)`, so
//! opaque tiles replace what is underneath and transparent pixels leave the
//! destination untouched.

use image::{Rgba, RgbaImage};

use crate::error::SlideError;
use crate::grid::ClipRect;

use super::DecodedTile;

/// Pixels read from one level, premultiplied ARGB, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Region {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl Region {
    /// Allocate a fully transparent region.
    ///
    /// Returns [`SlideError::OutOfMemory`] if the buffer cannot be allocated.
    pub fn new(width: u32, height: u32) -> Result<Self, SlideError> {
        let count = width as usize * height as usize;
        let mut pixels = Vec::new();
        pixels
            .try_reserve_exact(count)
            .map_err(|_| SlideError::OutOfMemory {
                bytes: count.saturating_mul(4),
            })?;
        pixels.resize(count, 0);

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Pixel at (`x`, `y`).
    ///
    /// # Panics
    /// Panics if the coordinates are outside the region.
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[(y as usize) * (self.width as usize) + x as usize]
    }

    /// Convert to straight-alpha RGBA.
    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            let p = self.pixel(x, y);
            let a = p >> 24;
            if a == 0 {
                return Rgba([0, 0, 0, 0]);
            }
            let unmultiply = |c: u32| ((c * 255 + a / 2) / a).min(255) as u8;
            Rgba([
                unmultiply((p >> 16) & 0xFF),
                unmultiply((p >> 8) & 0xFF),
                unmultiply(p & 0xFF),
                a as u8,
            ])
        })
    }
}

/// Composite `src` over `dst`, both premultiplied ARGB.
#[inline]
pub fn paint_over(dst: u32, src: u32) -> u32 {
    let src_alpha = src >> 24;
    if src_alpha == 0xFF {
        return src;
    }
    if src_alpha == 0 {
        return dst;
    }

    let inverse = 255 - src_alpha;
    let mut out = 0u32;
    for shift in [0, 8, 16, 24] {
        let s = (src >> shift) & 0xFF;
        let d = (dst >> shift) & 0xFF;
        let c = (s + (d * inverse + 127) / 255).min(255);
        out |= c << shift;
    }
    out
}

/// Paint the `clip` part of `tile` into `dest`.
///
/// Tile pixel (`tx`, `ty`) lands on destination pixel
/// (`dest_x + tx`, `dest_y + ty`); anything outside `dest` is dropped.
pub fn composite_tile(dest: &mut Region, tile: &DecodedTile, dest_x: i64, dest_y: i64, clip: ClipRect) {
    let clip_right = (clip.x as i64 + clip.width as i64).min(tile.width as i64);
    let clip_bottom = (clip.y as i64 + clip.height as i64).min(tile.height as i64);

    // Tile columns and rows that land inside the destination
    let tx_start = (clip.x as i64).max(dest_x.saturating_neg());
    let tx_end = clip_right.min((dest.width as i64).saturating_sub(dest_x));
    let ty_start = (clip.y as i64).max(dest_y.saturating_neg());
    let ty_end = clip_bottom.min((dest.height as i64).saturating_sub(dest_y));
    if tx_start >= tx_end || ty_start >= ty_end {
        return;
    }

    let span = (tx_end - tx_start) as usize;
    for ty in ty_start..ty_end {
        let src_row = (ty as usize) * tile.width as usize + tx_start as usize;
        let dst_row = ((dest_y + ty) as usize) * dest.width as usize + (dest_x + tx_start) as usize;
        let src = &tile.pixels[src_row..src_row + span];
        let dst = &mut dest.pixels[dst_row..dst_row + span];
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = paint_over(*d, s);
        }
    }
}
