//! Codec boundary for tile decoding.
//!
//! The engine never decodes entropy-coded data itself. It hands a complete,
//! self-contained stream to a [`TileDecoder`] together with the tile size it
//! expects and a scale denominator, and gets premultiplied ARGB pixels back.
//! Every decode is fallible; codec errors come back as [`DecodeError`].

use std::io::Cursor;

use image::{ImageFormat, ImageReader, RgbImage};

use crate::error::DecodeError;
use crate::format::jpeg::{parse_header, patch_frame_dimensions};

/// Largest frame dimension accepted by the JPEG codec.
pub const JPEG_MAX_DIMENSION: u16 = 65500;

/// Scale denominators a decoder must support.
pub const SCALE_DENOMINATORS: [u32; 4] = [1, 2, 4, 8];

// =============================================================================
// Decoded Tile
// =============================================================================

/// Decoded tile pixels, premultiplied ARGB (`0xAARRGGBB`), row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTile {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl DecodedTile {
    pub fn new(width: u32, height: u32, pixels: Vec<u32>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Size of the pixel buffer in bytes, as charged against cache capacity.
    pub fn byte_size(&self) -> usize {
        self.pixels.len() * 4
    }

    /// Pixel at (`x`, `y`).
    ///
    /// # Panics
    /// Panics if the coordinates are outside the tile.
    pub fn pixel(&self, x: u32, y: u32) -> u32 {
        self.pixels[(y * self.width + x) as usize]
    }
}

// =============================================================================
// Decoder Contract
// =============================================================================

/// Decodes one self-contained tile stream.
pub trait TileDecoder: Send + Sync {
    /// Decode `data`, a complete coded stream for a `width` x `height` tile,
    /// at 1/`scale_denom` scale.
    ///
    /// The result must be `width / scale_denom` x `height / scale_denom`
    /// (rounded up) pixels.
    fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        scale_denom: u32,
    ) -> Result<DecodedTile, DecodeError>;
}

/// Size of a tile decoded at 1/`scale_denom`.
pub fn scaled_size(width: u32, height: u32, scale_denom: u32) -> (u32, u32) {
    (width.div_ceil(scale_denom), height.div_ceil(scale_denom))
}

// =============================================================================
// JPEG Decoder
// =============================================================================

/// Tile decoder backed by the `image` crate's baseline JPEG codec.
///
/// The stream's frame header is rewritten to the expected tile size before
/// decoding, so streams cut out of a larger restart-marker image decode as a
/// single tile. Reduced scales are produced by box-filtering the full-size
/// decode.
#[derive(Debug, Clone, Default)]
pub struct JpegTileDecoder;

impl JpegTileDecoder {
    /// Create a new JPEG tile decoder.
    pub fn new() -> Self {
        Self
    }
}

impl TileDecoder for JpegTileDecoder {
    fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        scale_denom: u32,
    ) -> Result<DecodedTile, DecodeError> {
        if !SCALE_DENOMINATORS.contains(&scale_denom) {
            return Err(DecodeError::InvalidScale(scale_denom));
        }
        let (frame_width, frame_height) = match (u16::try_from(width), u16::try_from(height)) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 && w <= JPEG_MAX_DIMENSION && h <= JPEG_MAX_DIMENSION => {
                (w, h)
            }
            _ => {
                return Err(DecodeError::Codec(format!(
                    "tile size {}x{} not representable in a JPEG frame",
                    width, height
                )))
            }
        };

        let header = parse_header(data).map_err(|e| DecodeError::Codec(e.to_string()))?;
        let mut stream = data.to_vec();
        patch_frame_dimensions(&mut stream, header.frame_offset, frame_width, frame_height)
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        let reader = ImageReader::with_format(Cursor::new(stream), ImageFormat::Jpeg);
        let img = reader
            .decode()
            .map_err(|e| DecodeError::Codec(e.to_string()))?;

        let rgb = img.to_rgb8();
        if rgb.dimensions() != (width, height) {
            return Err(DecodeError::DimensionMismatch {
                expected_width: width,
                expected_height: height,
                actual_width: rgb.width(),
                actual_height: rgb.height(),
            });
        }

        let (out_width, out_height) = scaled_size(width, height, scale_denom);
        let scaled = if scale_denom == 1 {
            rgb
        } else {
            image::imageops::thumbnail(&rgb, out_width, out_height)
        };

        pack_argb(&scaled)
    }
}

/// Convert opaque RGB pixels to ARGB words.
fn pack_argb(rgb: &RgbImage) -> Result<DecodedTile, DecodeError> {
    let count = rgb.width() as usize * rgb.height() as usize;
    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(count)
        .map_err(|_| DecodeError::Allocation { bytes: count * 4 })?;

    pixels.extend(
        rgb.pixels()
            .map(|p| 0xFF00_0000 | (p[0] as u32) << 16 | (p[1] as u32) << 8 | p[2] as u32),
    );

    Ok(DecodedTile::new(rgb.width(), rgb.height(), pixels))
}

// =============================================================================
// Tests
// =============================================================================
