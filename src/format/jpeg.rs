//! JPEG stream header handling.
//!
//! Slides store each level as one large baseline JPEG whose restart interval
//! equals the MCU count of a single tile. Every restart marker then starts a
//! new tile, and a tile can be decoded on its own by splicing its entropy-coded
//! bytes behind the stream header.
//!
//! # Stream Layout
//!
//! ```text
//! SOI | DQT DHT SOF DRI ... | SOS | tile 0 | RSTn | tile 1 | RSTn | ... | EOI
//! ^ start                         ^ scan_start
//! ```
//!
//! This module walks marker segments up to SOS to learn the frame geometry,
//! the restart interval and where entropy-coded data begins.

use crate::error::JpegError;
use crate::io::read_u16_be;

// =============================================================================
// JPEG Markers
// =============================================================================

/// Marker prefix byte
pub const MARKER_PREFIX: u8 = 0xFF;

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Start Of Frame (baseline DCT) marker
pub const SOF0: [u8; 2] = [0xFF, 0xC0];

/// Start Of Frame (extended sequential DCT) marker
pub const SOF1: [u8; 2] = [0xFF, 0xC1];

/// Define Huffman Table marker
pub const DHT: [u8; 2] = [0xFF, 0xC4];

/// Define Quantization Table marker
pub const DQT: [u8; 2] = [0xFF, 0xDB];

/// Define Restart Interval marker
pub const DRI: [u8; 2] = [0xFF, 0xDD];

/// Start Of Scan marker
pub const SOS: [u8; 2] = [0xFF, 0xDA];

/// First restart marker code (RST0)
pub const RST0: u8 = 0xD0;

/// Last restart marker code (RST7)
pub const RST7: u8 = 0xD7;

/// Whether `code` (the byte after 0xFF) is one of RST0..RST7.
#[inline]
pub fn is_restart_marker(code: u8) -> bool {
    (RST0..=RST7).contains(&code)
}

/// Whether `code` is a start-of-frame marker (C0..CF minus DHT, JPG and DAC).
#[inline]
fn is_frame_marker(code: u8) -> bool {
    (0xC0..=0xCF).contains(&code) && code != 0xC4 && code != 0xC8 && code != 0xCC
}

/// Markers that carry no length field.
#[inline]
fn is_standalone_marker(code: u8) -> bool {
    code == 0x01 || is_restart_marker(code)
}

// =============================================================================
// Header Parsing
// =============================================================================

/// Geometry and layout of a JPEG stream, read from its marker segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegHeader {
    /// Image width declared by the frame header
    pub width: u16,
    /// Image height declared by the frame header
    pub height: u16,
    /// Number of colour components
    pub components: u8,
    /// MCUs between restart markers (0 when no DRI segment is present)
    pub restart_interval: u16,
    /// MCU width in pixels
    pub mcu_width: u32,
    /// MCU height in pixels
    pub mcu_height: u32,
    /// Offset of the frame header marker (FFCn) from the start of the stream
    pub frame_offset: usize,
    /// Offset of the first entropy-coded byte, just past the SOS segment
    pub scan_start: usize,
}

/// Tile geometry implied by a stream's restart interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartGeometry {
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_across: u32,
    pub tiles_down: u32,
    pub tile_count: u32,
}

/// Parse a JPEG stream header from SOI up to and including SOS.
///
/// `data` only needs to cover the header; entropy-coded data past SOS is not
/// inspected. Returns [`JpegError::Truncated`] when `data` ends before SOS,
/// which callers use to grow their read window.
pub fn parse_header(data: &[u8]) -> Result<JpegHeader, JpegError> {
    if data.len() < 2 {
        return Err(JpegError::Truncated { offset: 0 });
    }
    if data[0..2] != SOI {
        return Err(JpegError::MissingSoi(read_u16_be(data)));
    }

    let mut frame: Option<(usize, u16, u16, u8, u32, u32)> = None;
    let mut restart_interval = 0u16;
    let mut pos = 2;

    loop {
        if pos + 2 > data.len() {
            return Err(JpegError::Truncated { offset: pos });
        }
        if data[pos] != MARKER_PREFIX {
            return Err(JpegError::ExpectedMarker {
                offset: pos,
                byte: data[pos],
            });
        }

        // Fill bytes: any number of 0xFF may precede a marker code
        if data[pos + 1] == MARKER_PREFIX {
            pos += 1;
            continue;
        }

        let code = data[pos + 1];
        if is_standalone_marker(code) {
            pos += 2;
            continue;
        }
        if [MARKER_PREFIX, code] == EOI {
            return Err(JpegError::MissingScan);
        }

        if pos + 4 > data.len() {
            return Err(JpegError::Truncated { offset: pos });
        }
        let length = read_u16_be(&data[pos + 2..]) as usize;
        let segment_end = pos + 2 + length;
        if length < 2 || segment_end > data.len() {
            return Err(JpegError::Truncated { offset: pos });
        }
        let body = &data[pos + 4..segment_end];

        match [MARKER_PREFIX, code] {
            SOF0 | SOF1 => frame = Some(parse_frame(pos, body)?),
            _ if is_frame_marker(code) => return Err(JpegError::UnsupportedFrame(code)),
            DRI => {
                if body.len() < 2 {
                    return Err(JpegError::Truncated { offset: pos });
                }
                restart_interval = read_u16_be(body);
            }
            SOS => {
                let (frame_offset, width, height, components, mcu_width, mcu_height) =
                    frame.ok_or(JpegError::MissingFrame)?;
                return Ok(JpegHeader {
                    width,
                    height,
                    components,
                    restart_interval,
                    mcu_width,
                    mcu_height,
                    frame_offset,
                    scan_start: segment_end,
                });
            }
            _ => {}
        }

        pos = segment_end;
    }
}

/// Decode a SOF segment body: precision, height, width, components.
fn parse_frame(
    offset: usize,
    body: &[u8],
) -> Result<(usize, u16, u16, u8, u32, u32), JpegError> {
    if body.len() < 6 {
        return Err(JpegError::Truncated { offset });
    }
    let height = read_u16_be(&body[1..]);
    let width = read_u16_be(&body[3..]);
    let components = body[5];
    if body.len() < 6 + 3 * components as usize {
        return Err(JpegError::Truncated { offset });
    }

    let (mut max_h, mut max_v) = (1u32, 1u32);
    for c in 0..components as usize {
        let sampling = body[6 + 3 * c + 1];
        max_h = max_h.max((sampling >> 4) as u32);
        max_v = max_v.max((sampling & 0x0F) as u32);
    }

    // Single-component scans are never interleaved
    if components == 1 {
        max_h = 1;
        max_v = 1;
    }

    Ok((offset, width, height, components, 8 * max_h, 8 * max_v))
}

impl JpegHeader {
    /// Number of MCUs in one row of the image.
    pub fn mcus_per_row(&self) -> u32 {
        (self.width as u32).div_ceil(self.mcu_width)
    }

    /// Number of MCU rows in the scan.
    pub fn mcu_rows(&self) -> u32 {
        (self.height as u32).div_ceil(self.mcu_height)
    }

    /// Derive the tile layout implied by the restart interval.
    ///
    /// The interval must be non-zero, no wider than one MCU row and must
    /// divide the row evenly, so every tile spans exactly one MCU row.
    pub fn restart_tile_geometry(&self) -> Result<RestartGeometry, JpegError> {
        let interval = self.restart_interval as u32;
        if interval == 0 {
            return Err(JpegError::RestartGeometry(
                "stream has no restart interval".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(JpegError::RestartGeometry(format!(
                "frame declares {}x{} pixels",
                self.width, self.height
            )));
        }

        let mcus_per_row = self.mcus_per_row();
        if interval > mcus_per_row {
            return Err(JpegError::RestartGeometry(format!(
                "restart interval {} greater than {} MCUs per row",
                interval, mcus_per_row
            )));
        }
        if mcus_per_row % interval != 0 {
            return Err(JpegError::RestartGeometry(format!(
                "restart interval {} leaves {} MCUs at the end of each row",
                interval,
                mcus_per_row % interval
            )));
        }

        let tiles_across = mcus_per_row / interval;
        let tile_width = self.width as u32 / tiles_across;
        let tile_height = self.height as u32 / self.mcu_rows();
        if tile_width == 0 || tile_height == 0 {
            return Err(JpegError::RestartGeometry(format!(
                "tiles would be {}x{} pixels",
                tile_width, tile_height
            )));
        }
        let tiles_down = self.height as u32 / tile_height;

        Ok(RestartGeometry {
            tile_width,
            tile_height,
            tiles_across,
            tiles_down,
            tile_count: tiles_across * tiles_down,
        })
    }
}

// =============================================================================
// Frame Patching
// =============================================================================

/// Rewrite the height and width fields of the frame header at `frame_offset`.
///
/// Returns [`JpegError::Truncated`] if the frame header does not fit in `buf`.
pub fn patch_frame_dimensions(
    buf: &mut [u8],
    frame_offset: usize,
    width: u16,
    height: u16,
) -> Result<(), JpegError> {
    if frame_offset + 9 > buf.len() {
        return Err(JpegError::Truncated {
            offset: frame_offset,
        });
    }
    buf[frame_offset + 5..frame_offset + 7].copy_from_slice(&height.to_be_bytes());
    buf[frame_offset + 7..frame_offset + 9].copy_from_slice(&width.to_be_bytes());
    Ok(())
}

/// Read the height and width fields of the frame header at `frame_offset`.
pub fn frame_dimensions(buf: &[u8], frame_offset: usize) -> Option<(u16, u16)> {
    if frame_offset + 9 > buf.len() {
        return None;
    }
    let height = read_u16_be(&buf[frame_offset + 5..]);
    let width = read_u16_be(&buf[frame_offset + 7..]);
    Some((width, height))
}

// =============================================================================
// Tests
// =============================================================================
