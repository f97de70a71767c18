//! Synthetic per-tile bitstreams.
//!
//! A tile of a restart-marker stream is decodable on its own once it is
//! given the stream header. The assembled buffer is
//!
//! ```text
//! [header_start, header_stop) ++ [start, stop)
//! ```
//!
//! where `header_stop` is the first entropy-coded byte of the stream and
//! `[start, stop)` runs from the tile's restart offset up to and including the
//! restart marker that ends it. That trailing marker is overwritten with EOI.

use bytes::Bytes;

use crate::error::{JpegError, SlideError};
use crate::format::jpeg::{frame_dimensions, patch_frame_dimensions, EOI};
use crate::io::RangeReader;

use super::decoder::JPEG_MAX_DIMENSION;

/// File ranges that make up one tile's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileStreamRange {
    pub header_start: u64,
    pub header_stop: u64,
    pub start: u64,
    pub stop: u64,
}

/// Assemble the decodable stream for one tile.
///
/// `header` holds the bytes of `[header_start, header_stop)`, already read;
/// the tile data is read through `reader`. `frame_offset` locates the frame
/// header within `header`.
///
/// Frame dimensions of zero or beyond [`JPEG_MAX_DIMENSION`] are replaced by
/// [`JPEG_MAX_DIMENSION`]; the decoder is told the real tile size separately.
pub fn build_tile_stream<R: RangeReader + ?Sized>(
    reader: &R,
    tile_source: usize,
    header: &[u8],
    frame_offset: usize,
    range: TileStreamRange,
) -> Result<Bytes, SlideError> {
    let TileStreamRange {
        header_start,
        header_stop,
        start,
        stop,
    } = range;
    if !(header_start < header_stop && header_stop <= start && start < stop)
        || header.len() as u64 != header_stop - header_start
    {
        return Err(SlideError::InvalidTileRange {
            tile_source,
            header_start,
            header_stop,
            start,
            stop,
        });
    }

    let data_len = (stop - start) as usize;
    let total = header.len() + data_len;
    let mut buf = Vec::new();
    buf.try_reserve_exact(total)
        .map_err(|_| SlideError::OutOfMemory { bytes: total })?;
    buf.extend_from_slice(header);
    buf.extend_from_slice(&reader.read_exact_at(start, data_len)?);

    let (width, height) = frame_dimensions(&buf, frame_offset).ok_or(JpegError::Truncated {
        offset: frame_offset,
    })?;
    let fix = |dim: u16| {
        if dim == 0 || dim > JPEG_MAX_DIMENSION {
            JPEG_MAX_DIMENSION
        } else {
            dim
        }
    };
    if fix(width) != width || fix(height) != height {
        patch_frame_dimensions(&mut buf, frame_offset, fix(width), fix(height))?;
    }

    // The true terminator is the next restart marker
    let len = buf.len();
    if len >= 2 {
        buf[len - 2..].copy_from_slice(&EOI);
    }

    Ok(Bytes::from(buf))
}
