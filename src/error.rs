use thiserror::Error;

use crate::tile::Region;

/// I/O errors raised by the storage layer.
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from the underlying file or device
    #[error("I/O error: {0}")]
    Io(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// The resource ended before the requested number of bytes could be read
    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            _ => IoError::Io(err.to_string()),
        }
    }
}

/// Errors found while walking the marker segments of a JPEG stream header.
#[derive(Debug, Clone, Error)]
pub enum JpegError {
    /// Stream does not start with SOI (FFD8)
    #[error("Missing SOI marker: stream starts with 0x{0:04X}")]
    MissingSoi(u16),

    /// A marker segment runs past the end of the available bytes
    #[error("Truncated JPEG header at offset {offset}")]
    Truncated { offset: usize },

    /// Expected a marker but found a data byte
    #[error("Expected marker at offset {offset}, found 0x{byte:02X}")]
    ExpectedMarker { offset: usize, byte: u8 },

    /// No frame header (SOFn) before the scan
    #[error("No frame header before start of scan")]
    MissingFrame,

    /// End of image reached without a scan header
    #[error("No start of scan marker in stream header")]
    MissingScan,

    /// Frame type that cannot be randomly accessed
    #[error("Unsupported frame type: SOF marker 0x{0:02X}")]
    UnsupportedFrame(u8),

    /// Restart interval does not describe a usable tile layout
    #[error("Unusable restart geometry: {0}")]
    RestartGeometry(String),
}

/// Errors returned across the external codec boundary.
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    /// The codec rejected the stream
    #[error("Codec error: {0}")]
    Codec(String),

    /// The decoded image does not have the expected size
    #[error("Decoded tile is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// Scale denominator the codec cannot apply
    #[error("Invalid scale denominator: {0}")]
    InvalidScale(u32),

    /// Pixel buffer allocation failed
    #[error("Failed to allocate {bytes} bytes for decoded tile")]
    Allocation { bytes: usize },
}

/// Errors raised by an open slide.
#[derive(Debug, Clone, Error)]
pub enum SlideError {
    /// Storage error
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Malformed stream header
    #[error("JPEG error: {0}")]
    Jpeg(#[from] JpegError),

    /// Tile decode failure
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The coded stream ended before the requested restart marker was found
    #[error(
        "Tile source {tile_source} ended at offset {offset} before restart marker {target} \
         (found {found} of {tile_count})"
    )]
    TruncatedStream {
        tile_source: usize,
        target: usize,
        found: usize,
        tile_count: usize,
        offset: u64,
    },

    /// A recorded restart offset is not preceded by a restart marker
    #[error("Tile source {tile_source}: slot {slot} at offset {offset} does not follow a restart marker")]
    BadRestartMarker {
        tile_source: usize,
        slot: usize,
        offset: u64,
    },

    /// Byte range of a tile is inconsistent with its stream header
    #[error(
        "Tile source {tile_source}: cannot assemble tile from header [{header_start}, {header_stop}) \
         and data [{start}, {stop})"
    )]
    InvalidTileRange {
        tile_source: usize,
        header_start: u64,
        header_stop: u64,
        start: u64,
        stop: u64,
    },

    /// Tile index outside the tile source
    #[error("Tile {tile} out of range for tile source {tile_source} with {tile_count} tiles")]
    TileOutOfRange {
        tile_source: usize,
        tile: usize,
        tile_count: usize,
    },

    /// Tile source index outside the slide
    #[error("Invalid tile source {tile_source}: slide has {source_count} tile sources")]
    InvalidTileSource {
        tile_source: usize,
        source_count: usize,
    },

    /// Level index outside the pyramid
    #[error("Invalid level {level}: slide has {level_count} levels")]
    InvalidLevel { level: usize, level_count: usize },

    /// Region with negative size or a destination buffer that is too small
    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    /// Engine settings rejected at open time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Slide layout rejected at open time
    #[error("Invalid slide layout: {0}")]
    InvalidLayout(String),

    /// Allocation of a destination or decode buffer failed
    #[error("Out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    /// Background worker failed to start or finish
    #[error("Worker error: {0}")]
    Worker(String),
}

impl SlideError {
    /// Whether this error means the slide's coded data is unusable.
    ///
    /// A slide that hits one of these transitions to its terminal failed state.
    pub fn is_source_corruption(&self) -> bool {
        match self {
            SlideError::Jpeg(_)
            | SlideError::TruncatedStream { .. }
            | SlideError::BadRestartMarker { .. }
            | SlideError::InvalidTileRange { .. } => true,
            SlideError::Decode(err) => !matches!(err, DecodeError::Allocation { .. }),
            SlideError::Io(err) => matches!(err, IoError::ShortRead { .. }),
            _ => false,
        }
    }
}

/// A region read that did not fully succeed.
///
/// `partial` holds every tile that was composited before and after the
/// failure; pixels of failed tiles are left transparent.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct RegionError {
    pub error: SlideError,
    pub partial: Region,
}
