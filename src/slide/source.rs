//! Slide storage and tile sources.
//!
//! A [`SlideSource`] turns the file identifiers named in a layout into range
//! readers. A [`TileSource`] is one coded stream inside such a file, opened
//! by reading and parsing its header.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::error::{IoError, JpegError, SlideError};
use crate::format::jpeg::{parse_header, JpegHeader};
use crate::format::layout::TileSourceSpec;
use crate::io::{FileRangeReader, MemoryRangeReader, RangeReader};

/// First read when looking for a stream header; doubled until SOS is found.
const HEADER_PROBE_SIZE: usize = 4096;

// =============================================================================
// SlideSource Trait
// =============================================================================

/// Creates range readers for the files a slide layout references.
///
/// This abstraction lets slides be opened from local directories, in-memory
/// buffers or any other byte store without tying the engine to one of them.
pub trait SlideSource: Send + Sync {
    /// The type of range reader this source creates.
    type Reader: RangeReader + 'static;

    /// Create a range reader for the given file identifier.
    fn create_reader(&self, file: &str) -> Result<Self::Reader, IoError>;
}

/// Files below a local directory.
#[derive(Debug, Clone)]
pub struct LocalSlideSource {
    root: PathBuf,
}

impl LocalSlideSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory that file identifiers are resolved against.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SlideSource for LocalSlideSource {
    type Reader = FileRangeReader;

    fn create_reader(&self, file: &str) -> Result<Self::Reader, IoError> {
        let relative = Path::new(file);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(IoError::NotFound(format!(
                "{} is not a path below {}",
                file,
                self.root.display()
            )));
        }
        FileRangeReader::open(self.root.join(relative))
    }
}

/// Files held in memory, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct MemorySlideSource {
    files: HashMap<String, Bytes>,
}

impl MemorySlideSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn insert(&mut self, file: impl Into<String>, data: impl Into<Bytes>) {
        self.files.insert(file.into(), data.into());
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_file(mut self, file: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(file, data);
        self
    }
}

impl SlideSource for MemorySlideSource {
    type Reader = MemoryRangeReader;

    fn create_reader(&self, file: &str) -> Result<Self::Reader, IoError> {
        let data = self
            .files
            .get(file)
            .ok_or_else(|| IoError::NotFound(file.to_string()))?;
        Ok(MemoryRangeReader::new(format!("mem://{}", file), data.clone()))
    }
}

// =============================================================================
// Tile Source
// =============================================================================

/// One opened coded stream.
///
/// Everything here is fixed at open time; the stream's restart offsets live
/// in the slide's marker index.
pub struct TileSource {
    /// Position in the layout's source list
    pub index: usize,
    /// File identifier from the layout
    pub file: String,
    /// Offset of the stream's SOI marker
    pub start: u64,
    /// Exclusive end of the stream
    pub end: u64,
    pub tile_width: u32,
    pub tile_height: u32,
    /// Tiles per row of the stream
    pub tiles_across: u32,
    pub tile_count: usize,
    /// Frame dimensions declared by the stream
    pub frame_width: u16,
    pub frame_height: u16,
    /// Stream bytes `[start, start + header.len())`, SOI through SOS
    pub header: Bytes,
    /// Offset of the frame header within `header`
    pub frame_offset: usize,
    pub(crate) reader: Arc<dyn RangeReader>,
}

impl std::fmt::Debug for TileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSource")
            .field("index", &self.index)
            .field("file", &self.file)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("tile_width", &self.tile_width)
            .field("tile_height", &self.tile_height)
            .field("tile_count", &self.tile_count)
            .field("header_len", &self.header.len())
            .finish()
    }
}

impl TileSource {
    /// Read the stream header of `spec` and settle its tile geometry.
    ///
    /// Geometry missing from `spec` is derived from the restart interval; a
    /// stream without restart markers is a single tile covering the frame.
    pub fn open(
        index: usize,
        spec: &TileSourceSpec,
        reader: Arc<dyn RangeReader>,
    ) -> Result<Self, SlideError> {
        let size = reader.size();
        let end = spec.end.unwrap_or(size);
        if spec.start >= end || end > size {
            return Err(SlideError::InvalidLayout(format!(
                "tile source {} spans [{}, {}) in {} bytes of {}",
                index,
                spec.start,
                end,
                size,
                reader.identifier()
            )));
        }

        let (header, jpeg) = read_stream_header(reader.as_ref(), spec.start, end)?;

        let (tile_width, tile_height, tiles_across, tile_count) =
            match jpeg.restart_tile_geometry() {
                Ok(g) => (
                    spec.tile_width.unwrap_or(g.tile_width),
                    spec.tile_height.unwrap_or(g.tile_height),
                    g.tiles_across,
                    spec.tile_count.unwrap_or(g.tile_count),
                ),
                Err(_) if jpeg.restart_interval == 0 => (
                    spec.tile_width.unwrap_or(jpeg.width as u32),
                    spec.tile_height.unwrap_or(jpeg.height as u32),
                    1,
                    spec.tile_count.unwrap_or(1),
                ),
                Err(e) => match (spec.tile_width, spec.tile_height, spec.tile_count) {
                    (Some(w), Some(h), Some(n)) => {
                        let across = (jpeg.width as u32 / w.max(1)).clamp(1, n.max(1));
                        (w, h, across, n)
                    }
                    _ => return Err(e.into()),
                },
            };
        if tile_width == 0 || tile_height == 0 || tile_count == 0 {
            return Err(SlideError::InvalidLayout(format!(
                "tile source {} has {} tiles of {}x{}",
                index, tile_count, tile_width, tile_height
            )));
        }
        // Every tile after the first starts behind a two-byte restart marker
        let scan_bytes = end - (spec.start + header.len() as u64);
        if (tile_count as u64 - 1) > scan_bytes / 2 {
            return Err(SlideError::InvalidLayout(format!(
                "tile source {} claims {} tiles but has {} bytes of coded data",
                index, tile_count, scan_bytes
            )));
        }
        if spec.hints.len() > tile_count as usize {
            return Err(SlideError::InvalidLayout(format!(
                "tile source {} has {} hints for {} tiles",
                index,
                spec.hints.len(),
                tile_count
            )));
        }

        debug!(
            source = index,
            file = %spec.file,
            tile_width,
            tile_height,
            tile_count,
            restart_interval = jpeg.restart_interval,
            "opened tile source"
        );

        Ok(Self {
            index,
            file: spec.file.clone(),
            start: spec.start,
            end,
            tile_width,
            tile_height,
            tiles_across: tiles_across.min(tile_count),
            tile_count: tile_count as usize,
            frame_width: jpeg.width,
            frame_height: jpeg.height,
            header,
            frame_offset: jpeg.frame_offset,
            reader,
        })
    }

    /// Offset of slot 0: the first entropy-coded byte of the stream.
    pub fn scan_start(&self) -> u64 {
        self.start + self.header.len() as u64
    }

    /// The range reader the stream is read through.
    pub fn reader(&self) -> &dyn RangeReader {
        self.reader.as_ref()
    }
}

/// Read `[start, ..)` until the whole header through SOS has been seen.
fn read_stream_header(
    reader: &dyn RangeReader,
    start: u64,
    end: u64,
) -> Result<(Bytes, JpegHeader), SlideError> {
    let available = (end - start).min(usize::MAX as u64) as usize;
    let mut window = HEADER_PROBE_SIZE.min(available);

    loop {
        let bytes = reader.read_exact_at(start, window)?;
        match parse_header(&bytes) {
            Ok(header) => {
                if header.scan_start >= available {
                    // Nothing after SOS: no tile data at all
                    return Err(JpegError::Truncated {
                        offset: header.scan_start,
                    }
                    .into());
                }
                return Ok((bytes.slice(..header.scan_start), header));
            }
            Err(JpegError::Truncated { .. }) if window < available => {
                window = window.saturating_mul(2).min(available);
            }
            Err(e) => return Err(e.into()),
        }
    }
}
