//! Test utilities for integration tests.
//!
//! This module provides a builder for synthetic restart-marker streams, mock
//! decoders and readers that track or slow down requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use tracing_subscriber::EnvFilter;

use wsi_region::error::{DecodeError, IoError};
use wsi_region::io::RangeReader;
use wsi_region::slide::SlideSource;
use wsi_region::tile::{scaled_size, DecodedTile, TileDecoder};
use wsi_region::Config;

// =============================================================================
// Logging
// =============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber once; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wsi_region=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// =============================================================================
// Synthetic Restart-Marker Streams
// =============================================================================

/// Pixel size of one synthetic tile.
pub const TILE_WIDTH: u32 = 16;
pub const TILE_HEIGHT: u32 = 8;

/// A single-component baseline stream cut into restart intervals.
pub struct RestartStream {
    pub data: Vec<u8>,
    /// File offset of each tile's first entropy-coded byte
    pub offsets: Vec<u64>,
    pub tiles_across: u16,
    pub tiles_down: u16,
}

impl RestartStream {
    pub fn width(&self) -> u64 {
        self.tiles_across as u64 * TILE_WIDTH as u64
    }

    pub fn height(&self) -> u64 {
        self.tiles_down as u64 * TILE_HEIGHT as u64
    }

    /// Cut the stream after `tiles` tiles and terminate it with EOI, while
    /// the header still promises every tile.
    pub fn truncated(mut self, tiles: usize) -> Self {
        let cut = self.offsets[tiles] as usize - 2;
        self.data.truncate(cut);
        self.data.extend_from_slice(&[0xFF, 0xD9]);
        self.offsets.truncate(tiles);
        self
    }
}

/// Value that tile `i` decodes to under [`ValueDecoder`].
pub fn tile_value(i: usize) -> u8 {
    (i % 250) as u8 + 1
}

/// Build a stream of `across` x `down` tiles of 16x8 pixels.
///
/// Each tile holds `tile_bytes` bytes of entropy-coded data, the last of
/// which is [`tile_value`] of the tile. Restart markers cycle RST0..RST7.
pub fn restart_stream(across: u16, down: u16, tile_bytes: usize) -> RestartStream {
    assert!(tile_bytes >= 1);
    let width = across * TILE_WIDTH as u16;
    let height = down * TILE_HEIGHT as u16;

    let mut data = vec![0xFF, 0xD8];
    // Quantization table stub
    data.extend_from_slice(&[0xFF, 0xDB, 0x00, 0x04, 0x00, 0x01]);
    data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x0B, 0x08]);
    data.extend_from_slice(&height.to_be_bytes());
    data.extend_from_slice(&width.to_be_bytes());
    data.extend_from_slice(&[0x01, 0x01, 0x11, 0x00]);
    // Two 8x8 MCUs per restart interval
    data.extend_from_slice(&[0xFF, 0xDD, 0x00, 0x04, 0x00, 0x02]);
    data.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00]);

    let count = across as usize * down as usize;
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        offsets.push(data.len() as u64);
        data.extend(std::iter::repeat(0x10).take(tile_bytes - 1));
        data.push(tile_value(i));
        if i + 1 < count {
            data.extend_from_slice(&[0xFF, 0xD0 + (i % 8) as u8]);
        }
    }
    data.extend_from_slice(&[0xFF, 0xD9]);

    RestartStream {
        data,
        offsets,
        tiles_across: across,
        tiles_down: down,
    }
}

/// Encode a solid-colour baseline JPEG.
pub fn encode_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut output = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut output, 95);
    encoder.encode_image(&img).unwrap();
    output
}

/// Encode a baseline JPEG of `across` x `down` solid 16x8 tiles, each its
/// own restart interval. Tile `i` is `colours[i]`.
pub fn encode_restart_jpeg(across: u16, down: u16, colours: &[[u8; 3]]) -> Vec<u8> {
    let width = across * TILE_WIDTH as u16;
    let height = down * TILE_HEIGHT as u16;
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let tile = (y / TILE_HEIGHT as usize) * across as usize + x / TILE_WIDTH as usize;
            rgb.extend_from_slice(&colours[tile]);
        }
    }

    let mut output = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut output, 100);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::F_1_1);
    // Two 8x8 MCUs per 16x8 tile
    encoder.set_restart_interval(2);
    encoder
        .encode(&rgb, width, height, jpeg_encoder::ColorType::Rgb)
        .unwrap();
    output
}

/// Settings for deterministic tests: no scanner, no derived levels, no
/// block cache.
pub fn test_config() -> Config {
    Config {
        background_scan: false,
        scaled_levels: false,
        cache_blocks: 0,
        ..Config::default()
    }
}

// =============================================================================
// Mock Decoders
// =============================================================================

/// Opaque grey of level `v`.
pub fn grey(v: u8) -> u32 {
    let v = v as u32;
    0xFF00_0000 | v << 16 | v << 8 | v
}

/// Decodes a synthetic tile to solid grey of its value byte.
///
/// The value byte sits just before the EOI that ends every tile stream.
pub struct ValueDecoder;

impl TileDecoder for ValueDecoder {
    fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        scale_denom: u32,
    ) -> Result<DecodedTile, DecodeError> {
        if data.len() < 3 || data[data.len() - 2..] != [0xFF, 0xD9] {
            return Err(DecodeError::Codec("stream does not end with EOI".into()));
        }
        let v = data[data.len() - 3];
        let (w, h) = scaled_size(width, height, scale_denom);
        Ok(DecodedTile::new(w, h, vec![grey(v); (w * h) as usize]))
    }
}

/// A [`ValueDecoder`] that blocks every decode until opened.
#[derive(Default)]
pub struct GatedDecoder {
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicBool,
}

impl GatedDecoder {
    /// Whether a decode has started.
    pub fn entered(&self) -> bool {
        self.entered.load(Ordering::SeqCst)
    }

    /// Let blocked and future decodes proceed.
    pub fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl TileDecoder for GatedDecoder {
    fn decode(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        scale_denom: u32,
    ) -> Result<DecodedTile, DecodeError> {
        self.entered.store(true, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        drop(open);
        ValueDecoder.decode(data, width, height, scale_denom)
    }
}

// =============================================================================
// Mock Range Reader with Request Tracking
// =============================================================================

/// An in-memory reader that counts requests and can be slowed down.
///
/// Clones share their counters.
#[derive(Clone)]
pub struct TrackingMockReader {
    data: Bytes,
    identifier: String,
    request_count: Arc<AtomicUsize>,
    delay: Duration,
}

impl TrackingMockReader {
    pub fn new(data: impl Into<Bytes>, identifier: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            identifier: identifier.into(),
            request_count: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` on every read.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn reset_tracking(&self) {
        self.request_count.store(0, Ordering::SeqCst);
    }
}

impl RangeReader for TrackingMockReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }

        let start = offset as usize;
        let end = start + len;
        if end > self.data.len() {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: self.data.len() as u64,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

// =============================================================================
// Mock Slide Source
// =============================================================================

/// Slide source handing out clones of registered tracking readers.
#[derive(Default)]
pub struct MockSlideSource {
    files: HashMap<String, TrackingMockReader>,
}

impl MockSlideSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reader(mut self, file: impl Into<String>, reader: TrackingMockReader) -> Self {
        self.files.insert(file.into(), reader);
        self
    }

    pub fn with_file(self, file: &str, data: Vec<u8>) -> Self {
        let reader = TrackingMockReader::new(data, format!("mock://{}", file));
        self.with_reader(file, reader)
    }
}

impl SlideSource for MockSlideSource {
    type Reader = TrackingMockReader;

    fn create_reader(&self, file: &str) -> Result<Self::Reader, IoError> {
        self.files
            .get(file)
            .cloned()
            .ok_or_else(|| IoError::NotFound(file.to_string()))
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}
