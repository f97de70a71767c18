//! Open slide handle.
//!
//! A [`Slide`] owns everything needed to read pixels from one image: the
//! opened tile sources, the level pyramid, the restart-marker indexes and a
//! handle to a (possibly shared) tile cache. Reads may be issued from any
//! number of threads at once.
//!
//! # Failed state
//!
//! The first source-corruption error a slide hits, in the foreground or in
//! the background scanner, is stored. From then on every operation that would
//! touch the file returns that error instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{RegionError, SlideError};
use crate::format::layout::{GridSpec, LevelSpec, SlideLayout};
use crate::format::restart::RestartIndex;
use crate::grid::{ClipRect, RangeGrid, SimpleGrid, SourceTiles, TileGrid, TileMapGrid, TileRef};
use crate::io::{BlockCache, RangeReader};
use crate::tile::{
    build_tile_stream, JpegTileDecoder, Region, RegionPainter, TileCache, TileDecoder,
    TileStreamRange, TileStreams,
};

use super::level::{best_level_for_downsample, build_pyramid, Level};
use super::scanner::{self, MarkerIndex, ScanOptions, ScannerState};
use super::source::{SlideSource, TileSource};

/// Identifies slides in shared tile caches.
static NEXT_SLIDE_ID: AtomicU64 = AtomicU64::new(1);

/// State shared between the handle and its scanner thread.
struct SlideInner {
    id: u64,
    sources: Vec<TileSource>,
    levels: Vec<Level>,
    markers: MarkerIndex,
    cache: RwLock<Arc<TileCache>>,
    decoder: Arc<dyn TileDecoder>,
    failure: OnceLock<SlideError>,
    config: Config,
}

/// An open slide.
pub struct Slide {
    inner: Arc<SlideInner>,
    scanner: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Slide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slide")
            .field("id", &self.inner.id)
            .field("levels", &self.inner.levels.len())
            .field("sources", &self.inner.sources.len())
            .field("failed", &self.inner.failure.get().is_some())
            .finish()
    }
}

// =============================================================================
// Opening
// =============================================================================

impl Slide {
    /// Open a slide with the default JPEG decoder.
    pub fn open<S: SlideSource>(
        source: &S,
        layout: &SlideLayout,
        config: Config,
    ) -> Result<Self, SlideError> {
        Self::open_with_decoder(source, layout, config, Arc::new(JpegTileDecoder::new()))
    }

    /// Open a slide that decodes tiles with `decoder`.
    pub fn open_with_decoder<S: SlideSource>(
        source: &S,
        layout: &SlideLayout,
        config: Config,
        decoder: Arc<dyn TileDecoder>,
    ) -> Result<Self, SlideError> {
        let started = Instant::now();
        config.validate().map_err(SlideError::InvalidConfig)?;
        layout.validate()?;

        // One reader per distinct file
        let mut readers: HashMap<&str, Arc<dyn RangeReader>> = HashMap::new();
        let mut sources = Vec::with_capacity(layout.sources.len());
        for (i, spec) in layout.sources.iter().enumerate() {
            let reader = match readers.get(spec.file.as_str()) {
                Some(reader) => Arc::clone(reader),
                None => {
                    let reader = open_reader(source, &spec.file, &config)?;
                    readers.insert(spec.file.as_str(), Arc::clone(&reader));
                    reader
                }
            };
            sources.push(TileSource::open(i, spec, reader)?);
        }

        let base = layout
            .levels
            .iter()
            .enumerate()
            .map(|(i, spec)| build_level(i, spec, &sources))
            .collect::<Result<Vec<_>, _>>()?;
        let levels = build_pyramid(base, config.scaled_levels, |s| {
            sources
                .get(s)
                .map_or((0, 0), |t| (t.tile_width, t.tile_height))
        });

        let indexes = sources
            .iter()
            .zip(&layout.sources)
            .map(|(source, spec)| {
                RestartIndex::new(
                    source.index,
                    source.tile_count,
                    source.scan_start(),
                    source.end,
                    spec.hints.clone(),
                )
            })
            .collect();

        let id = NEXT_SLIDE_ID.fetch_add(1, Ordering::Relaxed);
        let needs_scan = sources.iter().any(|s| s.tile_count > 1);
        let inner = Arc::new(SlideInner {
            id,
            sources,
            levels,
            markers: MarkerIndex::new(indexes),
            cache: RwLock::new(Arc::new(TileCache::with_capacity(config.cache_bytes))),
            decoder,
            failure: OnceLock::new(),
            config,
        });

        let slide = Slide {
            inner,
            scanner: Mutex::new(None),
        };

        info!(
            slide = id,
            levels = slide.inner.levels.len(),
            sources = slide.inner.sources.len(),
            width = slide.dimensions().0,
            height = slide.dimensions().1,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "opened slide"
        );

        if slide.inner.config.background_scan && needs_scan {
            slide.start_scanner()?;
        }

        Ok(slide)
    }

    fn start_scanner(&self) -> Result<(), SlideError> {
        let options = ScanOptions {
            throttle: self.inner.config.scanner_throttle(),
            chunk_size: self.inner.config.scan_chunk_size,
        };
        self.inner.markers.mark_running();

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name(format!("wsi-scan-{}", self.inner.id))
            .spawn(move || {
                scanner::run(&inner.markers, &inner.sources, &inner.failure, options)
            });

        match spawned {
            Ok(handle) => {
                debug!(slide = self.inner.id, "restart scanner started");
                *self.scanner.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.inner.markers.mark_stopped();
                Err(SlideError::Worker(format!(
                    "failed to start restart scanner: {}",
                    e
                )))
            }
        }
    }
}

/// Create the reader for one file, block-cached when enabled.
fn open_reader<S: SlideSource>(
    source: &S,
    file: &str,
    config: &Config,
) -> Result<Arc<dyn RangeReader>, SlideError> {
    let reader = source.create_reader(file)?;
    if config.block_cache_enabled() {
        Ok(Arc::new(BlockCache::with_capacity(
            reader,
            config.block_size,
            config.cache_blocks,
        )))
    } else {
        Ok(Arc::new(reader))
    }
}

fn invalid_layout(msg: String) -> SlideError {
    SlideError::InvalidLayout(msg)
}

/// Check that `tile` of `source` exists.
fn check_tile(
    level: usize,
    sources: &[TileSource],
    source: usize,
    tile: usize,
) -> Result<&TileSource, SlideError> {
    let ts = sources.get(source).ok_or_else(|| {
        invalid_layout(format!(
            "level {} references tile source {} of {}",
            level,
            source,
            sources.len()
        ))
    })?;
    if tile >= ts.tile_count {
        return Err(invalid_layout(format!(
            "level {} references tile {} of tile source {} with {} tiles",
            level, tile, source, ts.tile_count
        )));
    }
    Ok(ts)
}

/// Build a base level from its layout entry.
fn build_level(index: usize, spec: &LevelSpec, sources: &[TileSource]) -> Result<Level, SlideError> {
    let grid = match &spec.grid {
        GridSpec::Simple {
            tile_width,
            tile_height,
            tiles_across,
            tiles_down,
            source_columns,
            first_source,
        } => {
            let first = sources.get(*first_source).ok_or_else(|| {
                invalid_layout(format!("level {} has no tile source {}", index, first_source))
            })?;
            let per_source_across = first.tiles_across.max(1);
            let per_source_down = (first.tile_count as u32).div_ceil(per_source_across).max(1);
            let source_rows = tiles_down.div_ceil(per_source_down).max(1);
            let count = (source_columns * source_rows) as usize;
            let used = sources
                .get(*first_source..first_source + count)
                .ok_or_else(|| {
                    invalid_layout(format!(
                        "level {} needs {} tile sources from {}, layout has {}",
                        index,
                        count,
                        first_source,
                        sources.len()
                    ))
                })?;
            if let Some(bad) = used
                .iter()
                .find(|s| (s.tile_width, s.tile_height) != (*tile_width, *tile_height))
            {
                return Err(invalid_layout(format!(
                    "level {} has {}x{} tiles but tile source {} has {}x{}",
                    index, tile_width, tile_height, bad.index, bad.tile_width, bad.tile_height
                )));
            }

            let tiles = used
                .iter()
                .map(|s| SourceTiles {
                    tiles_across: s.tiles_across,
                    tile_count: s.tile_count as u32,
                })
                .collect();
            let grid = SimpleGrid::new(
                *tile_width,
                *tile_height,
                *tiles_across,
                *tiles_down,
                *source_columns,
                *first_source,
                tiles,
            )
            .ok_or_else(|| invalid_layout(format!("level {} has degenerate simple grid", index)))?;
            TileGrid::Simple(grid)
        }

        GridSpec::TileMap {
            tile_advance_x,
            tile_advance_y,
            tiles_across,
            tiles_down,
            tiles,
        } => {
            let mut grid =
                TileMapGrid::new(*tile_advance_x, *tile_advance_y, *tiles_across, *tiles_down)
                    .ok_or_else(|| {
                        invalid_layout(format!("level {} has zero tile advance", index))
                    })?;
            for entry in tiles {
                let ts = check_tile(index, sources, entry.source, entry.tile)?;
                if entry.src_x as u64 + entry.width as u64 > ts.tile_width as u64
                    || entry.src_y as u64 + entry.height as u64 > ts.tile_height as u64
                {
                    return Err(invalid_layout(format!(
                        "level {} cell ({}, {}) clips outside its {}x{} tile",
                        index, entry.col, entry.row, ts.tile_width, ts.tile_height
                    )));
                }
                let clip = ClipRect {
                    x: entry.src_x,
                    y: entry.src_y,
                    width: entry.width,
                    height: entry.height,
                };
                let tile = TileRef {
                    source: entry.source,
                    tile: entry.tile,
                };
                if !grid.add_tile(entry.col, entry.row, tile, entry.offset_x, entry.offset_y, clip) {
                    return Err(invalid_layout(format!(
                        "level {} cell ({}, {}) is outside the map or defined twice",
                        index, entry.col, entry.row
                    )));
                }
            }
            TileGrid::TileMap(grid)
        }

        GridSpec::Range {
            bin_width,
            bin_height,
            tiles,
        } => {
            let mut grid = RangeGrid::new(*bin_width, *bin_height)
                .ok_or_else(|| invalid_layout(format!("level {} has zero bin size", index)))?;
            for entry in tiles {
                let ts = check_tile(index, sources, entry.source, entry.tile)?;
                if entry.width > ts.tile_width || entry.height > ts.tile_height {
                    return Err(invalid_layout(format!(
                        "level {} range tile at ({}, {}) is larger than its {}x{} tile",
                        index, entry.x, entry.y, ts.tile_width, ts.tile_height
                    )));
                }
                let tile = TileRef {
                    source: entry.source,
                    tile: entry.tile,
                };
                grid.add_tile(entry.x, entry.y, entry.width, entry.height, entry.z, tile);
            }
            TileGrid::Range(grid)
        }
    };

    Ok(Level::new(spec.width, spec.height, grid))
}

// =============================================================================
// Metadata
// =============================================================================

impl Slide {
    /// Identifier of this slide in tile cache keys.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Settings the slide was opened with.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn level_count(&self) -> usize {
        self.inner.levels.len()
    }

    pub fn level(&self, level: usize) -> Option<&Level> {
        self.inner.levels.get(level)
    }

    /// All levels, largest first.
    pub fn levels(&self) -> &[Level] {
        &self.inner.levels
    }

    pub fn level_dimensions(&self, level: usize) -> Option<(u64, u64)> {
        self.level(level).map(|l| (l.width, l.height))
    }

    pub fn level_downsample(&self, level: usize) -> Option<f64> {
        self.level(level).map(|l| l.downsample)
    }

    /// Uniform tile size of a level, (0, 0) when tiles vary.
    pub fn level_tile_size(&self, level: usize) -> Option<(u32, u32)> {
        self.level(level).map(|l| (l.tile_width, l.tile_height))
    }

    /// Level-0 dimensions.
    pub fn dimensions(&self) -> (u64, u64) {
        self.level_dimensions(0).unwrap_or((0, 0))
    }

    /// Level with the largest downsample not above `downsample`, or the
    /// coarsest level when none qualifies.
    pub fn best_level_for_downsample(&self, downsample: f64) -> usize {
        best_level_for_downsample(&self.inner.levels, downsample)
    }

    pub fn tile_source_count(&self) -> usize {
        self.inner.sources.len()
    }

    pub fn tile_source(&self, source: usize) -> Option<&TileSource> {
        self.inner.sources.get(source)
    }

    /// The stored error of a failed slide.
    pub fn error(&self) -> Option<SlideError> {
        self.inner.failure.get().cloned()
    }

    /// Message of the stored error of a failed slide.
    pub fn error_message(&self) -> Option<String> {
        self.inner.failure.get().map(|e| e.to_string())
    }
}

// =============================================================================
// Cache
// =============================================================================

impl Slide {
    /// Tile cache in use.
    pub fn cache(&self) -> Arc<TileCache> {
        Arc::clone(&self.inner.cache.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Use `cache` for subsequent reads. Caches may be shared between slides;
    /// entries are keyed by slide id.
    pub fn set_cache(&self, cache: Arc<TileCache>) {
        *self.inner.cache.write().unwrap_or_else(|e| e.into_inner()) = cache;
    }
}

// =============================================================================
// Reading
// =============================================================================

impl Slide {
    /// Read a `width` x `height` region of `level` whose top-left corner is
    /// at (`x`, `y`) in level-0 coordinates.
    ///
    /// Any coordinates are accepted; pixels outside the level are
    /// transparent. If any tile fails, the error comes back together with
    /// everything that could be painted. Once the slide has failed, every
    /// read returns the stored error, whatever level it names. Only a size
    /// that cannot be allocated is rejected before that.
    pub fn read_region(
        &self,
        x: i64,
        y: i64,
        level: usize,
        width: i64,
        height: i64,
    ) -> Result<Region, RegionError> {
        let (width, height) = match (u32::try_from(width), u32::try_from(height)) {
            (Ok(w), Ok(h)) => (w, h),
            _ => {
                return Err(RegionError {
                    error: SlideError::InvalidRegion(format!(
                        "region size {}x{} is negative or too large",
                        width, height
                    )),
                    partial: Region::default(),
                })
            }
        };

        let mut region = Region::new(width, height).map_err(|error| RegionError {
            error,
            partial: Region::default(),
        })?;
        match self.read_region_into(&mut region, x, y, level) {
            Ok(()) => Ok(region),
            Err(error) => Err(RegionError {
                error,
                partial: region,
            }),
        }
    }

    /// Read into an existing region buffer, which is cleared first.
    pub fn read_region_into(
        &self,
        dest: &mut Region,
        x: i64,
        y: i64,
        level: usize,
    ) -> Result<(), SlideError> {
        dest.pixels.fill(0);
        if dest.pixels.len() != dest.width as usize * dest.height as usize {
            return Err(SlideError::InvalidRegion(format!(
                "buffer of {} pixels for a {}x{} region",
                dest.pixels.len(),
                dest.width,
                dest.height
            )));
        }
        self.check_failed()?;
        let lvl = self.level(level).ok_or(SlideError::InvalidLevel {
            level,
            level_count: self.level_count(),
        })?;
        if dest.width == 0 || dest.height == 0 {
            return Ok(());
        }

        let level_x = (x as f64 / lvl.downsample).floor() as i64;
        let level_y = (y as f64 / lvl.downsample).floor() as i64;

        let cache = self.cache();
        let _read = self.inner.markers.begin_foreground();
        let painter = RegionPainter::new(
            self.inner.id,
            &cache,
            self.inner.decoder.as_ref(),
            self.inner.as_ref(),
        );
        let result = painter.paint(level, lvl, level_x, level_y, dest);
        if let Err(e) = &result {
            self.inner.record_failure(e);
        }
        result
    }

    /// [`read_region`](Self::read_region) on tokio's blocking pool.
    pub async fn read_region_async(
        self: Arc<Self>,
        x: i64,
        y: i64,
        level: usize,
        width: i64,
        height: i64,
    ) -> Result<Region, RegionError> {
        tokio::task::spawn_blocking(move || self.read_region(x, y, level, width, height))
            .await
            .unwrap_or_else(|e| {
                Err(RegionError {
                    error: SlideError::Worker(e.to_string()),
                    partial: Region::default(),
                })
            })
    }
}

// =============================================================================
// Restart Markers
// =============================================================================

impl Slide {
    /// Offset of the first entropy-coded byte of `tile` in `source`,
    /// locating it if it is not yet known.
    pub fn ensure_restart_offset(&self, source: usize, tile: usize) -> Result<u64, SlideError> {
        self.check_failed()?;
        let ts = self.inner.tile_source(source)?;
        let chunk = self.inner.config.scan_chunk_size;
        let result = self.inner.markers.lock().indexes[source].ensure_filled(ts.reader(), tile, chunk);
        if let Err(e) = &result {
            self.inner.record_failure(e);
        }
        result
    }

    /// Offset of `tile` in `source` if it is already known.
    pub fn restart_offset(&self, source: usize, tile: usize) -> Option<u64> {
        self.inner
            .markers
            .lock()
            .indexes
            .get(source)
            .and_then(|index| index.get(tile))
    }

    /// Standalone coded stream for `tile` of `source`.
    pub fn build_tile_stream(&self, source: usize, tile: usize) -> Result<Bytes, SlideError> {
        self.check_failed()?;
        let result = self.inner.tile_stream(TileRef { source, tile });
        if let Err(e) = &result {
            self.inner.record_failure(e);
        }
        result
    }

    /// Check that every known restart offset follows a restart marker.
    ///
    /// Returns the number of offsets checked.
    pub fn verify_restart_index(&self) -> Result<usize, SlideError> {
        self.check_failed()?;
        let result = {
            let state = self.inner.markers.lock();
            state
                .indexes
                .iter()
                .zip(&self.inner.sources)
                .try_fold(0, |verified, (index, source)| {
                    Ok::<_, SlideError>(verified + index.verify(source.reader())?)
                })
        };
        if let Err(e) = &result {
            self.inner.record_failure(e);
        }
        result
    }

    pub fn scanner_state(&self) -> ScannerState {
        self.inner.markers.scanner_state()
    }

    /// Slots filled by the background scanner so far.
    pub fn scanner_progress(&self) -> u64 {
        self.inner.markers.progress()
    }

    /// Block until the background scanner has finished, failed or stopped.
    pub fn wait_for_scanner(&self) {
        self.inner.markers.wait_for_scanner();
    }

    /// Stop the background scanner and wait for it to exit.
    ///
    /// Reads keep working afterwards; unfilled offsets are located on demand.
    pub fn close(&self) {
        self.inner.markers.request_stop();
        let handle = self
            .scanner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(slide = self.inner.id, "restart scanner panicked");
                self.inner.markers.mark_stopped();
            }
        }
    }

    fn check_failed(&self) -> Result<(), SlideError> {
        match self.inner.failure.get() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl Drop for Slide {
    fn drop(&mut self) {
        self.close();
    }
}

impl SlideInner {
    fn tile_source(&self, source: usize) -> Result<&TileSource, SlideError> {
        self.sources.get(source).ok_or(SlideError::InvalidTileSource {
            tile_source: source,
            source_count: self.sources.len(),
        })
    }

    /// Enter the failed state if `error` means the data is unusable.
    fn record_failure(&self, error: &SlideError) {
        if error.is_source_corruption() && self.failure.set(error.clone()).is_ok() {
            error!(slide = self.id, error = %error, "slide failed");
            self.markers.request_stop();
        }
    }
}

impl TileStreams for SlideInner {
    fn tile_stream(&self, tile: TileRef) -> Result<Bytes, SlideError> {
        let source = self.tile_source(tile.source)?;
        let chunk = self.config.scan_chunk_size;

        // Offsets under the marker lock; the data read happens outside it
        let (start, stop) = {
            let mut state = self.markers.lock();
            let index = &mut state.indexes[tile.source];
            let start = index.ensure_filled(source.reader(), tile.tile, chunk)?;
            let stop = if tile.tile + 1 < index.tile_count() {
                index.ensure_filled(source.reader(), tile.tile + 1, chunk)?
            } else {
                index.end()
            };
            (start, stop)
        };

        build_tile_stream(
            source.reader(),
            tile.source,
            &source.header,
            source.frame_offset,
            TileStreamRange {
                header_start: source.start,
                header_stop: source.scan_start(),
                start,
                stop,
            },
        )
    }

    fn tile_size(&self, source: usize) -> (u32, u32) {
        self.sources
            .get(source)
            .map_or((0, 0), |s| (s.tile_width, s.tile_height))
    }
}
