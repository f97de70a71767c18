//! Cache effectiveness integration tests.
//!
//! Tests verify:
//! - Repeated reads are served from the tile cache
//! - Tiles of different levels never share a cache entry
//! - A small cache stays within its byte budget
//! - The block cache absorbs repeated file reads

use std::sync::Arc;

use wsi_region::{Config, Slide, SlideLayout, TileCache};

use super::test_utils::{
    grey, restart_stream, test_config, tile_value, MockSlideSource, TrackingMockReader,
    ValueDecoder, TILE_HEIGHT, TILE_WIDTH,
};

/// Open a grid slide, returning a handle on its reader's request counter.
fn open_tracked(across: u16, down: u16, config: Config) -> (Slide, TrackingMockReader) {
    let stream = restart_stream(across, down, 8);
    let layout = SlideLayout::single_stream(
        "tracked.jpg",
        stream.width(),
        stream.height(),
        TILE_WIDTH,
        TILE_HEIGHT,
    );
    let reader = TrackingMockReader::new(stream.data, "mock://tracked.jpg");
    let source = MockSlideSource::new().with_reader("tracked.jpg", reader.clone());
    let slide = Slide::open_with_decoder(&source, &layout, config, Arc::new(ValueDecoder)).unwrap();
    (slide, reader)
}

// =============================================================================
// Tile Cache
// =============================================================================

#[test]
fn test_repeat_read_hits_cache() {
    let (slide, reader) = open_tracked(4, 4, test_config());

    let first = slide.read_region(0, 0, 0, 64, 32).unwrap();
    let stats = slide.cache().stats();
    assert_eq!(stats.misses, 16);
    assert_eq!(stats.hits, 0);

    reader.reset_tracking();
    let second = slide.read_region(0, 0, 0, 64, 32).unwrap();
    assert_eq!(first, second);
    assert_eq!(slide.cache().stats().hits, 16);
    // Nothing was read from the file
    assert_eq!(reader.request_count(), 0);
}

#[test]
fn test_levels_cached_independently() {
    let (slide, _reader) = open_tracked(
        4,
        4,
        Config {
            scaled_levels: true,
            ..test_config()
        },
    );
    let cache = slide.cache();

    // Tile (0, 0) of level 0, then tiles (0, 0) and (1, 0) of level 1
    slide.read_region(0, 0, 0, 16, 8).unwrap();
    let half = slide.read_region(0, 0, 1, 16, 4).unwrap();

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.stats().hits, 0);
    assert_eq!(cache.size(), 16 * 8 * 4 + 2 * (8 * 4 * 4));
    assert_eq!(half.pixel(0, 0), grey(tile_value(0)));
    assert_eq!(half.pixel(8, 0), grey(tile_value(1)));
}

#[test]
fn test_small_cache_stays_within_capacity() {
    let (slide, _reader) = open_tracked(8, 6, test_config());
    // Room for four 16x8 tiles
    let cache = Arc::new(TileCache::with_capacity(4 * 16 * 8 * 4));
    slide.set_cache(Arc::clone(&cache));

    let region = slide.read_region(0, 0, 0, 128, 48).unwrap();

    assert!(cache.size() <= cache.capacity());
    assert!(cache.len() <= 4);
    assert!(cache.stats().evictions >= 44);
    // Eviction does not affect what was painted
    assert_eq!(region.pixel(0, 0), grey(tile_value(0)));
    assert_eq!(region.pixel(127, 47), grey(tile_value(47)));
}

#[test]
fn test_cache_capacity_change_evicts() {
    let (slide, _reader) = open_tracked(4, 2, test_config());
    slide.read_region(0, 0, 0, 64, 16).unwrap();
    let cache = slide.cache();
    assert_eq!(cache.len(), 8);

    cache.set_capacity(2 * 16 * 8 * 4);
    assert_eq!(cache.len(), 2);

    // Still correct after eviction
    let region = slide.read_region(0, 0, 0, 64, 16).unwrap();
    assert_eq!(region.pixel(40, 12), grey(tile_value(6)));
}

// =============================================================================
// Block Cache
// =============================================================================

#[test]
fn test_block_cache_serves_repeat_reads() {
    let config = Config {
        cache_blocks: 16,
        block_size: 1024,
        ..test_config()
    };
    let (slide, reader) = open_tracked(4, 4, config);

    let first = slide.read_region(0, 0, 0, 64, 32).unwrap();
    assert!(reader.request_count() > 0);

    slide.cache().clear();
    reader.reset_tracking();
    let second = slide.read_region(0, 0, 0, 64, 32).unwrap();

    assert_eq!(first, second);
    assert_eq!(reader.request_count(), 0);
}

#[test]
fn test_without_block_cache_reads_reach_file() {
    let (slide, reader) = open_tracked(4, 4, test_config());
    slide.read_region(0, 0, 0, 64, 32).unwrap();

    slide.cache().clear();
    reader.reset_tracking();
    slide.read_region(0, 0, 0, 64, 32).unwrap();

    // Offsets are already known, so only tile data is read
    assert_eq!(reader.request_count(), 16);
}
