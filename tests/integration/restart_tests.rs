//! Restart-marker index integration tests.
//!
//! Tests verify:
//! - Offsets found by forward scanning match the stream's real markers
//! - Vendor hints are used only after validation
//! - Known offsets never change once set
//! - The index can be re-verified against the file

use std::sync::Arc;
use std::time::{Duration, Instant};

use wsi_region::{Config, ScannerState, Slide, SlideLayout};

use super::test_utils::{
    grey, init_tracing, restart_stream, test_config, tile_value, MockSlideSource,
    RestartStream, TrackingMockReader, ValueDecoder, TILE_HEIGHT, TILE_WIDTH,
};

fn layout_for(stream: &RestartStream, file: &str) -> SlideLayout {
    SlideLayout::single_stream(file, stream.width(), stream.height(), TILE_WIDTH, TILE_HEIGHT)
}

fn open_stream(
    stream: RestartStream,
    layout: &SlideLayout,
    config: Config,
) -> (Slide, TrackingMockReader) {
    let file = layout.sources[0].file.clone();
    let reader = TrackingMockReader::new(stream.data, format!("mock://{}", file));
    let source = MockSlideSource::new().with_reader(file, reader.clone());
    let slide = Slide::open_with_decoder(&source, layout, config, Arc::new(ValueDecoder)).unwrap();
    (slide, reader)
}

// =============================================================================
// Forward Scanning
// =============================================================================

#[test]
fn test_forward_scan_finds_every_marker() {
    init_tracing();
    // 13-byte tiles so markers straddle 16-byte scan chunks
    let mut stream = restart_stream(6, 5, 13);
    // Stuffed FF 00 pairs inside each tile are not markers
    for &offset in &stream.offsets {
        stream.data[offset as usize] = 0xFF;
        stream.data[offset as usize + 1] = 0x00;
    }
    let expected = stream.offsets.clone();
    let layout = layout_for(&stream, "scan.jpg");
    let config = Config {
        scan_chunk_size: 16,
        ..test_config()
    };
    let (slide, _reader) = open_stream(stream, &layout, config);

    // Out of order, so later lookups start from earlier partial scans
    for tile in [17, 3, 29, 0, 18, 11] {
        assert_eq!(slide.ensure_restart_offset(0, tile).unwrap(), expected[tile]);
    }
    for (tile, &offset) in expected.iter().enumerate() {
        assert_eq!(slide.ensure_restart_offset(0, tile).unwrap(), offset);
    }
    assert_eq!(slide.verify_restart_index().unwrap(), expected.len() - 1);

    let region = slide.read_region(80, 32, 0, 16, 8).unwrap();
    assert_eq!(region.pixel(0, 0), grey(tile_value(29)));
}

#[test]
fn test_lookup_fills_only_up_to_target() {
    let stream = restart_stream(8, 1, 8);
    let expected = stream.offsets.clone();
    let layout = layout_for(&stream, "lazy.jpg");
    let (slide, _reader) = open_stream(stream, &layout, test_config());

    assert_eq!(slide.restart_offset(0, 0), Some(expected[0]));
    slide.ensure_restart_offset(0, 3).unwrap();

    for tile in 1..=3 {
        assert_eq!(slide.restart_offset(0, tile), Some(expected[tile]));
    }
    for tile in 4..8 {
        assert_eq!(slide.restart_offset(0, tile), None);
    }
}

#[test]
fn test_tile_past_end_of_index() {
    let stream = restart_stream(2, 2, 8);
    let layout = layout_for(&stream, "small.jpg");
    let (slide, _reader) = open_stream(stream, &layout, test_config());

    assert!(slide.ensure_restart_offset(0, 4).is_err());
    // Not a corruption, the slide keeps working
    assert!(slide.error().is_none());
}

// =============================================================================
// Hints
// =============================================================================

#[test]
fn test_valid_hint_skips_scan() {
    init_tracing();
    let stream = restart_stream(8, 2, 8);
    let expected = stream.offsets.clone();
    let mut layout = layout_for(&stream, "hinted.jpg");
    layout.sources[0].hints = vec![None, None, None, None, None, Some(expected[5])];
    let (slide, reader) = open_stream(stream, &layout, test_config());

    reader.reset_tracking();
    assert_eq!(slide.ensure_restart_offset(0, 5).unwrap(), expected[5]);
    // One two-byte read to check the marker before the hint
    assert_eq!(reader.request_count(), 1);
    for tile in 1..5 {
        assert_eq!(slide.restart_offset(0, tile), None);
    }

    // Later slots scan forward from the hint
    assert_eq!(slide.ensure_restart_offset(0, 7).unwrap(), expected[7]);
    assert_eq!(slide.restart_offset(0, 2), None);
}

#[test]
fn test_invalid_hint_discarded() {
    init_tracing();
    let stream = restart_stream(8, 2, 8);
    let expected = stream.offsets.clone();
    let mut layout = layout_for(&stream, "misled.jpg");
    layout.sources[0].hints = vec![
        None,
        None,
        // Past the end of the stream
        Some(1 << 40),
        None,
        None,
        // Mid-tile, not after a marker
        Some(expected[5] + 3),
    ];
    let (slide, _reader) = open_stream(stream, &layout, test_config());

    assert_eq!(slide.ensure_restart_offset(0, 5).unwrap(), expected[5]);
    for tile in 1..5 {
        assert_eq!(slide.restart_offset(0, tile), Some(expected[tile]));
    }
    assert_eq!(slide.verify_restart_index().unwrap(), 5);
    assert!(slide.error().is_none());
}

#[test]
fn test_hints_from_layout_json() {
    let stream = restart_stream(4, 1, 8);
    let hint = stream.offsets[2];
    let json = format!(
        r#"{{
            "sources": [{{ "file": "json.jpg", "hints": [null, null, {}] }}],
            "levels": [{{
                "width": 64, "height": 8,
                "grid": {{ "kind": "simple", "tile_width": 16, "tile_height": 8,
                           "tiles_across": 4, "tiles_down": 1 }}
            }}]
        }}"#,
        hint
    );
    let layout = SlideLayout::from_json(&json).unwrap();
    let (slide, _reader) = open_stream(stream, &layout, test_config());

    assert_eq!(slide.ensure_restart_offset(0, 2).unwrap(), hint);
    assert_eq!(slide.restart_offset(0, 1), None);
}

// =============================================================================
// Monotonicity
// =============================================================================

#[test]
fn test_offsets_never_change_while_scanning() {
    init_tracing();
    let stream = restart_stream(16, 8, 24);
    let expected = stream.offsets.clone();
    let layout = layout_for(&stream, "mono.jpg");
    let config = Config {
        background_scan: true,
        scanner_throttle_ms: 0,
        scan_chunk_size: 16,
        ..test_config()
    };
    let (slide, _reader) = open_stream(stream, &layout, config);

    let mut seen: Vec<Option<u64>> = vec![None; expected.len()];
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut lookup = 0usize;
    loop {
        let done = slide.scanner_state() == ScannerState::Stopped;

        // Foreground lookups race the scanner
        lookup = (lookup + 37) % expected.len();
        assert_eq!(slide.ensure_restart_offset(0, lookup).unwrap(), expected[lookup]);

        for (tile, slot) in seen.iter_mut().enumerate() {
            match (slide.restart_offset(0, tile), *slot) {
                (Some(now), Some(before)) => assert_eq!(now, before, "slot {} changed", tile),
                (Some(now), None) => *slot = Some(now),
                (None, Some(_)) => panic!("slot {} was cleared", tile),
                (None, None) => {}
            }
        }

        if done {
            break;
        }
        assert!(Instant::now() < deadline, "scanner did not finish");
    }

    let found: Vec<u64> = seen.into_iter().map(|s| s.unwrap()).collect();
    assert_eq!(found, expected);
    assert!(slide.error().is_none());
}
