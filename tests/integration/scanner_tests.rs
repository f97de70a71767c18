//! Background scanner integration tests.
//!
//! Tests verify:
//! - The scanner indexes every restart marker and then stops
//! - It pauses while a foreground read is in progress
//! - Closing a slide stops it promptly
//! - A corrupt stream found in the background fails the slide

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use wsi_region::{Config, ScannerState, Slide, SlideError, SlideLayout};

use super::test_utils::{
    encode_jpeg, grey, init_tracing, restart_stream, test_config, tile_value, wait_until,
    GatedDecoder, MockSlideSource, TrackingMockReader, ValueDecoder, TILE_HEIGHT, TILE_WIDTH,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn scanning_config() -> Config {
    Config {
        background_scan: true,
        scanner_throttle_ms: 0,
        scan_chunk_size: 16,
        ..test_config()
    }
}

/// A slow grid slide, so the scanner is observable mid-run.
fn open_slow(across: u16, down: u16, decoder: Arc<dyn wsi_region::TileDecoder>) -> Slide {
    let stream = restart_stream(across, down, 64);
    let layout = SlideLayout::single_stream(
        "slow.jpg",
        stream.width(),
        stream.height(),
        TILE_WIDTH,
        TILE_HEIGHT,
    );
    let reader = TrackingMockReader::new(stream.data, "mock://slow.jpg")
        .with_delay(Duration::from_millis(1));
    let source = MockSlideSource::new().with_reader("slow.jpg", reader);
    Slide::open_with_decoder(&source, &layout, scanning_config(), decoder).unwrap()
}

#[test]
fn test_scanner_indexes_whole_stream() {
    init_tracing();
    let stream = restart_stream(10, 6, 20);
    let expected = stream.offsets.clone();
    let layout = SlideLayout::single_stream(
        "full.jpg",
        stream.width(),
        stream.height(),
        TILE_WIDTH,
        TILE_HEIGHT,
    );
    let source = MockSlideSource::new().with_file("full.jpg", stream.data);
    let slide =
        Slide::open_with_decoder(&source, &layout, scanning_config(), Arc::new(ValueDecoder))
            .unwrap();

    slide.wait_for_scanner();

    assert_eq!(slide.scanner_state(), ScannerState::Stopped);
    assert_eq!(slide.scanner_progress(), expected.len() as u64 - 1);
    for (tile, &offset) in expected.iter().enumerate() {
        assert_eq!(slide.restart_offset(0, tile), Some(offset));
    }
    assert_eq!(slide.verify_restart_index().unwrap(), expected.len() - 1);
}

#[test]
fn test_scanner_pauses_during_foreground_read() {
    init_tracing();
    let decoder = Arc::new(GatedDecoder::default());
    let slide = Arc::new(open_slow(32, 8, decoder.clone()));
    assert!(wait_until(TIMEOUT, || slide.scanner_progress() > 0));

    let reading = Arc::clone(&slide);
    let read = thread::spawn(move || reading.read_region(0, 0, 0, 16, 8));
    assert!(wait_until(TIMEOUT, || decoder.entered()));
    assert!(wait_until(TIMEOUT, || {
        slide.scanner_state() == ScannerState::Paused
    }));

    // No progress while the read is stuck in its decode
    let paused_at = slide.scanner_progress();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(slide.scanner_progress(), paused_at);
    assert_eq!(slide.scanner_state(), ScannerState::Paused);

    decoder.release();
    let region = read.join().unwrap().unwrap();
    assert_eq!(region.pixel(0, 0), grey(tile_value(0)));

    assert!(wait_until(TIMEOUT, || slide.scanner_progress() > paused_at));
}

#[test]
fn test_reads_while_scanning_are_correct() {
    let slide = Arc::new(open_slow(16, 8, Arc::new(ValueDecoder)));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let slide = Arc::clone(&slide);
            thread::spawn(move || {
                for row in (t..8).step_by(4) {
                    let y = row as i64 * TILE_HEIGHT as i64;
                    let region = slide.read_region(0, y, 0, 256, 8).unwrap();
                    for col in 0..16u32 {
                        let tile = row as usize * 16 + col as usize;
                        assert_eq!(region.pixel(col * TILE_WIDTH, 0), grey(tile_value(tile)));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(slide.error().is_none());
}

#[test]
fn test_close_stops_scanner() {
    init_tracing();
    let slide = open_slow(32, 8, Arc::new(ValueDecoder));
    assert!(wait_until(TIMEOUT, || slide.scanner_progress() > 0));

    slide.close();
    assert_eq!(slide.scanner_state(), ScannerState::Stopped);
    let stopped_at = slide.scanner_progress();
    assert!(stopped_at < 255);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(slide.scanner_progress(), stopped_at);

    // Unscanned offsets are still found on demand
    let region = slide.read_region(31 * 16, 7 * 8, 0, 16, 8).unwrap();
    assert_eq!(region.pixel(0, 0), grey(tile_value(255)));

    // Closing twice is harmless
    slide.close();
}

#[test]
fn test_scanner_failure_fails_slide() {
    init_tracing();
    let stream = restart_stream(4, 2, 8).truncated(5);
    let layout = SlideLayout::single_stream("cut.jpg", 64, 16, TILE_WIDTH, TILE_HEIGHT);
    let source = MockSlideSource::new().with_file("cut.jpg", stream.data);
    let slide =
        Slide::open_with_decoder(&source, &layout, scanning_config(), Arc::new(ValueDecoder))
            .unwrap();

    slide.wait_for_scanner();

    assert_eq!(slide.scanner_state(), ScannerState::Stopped);
    assert!(matches!(
        slide.error(),
        Some(SlideError::TruncatedStream { target: 5, .. })
    ));
    // Even tiles the scanner got through are refused now
    let err = slide.read_region(0, 0, 0, 16, 8).unwrap_err();
    assert!(matches!(err.error, SlideError::TruncatedStream { .. }));
}

#[test]
fn test_single_tile_slide_has_no_scanner() {
    let source = MockSlideSource::new().with_file("one.jpg", encode_jpeg(32, 16, [90, 90, 90]));
    let layout = SlideLayout::single_stream("one.jpg", 32, 16, 32, 16);
    let slide = Slide::open(&source, &layout, scanning_config()).unwrap();

    assert_eq!(slide.scanner_state(), ScannerState::Idle);
    // Returns at once when no scanner runs
    slide.wait_for_scanner();
    assert!(slide.read_region(0, 0, 0, 32, 16).is_ok());
}
