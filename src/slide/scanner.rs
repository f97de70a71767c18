//! Shared restart-marker state and the background scanner.
//!
//! All restart indexes of a slide sit behind one mutex. Foreground reads
//! resolve the offsets they need under that lock, and the background scanner
//! fills the remaining slots one at a time, in tile-source order, so that
//! later random accesses are cheap.
//!
//! The scanner yields to foreground work: while any foreground read is in
//! progress it does not start a fill, and after the last one finishes it
//! waits out a quiet period before resuming. Callers that queued on the lock
//! during a fill get it before the next fill starts. All of this waiting is
//! on the lock's condition variable. The scanner can be stopped at any time;
//! the slide joins it on close.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::SlideError;
use crate::format::restart::RestartIndex;

use super::source::TileSource;

/// What the background scanner is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerState {
    /// Not started, or not needed
    Idle,
    /// Filling slots
    Scanning,
    /// Waiting for foreground reads to finish and the quiet period to pass
    Paused,
    /// Finished, stopped or failed
    Stopped,
}

/// State guarded by the marker lock.
#[derive(Debug)]
pub(crate) struct MarkerState {
    pub indexes: Vec<RestartIndex>,
    pub active_readers: usize,
    pub last_foreground: Option<Instant>,
    pub stop: bool,
    pub running: bool,
    pub scanner: ScannerState,
}

/// Restart indexes of every tile source, plus scanner coordination.
#[derive(Debug)]
pub(crate) struct MarkerIndex {
    state: Mutex<MarkerState>,
    changed: Condvar,
    /// Threads blocked in [`lock`](Self::lock)
    waiters: AtomicUsize,
    progress: AtomicU64,
}

impl MarkerIndex {
    pub fn new(indexes: Vec<RestartIndex>) -> Self {
        Self {
            state: Mutex::new(MarkerState {
                indexes,
                active_readers: 0,
                last_foreground: None,
                stop: false,
                running: false,
                scanner: ScannerState::Idle,
            }),
            changed: Condvar::new(),
            waiters: AtomicUsize::new(0),
            progress: AtomicU64::new(0),
        }
    }

    /// Take the marker lock. A panic while holding it cannot leave a slot
    /// half-written, so a poisoned lock is still usable.
    pub fn lock(&self) -> MutexGuard<'_, MarkerState> {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if self.waiters.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last queued caller is through; a scanner may be waiting on that
            self.changed.notify_all();
        }
        guard
    }

    /// Register a foreground read until the returned guard is dropped.
    pub fn begin_foreground(&self) -> ForegroundRead<'_> {
        self.lock().active_readers += 1;
        self.changed.notify_all();
        ForegroundRead { markers: self }
    }

    /// Slots filled by the background scanner so far.
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Acquire)
    }

    pub fn scanner_state(&self) -> ScannerState {
        self.lock().scanner
    }

    /// Mark the scanner as started; it is considered running from here on.
    pub fn mark_running(&self) {
        let mut state = self.lock();
        state.running = true;
        state.scanner = ScannerState::Scanning;
    }

    /// Record that the scanner is gone without having run to completion.
    pub fn mark_stopped(&self) {
        {
            let mut state = self.lock();
            state.running = false;
            state.scanner = ScannerState::Stopped;
        }
        self.changed.notify_all();
    }

    /// Ask the scanner to stop at its next check.
    pub fn request_stop(&self) {
        self.lock().stop = true;
        self.changed.notify_all();
    }

    /// Block until the scanner has exited, or return at once if none runs.
    pub fn wait_for_scanner(&self) {
        let mut state = self.lock();
        while state.running {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// An in-progress foreground read; the scanner stays paused while one exists.
pub(crate) struct ForegroundRead<'a> {
    markers: &'a MarkerIndex,
}

impl Drop for ForegroundRead<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.markers.lock();
            state.active_readers = state.active_readers.saturating_sub(1);
            state.last_foreground = Some(Instant::now());
        }
        self.markers.changed.notify_all();
    }
}

/// Scanner settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanOptions {
    /// Quiet period after the last foreground read
    pub throttle: Duration,
    pub chunk_size: usize,
}

/// Body of the scanner thread.
///
/// Fills every unfilled slot of every tile source. A fill error is stored
/// in `failure`, which puts the slide into its failed state, and ends the
/// scan.
pub(crate) fn run(
    markers: &MarkerIndex,
    sources: &[TileSource],
    failure: &OnceLock<SlideError>,
    options: ScanOptions,
) {
    let started = Instant::now();
    let mut source = 0usize;
    let mut tile = 1usize;
    let mut state = markers.lock();

    loop {
        if state.stop {
            debug!("restart scanner stopped");
            break;
        }
        if failure.get().is_some() {
            break;
        }

        if state.active_readers > 0 {
            state.scanner = ScannerState::Paused;
            state = markers
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
            continue;
        }
        if let Some(last) = state.last_foreground {
            let quiet = last.elapsed();
            if quiet < options.throttle {
                state.scanner = ScannerState::Paused;
                state = markers
                    .changed
                    .wait_timeout(state, options.throttle - quiet)
                    .map(|(guard, _)| guard)
                    .unwrap_or_else(|e| e.into_inner().0);
                continue;
            }
        }

        // Next unfilled slot, in source then tile order
        while source < state.indexes.len() {
            let index = &state.indexes[source];
            if tile < index.tile_count() && index.get(tile).is_none() {
                break;
            }
            if tile + 1 < index.tile_count() {
                tile += 1;
            } else {
                source += 1;
                tile = 1;
            }
        }
        if source >= state.indexes.len() {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                slots = markers.progress(),
                "restart scan complete"
            );
            break;
        }

        state.scanner = ScannerState::Scanning;
        let reader = sources[source].reader();
        match state.indexes[source].ensure_filled(reader, tile, options.chunk_size) {
            Ok(_) => {
                markers.progress.fetch_add(1, Ordering::AcqRel);
            }
            Err(e) => {
                error!(source, tile, error = %e, "restart scan failed");
                let _ = failure.set(e);
                break;
            }
        }

        // Callers that blocked on the lock during the fill go first
        while markers.waiters.load(Ordering::Acquire) > 0 {
            state = markers
                .changed
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    state.scanner = ScannerState::Stopped;
    state.running = false;
    drop(state);
    markers.changed.notify_all();
}
