//! Restart-marker index for one coded stream.
//!
//! Slot `i` holds the file offset of the first entropy-coded byte of tile `i`,
//! i.e. the byte just after the restart marker that ends tile `i - 1`. Slot 0
//! is known when the stream is opened; the rest are filled lazily, either by
//! validating a vendor-supplied hint or by scanning forward from the nearest
//! known slot. A filled slot is never changed again.

use memchr::memchr;
use tracing::{debug, warn};

use crate::error::SlideError;
use crate::format::jpeg::{is_restart_marker, EOI, MARKER_PREFIX};
use crate::io::RangeReader;

/// Restart-marker offsets of one tile source.
#[derive(Debug, Clone)]
pub struct RestartIndex {
    /// Index of the tile source, for error reporting
    source: usize,
    /// Exclusive end of the coded stream in the file
    end: u64,
    slots: Vec<Option<u64>>,
    /// Unvalidated offsets; each is consumed on first use
    hints: Vec<Option<u64>>,
    filled: usize,
}

impl RestartIndex {
    /// Create an index whose slot 0 is `first` (stream start + scan start).
    ///
    /// `hints` may be shorter than `tile_count`; missing entries mean no hint.
    pub fn new(
        source: usize,
        tile_count: usize,
        first: u64,
        end: u64,
        mut hints: Vec<Option<u64>>,
    ) -> Self {
        let tile_count = tile_count.max(1);
        let mut slots = vec![None; tile_count];
        slots[0] = Some(first);
        hints.resize(tile_count, None);
        hints[0] = None;

        Self {
            source,
            end,
            slots,
            hints,
            filled: 1,
        }
    }

    /// Number of tiles (and slots) in the stream.
    pub fn tile_count(&self) -> usize {
        self.slots.len()
    }

    /// Exclusive end offset of the coded stream.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Offset of slot `tile`, if already known.
    pub fn get(&self, tile: usize) -> Option<u64> {
        self.slots.get(tile).copied().flatten()
    }

    /// Number of known slots.
    pub fn filled_count(&self) -> usize {
        self.filled
    }

    /// Whether every slot is known.
    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    /// Return the offset of slot `target`, filling it if needed.
    ///
    /// Walks backward from `target` to the nearest known slot, accepting a
    /// hint on the way only if the two bytes before it are a restart marker.
    /// Rejected hints are dropped. From the known slot, scans forward for
    /// restart markers and records each following offset in the next slot.
    ///
    /// Hitting EOI or the end of the stream before `target` is filled is
    /// [`SlideError::TruncatedStream`]; slots filled on the way stay filled.
    pub fn ensure_filled<R: RangeReader + ?Sized>(
        &mut self,
        reader: &R,
        target: usize,
        chunk_size: usize,
    ) -> Result<u64, SlideError> {
        if target >= self.slots.len() {
            return Err(SlideError::TileOutOfRange {
                tile_source: self.source,
                tile: target,
                tile_count: self.slots.len(),
            });
        }
        if let Some(offset) = self.slots[target] {
            return Ok(offset);
        }

        // Backward walk; slot 0 is always known so this terminates
        let mut known = target;
        while self.slots[known].is_none() {
            if let Some(hint) = self.hints[known].take() {
                if self.hint_is_valid(reader, hint)? {
                    debug!(
                        source = self.source,
                        slot = known,
                        offset = hint,
                        "Accepted restart marker hint"
                    );
                    self.record(known, hint);
                    break;
                }
                debug!(
                    source = self.source,
                    slot = known,
                    offset = hint,
                    "Discarding restart marker hint"
                );
            }
            known -= 1;
        }

        if known == target {
            return Ok(self.slots[target].unwrap_or_default());
        }

        let from = self.slots[known].unwrap_or_default();
        self.scan_forward(reader, from, known + 1, target, chunk_size)?;
        Ok(self.slots[target].unwrap_or_default())
    }

    /// Scan forward from `pos`, filling slots `next..=target`.
    fn scan_forward<R: RangeReader + ?Sized>(
        &mut self,
        reader: &R,
        mut pos: u64,
        mut next: usize,
        target: usize,
        chunk_size: usize,
    ) -> Result<(), SlideError> {
        let chunk_size = chunk_size.max(2) as u64;

        while next <= target {
            if pos >= self.end {
                return Err(self.truncated(target, next, pos));
            }
            let len = chunk_size.min(self.end - pos) as usize;
            let chunk = reader.read_exact_at(pos, len)?;

            let mut cursor = 0;
            let mut consumed = chunk.len();
            while let Some(found) = memchr(MARKER_PREFIX, &chunk[cursor..]) {
                let i = cursor + found;
                if i + 1 >= chunk.len() {
                    // Marker code lies in the next chunk; re-read from the prefix
                    if pos + i as u64 + 1 >= self.end {
                        return Err(self.truncated(target, next, pos + i as u64));
                    }
                    consumed = i;
                    break;
                }

                let code = chunk[i + 1];
                if code == MARKER_PREFIX {
                    cursor = i + 1;
                    continue;
                }
                if code == EOI[1] {
                    return Err(self.truncated(target, next, pos + i as u64));
                }
                if is_restart_marker(code) {
                    self.record(next, pos + i as u64 + 2);
                    next += 1;
                    if next > target {
                        return Ok(());
                    }
                }
                cursor = i + 2;
                if cursor >= chunk.len() {
                    break;
                }
            }

            pos += consumed as u64;
        }

        Ok(())
    }

    /// Store `offset` in `slot` unless the slot is already known.
    fn record(&mut self, slot: usize, offset: u64) {
        match self.slots[slot] {
            Some(existing) if existing != offset => {
                warn!(
                    source = self.source,
                    slot,
                    existing,
                    offset,
                    "Restart marker offset disagrees with recorded slot, keeping recorded value"
                );
            }
            Some(_) => {}
            None => {
                self.slots[slot] = Some(offset);
                self.filled += 1;
            }
        }
        self.hints[slot] = None;
    }

    /// A hint is valid when it follows FF D0..D7 inside the scan.
    fn hint_is_valid<R: RangeReader + ?Sized>(
        &self,
        reader: &R,
        hint: u64,
    ) -> Result<bool, SlideError> {
        let first = self.slots[0].unwrap_or_default();
        if hint < first + 2 || hint >= self.end {
            return Ok(false);
        }
        let marker = reader.read_exact_at(hint - 2, 2)?;
        Ok(marker[0] == MARKER_PREFIX && is_restart_marker(marker[1]))
    }

    /// Check that every filled slot past 0 follows a restart marker.
    ///
    /// Returns the number of slots checked.
    pub fn verify<R: RangeReader + ?Sized>(&self, reader: &R) -> Result<usize, SlideError> {
        let mut checked = 0;
        for (slot, offset) in self.slots.iter().enumerate().skip(1) {
            let Some(offset) = *offset else { continue };
            let bad = SlideError::BadRestartMarker {
                tile_source: self.source,
                slot,
                offset,
            };
            if offset < 2 {
                return Err(bad);
            }
            let marker = reader.read_exact_at(offset - 2, 2)?;
            if marker[0] != MARKER_PREFIX || !is_restart_marker(marker[1]) {
                return Err(bad);
            }
            checked += 1;
        }
        Ok(checked)
    }

    fn truncated(&self, target: usize, found: usize, offset: u64) -> SlideError {
        SlideError::TruncatedStream {
            tile_source: self.source,
            target,
            found,
            tile_count: self.slots.len(),
            offset,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
