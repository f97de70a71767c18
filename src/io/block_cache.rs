use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Condvar, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use lru::LruCache;

use super::RangeReader;
use crate::error::IoError;

/// Default block size: 256KB
pub const DEFAULT_BLOCK_SIZE: usize = 256 * 1024;

/// Blocks kept per file when no capacity is given.
const DEFAULT_BLOCK_COUNT: usize = 100;

/// Resident blocks plus the blocks some thread is currently loading.
struct Blocks {
    resident: LruCache<u64, Bytes>,
    loading: HashSet<u64>,
}

/// Fixed-size block cache in front of a [`RangeReader`].
///
/// Marker validation reads two bytes at a time and the forward scan reads
/// small chunks, so most reads of a slide file land in a block that is
/// already resident. A block is loaded by exactly one thread; others asking
/// for it meanwhile wait for that load instead of issuing their own.
pub struct BlockCache<R> {
    inner: R,
    block_size: u64,
    blocks: Mutex<Blocks>,
    loaded: Condvar,
}

impl<R: RangeReader> BlockCache<R> {
    /// Wrap `inner` with 256KB blocks, 100 of them.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_COUNT)
    }

    /// Wrap `inner`, keeping up to `capacity` blocks of `block_size` bytes.
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            block_size: block_size.max(1) as u64,
            blocks: Mutex::new(Blocks {
                resident: LruCache::new(capacity),
                loading: HashSet::new(),
            }),
            loaded: Condvar::new(),
        }
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn lock(&self) -> MutexGuard<'_, Blocks> {
        self.blocks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return block `index`, loading it if no other thread already is.
    fn block(&self, index: u64) -> Result<Bytes, IoError> {
        let mut blocks = self.lock();
        loop {
            if let Some(data) = blocks.resident.get(&index) {
                return Ok(data.clone());
            }
            if blocks.loading.insert(index) {
                break;
            }
            blocks = self.loaded.wait(blocks).unwrap_or_else(|e| e.into_inner());
        }
        drop(blocks);

        let start = index * self.block_size;
        let len = self.block_size.min(self.inner.size().saturating_sub(start)) as usize;
        let result = self.inner.read_exact_at(start, len);

        let mut blocks = self.lock();
        blocks.loading.remove(&index);
        if let Ok(data) = &result {
            blocks.resident.put(index, data.clone());
        }
        drop(blocks);
        // Waiters retry on failure and one of them takes over the load
        self.loaded.notify_all();

        result
    }
}

impl<R: RangeReader> RangeReader for BlockCache<R> {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        let end = offset.saturating_add(len as u64);
        if end > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }
        if len == 0 {
            return Ok(Bytes::new());
        }

        let first = offset / self.block_size;
        let last = (end - 1) / self.block_size;
        if first == last {
            let block = self.block(first)?;
            let from = (offset - first * self.block_size) as usize;
            if from + len > block.len() {
                return Err(IoError::ShortRead {
                    offset,
                    expected: len,
                    actual: block.len().saturating_sub(from),
                });
            }
            return Ok(block.slice(from..from + len));
        }

        let mut out = BytesMut::with_capacity(len);
        for index in first..=last {
            let block = self.block(index)?;
            let block_start = index * self.block_size;
            let from = offset.max(block_start) - block_start;
            let to = end.min(block_start + self.block_size) - block_start;
            let Some(part) = block.get(from as usize..to as usize) else {
                return Err(IoError::ShortRead {
                    offset,
                    expected: len,
                    actual: out.len(),
                });
            };
            out.extend_from_slice(part);
        }
        Ok(out.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
