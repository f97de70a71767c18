mod block_cache;
mod file_reader;
mod range_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_SIZE};
pub use file_reader::{FileRangeReader, MemoryRangeReader};
pub use range_reader::{read_u16_be, RangeReader};
