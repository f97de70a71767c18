//! Configuration for opening slides.
//!
//! This module provides a configuration struct that supports:
//! - Command-line arguments via clap (flatten it into a host CLI)
//! - Environment variables with `WSI_` prefix
//! - Sensible defaults for all settings
//!
//! # Example
//!
//! ```
//! use wsi_region::Config;
//!
//! let config = Config::default();
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Environment Variables
//!
//! - `WSI_CACHE_BYTES` - Decoded tile cache capacity in bytes (default: 32 MiB)
//! - `WSI_BACKGROUND_SCAN` - Run the background restart-marker scanner (default: true)
//! - `WSI_SCANNER_THROTTLE_MS` - Quiet period after a foreground read before the scanner resumes (default: 1000)
//! - `WSI_SCAN_CHUNK_SIZE` - Bytes read per step of the forward marker scan (default: 4096)
//! - `WSI_SCALED_LEVELS` - Synthesize 1/2, 1/4, 1/8 decode levels (default: true)
//! - `WSI_BLOCK_SIZE` - Block size of the per-file block cache (default: 256 KiB)
//! - `WSI_CACHE_BLOCKS` - Blocks cached per file, 0 disables block caching (default: 100)

use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::io::DEFAULT_BLOCK_SIZE;
use crate::tile::DEFAULT_TILE_CACHE_CAPACITY;

// =============================================================================
// Default Values
// =============================================================================

/// Default quiet period before the background scanner resumes.
pub const DEFAULT_SCANNER_THROTTLE_MS: u64 = 1000;

/// Default number of bytes read per forward-scan step.
pub const DEFAULT_SCAN_CHUNK_SIZE: usize = 4096;

/// Default number of blocks to cache per file.
pub const DEFAULT_BLOCK_CACHE_CAPACITY: usize = 100;

/// Smallest forward-scan chunk accepted by [`Config::validate`].
const MIN_SCAN_CHUNK_SIZE: usize = 16;

// =============================================================================
// Config
// =============================================================================

/// Engine settings for opened slides.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "wsi-region")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Tile Cache
    // =========================================================================
    /// Capacity of the decoded tile cache in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "WSI_CACHE_BYTES")]
    pub cache_bytes: usize,

    // =========================================================================
    // Restart Marker Scanning
    // =========================================================================
    /// Run a background thread that indexes restart markers while idle.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "WSI_BACKGROUND_SCAN")]
    pub background_scan: bool,

    /// Milliseconds the scanner stays paused after the last foreground read.
    #[arg(long, default_value_t = DEFAULT_SCANNER_THROTTLE_MS, env = "WSI_SCANNER_THROTTLE_MS")]
    pub scanner_throttle_ms: u64,

    /// Bytes read per step when scanning forward for restart markers.
    #[arg(long, default_value_t = DEFAULT_SCAN_CHUNK_SIZE, env = "WSI_SCAN_CHUNK_SIZE")]
    pub scan_chunk_size: usize,

    // =========================================================================
    // Levels
    // =========================================================================
    /// Add levels decoded at 1/2, 1/4 and 1/8 scale where tile sizes allow.
    #[arg(long, default_value_t = true, action = ArgAction::Set, env = "WSI_SCALED_LEVELS")]
    pub scaled_levels: bool,

    // =========================================================================
    // Block Cache
    // =========================================================================
    /// Block size in bytes for the per-file block cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "WSI_BLOCK_SIZE")]
    pub block_size: usize,

    /// Number of blocks cached per file (0 disables block caching).
    #[arg(long, default_value_t = DEFAULT_BLOCK_CACHE_CAPACITY, env = "WSI_CACHE_BLOCKS")]
    pub cache_blocks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_bytes: DEFAULT_TILE_CACHE_CAPACITY,
            background_scan: true,
            scanner_throttle_ms: DEFAULT_SCANNER_THROTTLE_MS,
            scan_chunk_size: DEFAULT_SCAN_CHUNK_SIZE,
            scaled_levels: true,
            block_size: DEFAULT_BLOCK_SIZE,
            cache_blocks: DEFAULT_BLOCK_CACHE_CAPACITY,
        }
    }
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_bytes == 0 {
            return Err("cache_bytes must be greater than 0".to_string());
        }

        if self.scan_chunk_size < MIN_SCAN_CHUNK_SIZE {
            return Err(format!(
                "scan_chunk_size must be at least {} bytes",
                MIN_SCAN_CHUNK_SIZE
            ));
        }

        if self.cache_blocks > 0 && (self.block_size < 1024 || self.block_size > 16 * 1024 * 1024)
        {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }

        Ok(())
    }

    /// Quiet period after a foreground read before the scanner resumes.
    pub fn scanner_throttle(&self) -> Duration {
        Duration::from_millis(self.scanner_throttle_ms)
    }

    /// Whether file readers should be wrapped in a block cache.
    pub fn block_cache_enabled(&self) -> bool {
        self.cache_blocks > 0
    }
}

// =============================================================================
// Tests
// =============================================================================
