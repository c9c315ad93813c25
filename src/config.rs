//! Engine configuration.
//!
//! Configuration is plain serde-backed data with sensible defaults; the
//! host application may persist it as JSON next to the data directory.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Tunable parameters for a [`crate::store::Store`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Initial record capacity of the record file (records, not bytes).
    pub initial_record_capacity: u64,
    /// Initial size of the content file in bytes (rounded up to a page).
    pub initial_content_bytes: u64,
    /// Chunk size for streaming content reads, in bytes.
    pub stream_chunk_bytes: usize,
    /// Payloads at or above this size are compressed with zstd.
    pub compression_threshold_bytes: usize,
    /// Disable compression entirely.
    pub compression_enabled: bool,
    /// zstd compression level (1..=21).
    pub compression_level: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            initial_record_capacity: 1024,
            initial_content_bytes: 256 * 1024,
            stream_chunk_bytes: 64 * 1024,
            compression_threshold_bytes: 4 * 1024,
            compression_enabled: true,
            compression_level: 3,
        }
    }
}

impl StoreConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Save configuration as JSON.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, contents)
    }
}
