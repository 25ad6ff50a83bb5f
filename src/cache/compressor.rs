//! zstd compression for on-disk blobs.

use crate::error::CacheError;

/// Compresses payloads before they are written to the disk tier.
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: i32,
}

impl Compressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// Compress data with zstd.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        zstd::encode_all(data, self.level).map_err(CacheError::Io)
    }

    /// Decompress zstd data. A corrupt frame is a decode failure, not an I/O fault.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>, CacheError> {
        zstd::decode_all(data).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(zstd::DEFAULT_COMPRESSION_LEVEL)
    }
}
