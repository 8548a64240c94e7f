//! Pluggable header checksum
//!
//! The simulator only needs a deterministic `bytes -> u32` function with a
//! roughly uniform output. CRC-32 is the default; tests swap in fakes.

use crate::BlockHeader;

/// Abstract interface for checksum computation.
pub trait Checksum: Send + Sync {
    /// Compute the checksum of `bytes`.
    fn checksum(&self, bytes: &[u8]) -> u32;

    /// Short name for logging.
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// CRC-32 (IEEE) checksum provider using crc32fast.
#[derive(Debug, Default, Clone, Copy)]
pub struct Crc32Checksum;

impl Checksum for Crc32Checksum {
    fn checksum(&self, bytes: &[u8]) -> u32 {
        crc32fast::hash(bytes)
    }

    fn name(&self) -> &'static str {
        "crc32"
    }
}

/// Checksum of a header's preimage
pub fn header_checksum(checksum: &dyn Checksum, header: &BlockHeader) -> u32 {
    checksum.checksum(&header.preimage())
}

/// Checksum of a header's preimage, reusing `buf` for the serialization
pub fn header_checksum_with(checksum: &dyn Checksum, header: &BlockHeader, buf: &mut Vec<u8>) -> u32 {
    header.write_preimage(buf);
    checksum.checksum(buf)
}
