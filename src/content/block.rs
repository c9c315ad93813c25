//! Content block header codec.
//!
//! Block layout (little-endian):
//!
//! ```text
//! +---------------------------+
//! | magic: u32 (0xC0FFEE42)   |
//! | crc32: u32 (payload)      |
//! | encoding: u8              |
//! | pad: [u8; 3]              |
//! | size: u32 (stored bytes)  |
//! +---------------------------+
//! | payload (size bytes)      |
//! +---------------------------+
//! | pad to 16-byte alignment  |
//! +---------------------------+
//! ```
//!
//! The checksum covers the stored payload bytes (post-compression).

/// Magic constant at the start of every content block.
pub const BLOCK_MAGIC: u32 = 0xC0FF_EE42;

/// Fixed header size in bytes.
pub const BLOCK_HEADER_SIZE: u64 = 16;

/// Blocks start on 16-byte boundaries.
pub const BLOCK_ALIGN: u64 = 16;

/// Payload encoding tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    /// Raw bytes
    Raw = 0,
    /// zstd-compressed bytes
    Zstd = 1,
}

impl Encoding {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Encoding::Raw),
            1 => Some(Encoding::Zstd),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub crc32: u32,
    pub encoding: Encoding,
    /// Stored payload size in bytes (after compression, if any).
    pub size: u32,
}

impl BlockHeader {
    /// Encode the header into exactly `BLOCK_HEADER_SIZE` bytes.
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&BLOCK_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&self.crc32.to_le_bytes());
        buf[8] = self.encoding.as_u8();
        buf[9..12].fill(0);
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
    }

    /// Decode a header, returning `None` if magic or encoding are not
    /// recognizable (the caller decides whether that means corruption
    /// or end-of-log).
    pub fn decode_from(buf: &[u8]) -> Option<Self> {
        if buf.len() < BLOCK_HEADER_SIZE as usize {
            return None;
        }
        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != BLOCK_MAGIC {
            return None;
        }
        let crc32 = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let encoding = Encoding::from_u8(buf[8])?;
        let size = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        Some(Self {
            crc32,
            encoding,
            size,
        })
    }
}

/// Round `n` up to the block alignment.
pub(crate) fn align_up(n: u64) -> u64 {
    n.div_ceil(BLOCK_ALIGN) * BLOCK_ALIGN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = BlockHeader {
            crc32: 0x1234_5678,
            encoding: Encoding::Zstd,
            size: 4096,
        };
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        header.encode_into(&mut buf);
        assert_eq!(BlockHeader::decode_from(&buf), Some(header));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        BlockHeader {
            crc32: 1,
            encoding: Encoding::Raw,
            size: 8,
        }
        .encode_into(&mut buf);
        buf[0] ^= 0xFF;
        assert_eq!(BlockHeader::decode_from(&buf), None);
    }

    #[test]
    fn test_unknown_encoding_rejected() {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        BlockHeader {
            crc32: 1,
            encoding: Encoding::Raw,
            size: 8,
        }
        .encode_into(&mut buf);
        buf[8] = 9;
        assert_eq!(BlockHeader::decode_from(&buf), None);
    }

    #[test]
    fn test_alignment() {
        assert_eq!(align_up(0), 0);
        assert_eq!(align_up(1), 16);
        assert_eq!(align_up(16), 16);
        assert_eq!(align_up(17), 32);
    }
}
