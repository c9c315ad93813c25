//! Token records and posting entries.
//!
//! Token record layout (fixed 64 bytes, little-endian):
//!
//! ```text
//! | hash: u64 | token_len: u16 | pad: u16 | doc_freq: u32 |
//! | total_term_freq: u64 | first_posting: u64 | last_posting: u64 |
//! | reserved: 24 bytes |
//! ```
//!
//! Posting entries are variable-length and live in a content file as
//! checksummed blocks. Each posting carries the offset of the previous
//! posting for the same token, so the full chain is walkable backwards
//! from the token record's `last_posting`.

use std::io::{self, Read};

use crate::mapped::FixedRecord;

/// Sentinel for "no posting" in chain pointers.
pub const NO_POSTING: u64 = u64::MAX;

/// Per-token aggregate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRecord {
    pub hash: u64,
    pub token_len: u16,
    /// Documents this token has been indexed in (decremented on
    /// removal).
    pub doc_freq: u32,
    /// Sum of term frequencies across all postings ever written.
    pub total_term_freq: u64,
    /// Offset of the oldest posting for this token.
    pub first_posting: u64,
    /// Offset of the newest posting; chain traversal starts here.
    pub last_posting: u64,
}

impl TokenRecord {
    pub fn new(hash: u64, token_len: u16) -> Self {
        Self {
            hash,
            token_len,
            doc_freq: 0,
            total_term_freq: 0,
            first_posting: NO_POSTING,
            last_posting: NO_POSTING,
        }
    }
}

impl FixedRecord for TokenRecord {
    const STRIDE: usize = 64;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.hash.to_le_bytes());
        buf[8..10].copy_from_slice(&self.token_len.to_le_bytes());
        buf[10..12].fill(0);
        buf[12..16].copy_from_slice(&self.doc_freq.to_le_bytes());
        buf[16..24].copy_from_slice(&self.total_term_freq.to_le_bytes());
        buf[24..32].copy_from_slice(&self.first_posting.to_le_bytes());
        buf[32..40].copy_from_slice(&self.last_posting.to_le_bytes());
        buf[40..64].fill(0);
    }

    fn decode_from(buf: &[u8]) -> Self {
        let mut u64buf = [0u8; 8];
        u64buf.copy_from_slice(&buf[0..8]);
        let hash = u64::from_le_bytes(u64buf);
        let token_len = u16::from_le_bytes([buf[8], buf[9]]);
        let doc_freq = u32::from_le_bytes([buf[12], buf[13], buf[14], buf[15]]);
        u64buf.copy_from_slice(&buf[16..24]);
        let total_term_freq = u64::from_le_bytes(u64buf);
        u64buf.copy_from_slice(&buf[24..32]);
        let first_posting = u64::from_le_bytes(u64buf);
        u64buf.copy_from_slice(&buf[32..40]);
        let last_posting = u64::from_le_bytes(u64buf);
        Self {
            hash,
            token_len,
            doc_freq,
            total_term_freq,
            first_posting,
            last_posting,
        }
    }
}

/// One token/document occurrence record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingEntry {
    pub doc_id: u64,
    pub record_index: u32,
    pub term_frequency: u32,
    /// Offset of the previous posting for the same token, or
    /// [`NO_POSTING`].
    pub prev_posting: u64,
    /// Word positions of the token within the document.
    pub positions: Vec<u32>,
}

impl PostingEntry {
    /// Serialize to bytes (little-endian, length-prefixed positions).
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28 + self.positions.len() * 4);
        buf.extend_from_slice(&self.doc_id.to_le_bytes());
        buf.extend_from_slice(&self.record_index.to_le_bytes());
        buf.extend_from_slice(&self.term_frequency.to_le_bytes());
        buf.extend_from_slice(&self.prev_posting.to_le_bytes());
        buf.extend_from_slice(&(self.positions.len() as u32).to_le_bytes());
        for position in &self.positions {
            buf.extend_from_slice(&position.to_le_bytes());
        }
        buf
    }

    /// Deserialize from bytes.
    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut cursor = io::Cursor::new(data);

        let mut u64buf = [0u8; 8];
        let mut u32buf = [0u8; 4];

        cursor.read_exact(&mut u64buf)?;
        let doc_id = u64::from_le_bytes(u64buf);
        cursor.read_exact(&mut u32buf)?;
        let record_index = u32::from_le_bytes(u32buf);
        cursor.read_exact(&mut u32buf)?;
        let term_frequency = u32::from_le_bytes(u32buf);
        cursor.read_exact(&mut u64buf)?;
        let prev_posting = u64::from_le_bytes(u64buf);
        cursor.read_exact(&mut u32buf)?;
        let count = u32::from_le_bytes(u32buf) as usize;

        let mut positions = Vec::with_capacity(count);
        for _ in 0..count {
            cursor.read_exact(&mut u32buf)?;
            positions.push(u32::from_le_bytes(u32buf));
        }

        Ok(Self {
            doc_id,
            record_index,
            term_frequency,
            prev_posting,
            positions,
        })
    }
}
