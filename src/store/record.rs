//! Fixed-layout prompt record.
//!
//! On-disk layout, stride 64:
//!
//! ```text
//! | 0  id               u64 |
//! | 8  content offset   u64 |
//! | 16 content length   u32 |
//! | 20 title string id  u32 |
//! | 24 category         u16 |
//! | 26 flags            u16 |  bit 0 = deleted
//! | 28 created micros   i64 |
//! | 36 modified micros  i64 |
//! | 44 revision         u32 |
//! | 48 reserved          16 |
//! ```
//!
//! Record indexes are never reused; deletion flips the flag bit and
//! leaves everything else for a future compactor.

use crate::mapped::FixedRecord;

/// Deleted marker in [`PromptRecord::flags`].
pub const FLAG_DELETED: u16 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptRecord {
    pub id: u64,
    pub content_offset: u64,
    pub content_length: u32,
    pub title_id: u32,
    pub category: u16,
    pub flags: u16,
    pub created_micros: i64,
    pub modified_micros: i64,
    pub revision: u32,
}

impl PromptRecord {
    pub fn is_deleted(&self) -> bool {
        self.flags & FLAG_DELETED != 0
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        if deleted {
            self.flags |= FLAG_DELETED;
        } else {
            self.flags &= !FLAG_DELETED;
        }
    }
}

impl FixedRecord for PromptRecord {
    const STRIDE: usize = 64;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.content_offset.to_le_bytes());
        buf[16..20].copy_from_slice(&self.content_length.to_le_bytes());
        buf[20..24].copy_from_slice(&self.title_id.to_le_bytes());
        buf[24..26].copy_from_slice(&self.category.to_le_bytes());
        buf[26..28].copy_from_slice(&self.flags.to_le_bytes());
        buf[28..36].copy_from_slice(&self.created_micros.to_le_bytes());
        buf[36..44].copy_from_slice(&self.modified_micros.to_le_bytes());
        buf[44..48].copy_from_slice(&self.revision.to_le_bytes());
        buf[48..64].fill(0);
    }

    fn decode_from(buf: &[u8]) -> Self {
        let u64_at = |off: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[off..off + 8]);
            u64::from_le_bytes(b)
        };
        let u32_at = |off: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&buf[off..off + 4]);
            u32::from_le_bytes(b)
        };
        let u16_at = |off: usize| u16::from_le_bytes([buf[off], buf[off + 1]]);

        Self {
            id: u64_at(0),
            content_offset: u64_at(8),
            content_length: u32_at(16),
            title_id: u32_at(20),
            category: u16_at(24),
            flags: u16_at(26),
            created_micros: u64_at(28) as i64,
            modified_micros: u64_at(36) as i64,
            revision: u32_at(44),
        }
    }
}
