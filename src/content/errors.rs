//! Error types for the content store.

use std::fmt;

use crate::mapped::MappedError;

/// Content store error with enough context to locate the failing block.
#[derive(Debug)]
pub enum ContentError {
    /// Magic or checksum mismatch; the block is unrecoverable.
    Corrupted { offset: u64, reason: String },
    /// Location does not point at a valid block.
    InvalidOffset { offset: u64, file_len: u64 },
    /// Compression or decompression failed.
    Compression { offset: u64, reason: String },
    /// Failure in the underlying mapped file (map/remap/sync).
    Mapped(MappedError),
}

impl ContentError {
    pub fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        ContentError::Corrupted {
            offset,
            reason: reason.into(),
        }
    }

    pub fn invalid_offset(offset: u64, file_len: u64) -> Self {
        ContentError::InvalidOffset { offset, file_len }
    }

    pub fn compression(offset: u64, reason: impl Into<String>) -> Self {
        ContentError::Compression {
            offset,
            reason: reason.into(),
        }
    }

    /// True when the failure makes the whole store unusable, not just
    /// one block.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ContentError::Mapped(e) if e.is_fatal())
    }
}

impl fmt::Display for ContentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentError::Corrupted { offset, reason } => {
                write!(f, "PS_CONTENT_CORRUPTED at offset {}: {}", offset, reason)
            }
            ContentError::InvalidOffset { offset, file_len } => write!(
                f,
                "PS_INVALID_OFFSET: {} outside content file of {} bytes",
                offset, file_len
            ),
            ContentError::Compression { offset, reason } => {
                write!(f, "PS_CONTENT_COMPRESSION at offset {}: {}", offset, reason)
            }
            ContentError::Mapped(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ContentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContentError::Mapped(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MappedError> for ContentError {
    fn from(e: MappedError) -> Self {
        ContentError::Mapped(e)
    }
}

/// Result type for content store operations.
pub type ContentResult<T> = Result<T, ContentError>;
