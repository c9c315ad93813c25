//! Error types for the search index.

use thiserror::Error;

use crate::content::ContentError;
use crate::mapped::MappedError;

/// Result type for search operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// Search index errors.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("posting entry at offset {offset} is malformed: {reason}")]
    MalformedPosting { offset: u64, reason: String },

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Mapped(#[from] MappedError),
}

impl SearchError {
    pub fn malformed_posting(offset: u64, reason: impl Into<String>) -> Self {
        SearchError::MalformedPosting {
            offset,
            reason: reason.into(),
        }
    }
}
