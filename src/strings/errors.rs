//! Error types for the string pool.

use thiserror::Error;

use crate::content::ContentError;
use crate::mapped::MappedError;

/// Result type for string pool operations.
pub type StringsResult<T> = Result<T, StringsError>;

/// String pool errors.
#[derive(Debug, Error)]
pub enum StringsError {
    #[error("string entry {0} does not exist")]
    EntryNotFound(u32),

    #[error("string entry {0} released below zero references")]
    RefcountUnderflow(u32),

    #[error("stored bytes for entry {0} are not valid UTF-8")]
    InvalidUtf8(u32),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Mapped(#[from] MappedError),
}
