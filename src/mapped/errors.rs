//! Error types for the memory-mapped file layer.
//!
//! Error codes:
//! - PS_MAP_FAILED (FATAL severity)
//! - PS_REMAP_FAILED (FATAL severity)
//! - PS_INVALID_INDEX (ERROR severity)
//! - PS_SYNC_FAILED (ERROR severity, logged but non-fatal by callers)
//! - PS_FILE_CORRUPTED (FATAL severity)

use std::fmt;
use std::io;

/// Severity levels for engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, engine continues
    Error,
    /// The mapping (and therefore the store) is unusable
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Error codes for the mapped layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappedErrorCode {
    /// Initial mapping of the file failed
    PsMapFailed,
    /// Growth remap failed; the previous mapping is kept usable
    PsRemapFailed,
    /// Record index out of bounds
    PsInvalidIndex,
    /// Flush was not confirmed by the OS
    PsSyncFailed,
    /// File header is invalid (bad magic, version, or stride)
    PsFileCorrupted,
}

impl MappedErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            MappedErrorCode::PsMapFailed => "PS_MAP_FAILED",
            MappedErrorCode::PsRemapFailed => "PS_REMAP_FAILED",
            MappedErrorCode::PsInvalidIndex => "PS_INVALID_INDEX",
            MappedErrorCode::PsSyncFailed => "PS_SYNC_FAILED",
            MappedErrorCode::PsFileCorrupted => "PS_FILE_CORRUPTED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            MappedErrorCode::PsMapFailed => Severity::Fatal,
            MappedErrorCode::PsRemapFailed => Severity::Fatal,
            MappedErrorCode::PsInvalidIndex => Severity::Error,
            MappedErrorCode::PsSyncFailed => Severity::Error,
            MappedErrorCode::PsFileCorrupted => Severity::Fatal,
        }
    }
}

impl fmt::Display for MappedErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Mapped-layer error with context.
#[derive(Debug)]
pub struct MappedError {
    code: MappedErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl MappedError {
    pub fn map_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: MappedErrorCode::PsMapFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn remap_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: MappedErrorCode::PsRemapFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn invalid_index(index: u64, len: u64) -> Self {
        Self {
            code: MappedErrorCode::PsInvalidIndex,
            message: format!("record index {} out of bounds (len {})", index, len),
            details: None,
            source: None,
        }
    }

    pub fn sync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: MappedErrorCode::PsSyncFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self {
            code: MappedErrorCode::PsFileCorrupted,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn code(&self) -> MappedErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for MappedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for MappedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for mapped-layer operations.
pub type MappedResult<T> = Result<T, MappedError>;
