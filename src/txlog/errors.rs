//! Error types for the transaction log.
//!
//! Error codes:
//! - PS_TXLOG_APPEND_FAILED (ERROR severity)
//! - PS_TXLOG_FSYNC_FAILED (FATAL severity)
//! - PS_TXLOG_CORRUPTED (FATAL severity)
//! - PS_TXLOG_UNKNOWN_TX (ERROR severity)

use std::fmt;
use std::io;

use crate::mapped::Severity;

/// Transaction log error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxLogErrorCode {
    /// Frame write failed
    PsTxLogAppendFailed,
    /// fsync failed; durability cannot be guaranteed
    PsTxLogFsyncFailed,
    /// Frame failed structural validation away from the log tail
    PsTxLogCorrupted,
    /// Operation referenced a transaction id never begun
    PsTxLogUnknownTx,
}

impl TxLogErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            TxLogErrorCode::PsTxLogAppendFailed => "PS_TXLOG_APPEND_FAILED",
            TxLogErrorCode::PsTxLogFsyncFailed => "PS_TXLOG_FSYNC_FAILED",
            TxLogErrorCode::PsTxLogCorrupted => "PS_TXLOG_CORRUPTED",
            TxLogErrorCode::PsTxLogUnknownTx => "PS_TXLOG_UNKNOWN_TX",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            TxLogErrorCode::PsTxLogAppendFailed => Severity::Error,
            TxLogErrorCode::PsTxLogFsyncFailed => Severity::Fatal,
            TxLogErrorCode::PsTxLogCorrupted => Severity::Fatal,
            TxLogErrorCode::PsTxLogUnknownTx => Severity::Error,
        }
    }
}

impl fmt::Display for TxLogErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Transaction log error with context.
#[derive(Debug)]
pub struct TxLogError {
    code: TxLogErrorCode,
    message: String,
    source: Option<io::Error>,
}

impl TxLogError {
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: TxLogErrorCode::PsTxLogAppendFailed,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn fsync_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: TxLogErrorCode::PsTxLogFsyncFailed,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn corrupted(message: impl Into<String>) -> Self {
        Self {
            code: TxLogErrorCode::PsTxLogCorrupted,
            message: message.into(),
            source: None,
        }
    }

    pub fn unknown_tx(txid: u64) -> Self {
        Self {
            code: TxLogErrorCode::PsTxLogUnknownTx,
            message: format!("transaction {} was never begun", txid),
            source: None,
        }
    }

    pub fn code(&self) -> TxLogErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_fatal(&self) -> bool {
        self.code.severity() == Severity::Fatal
    }
}

impl fmt::Display for TxLogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )
    }
}

impl std::error::Error for TxLogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for transaction log operations.
pub type TxLogResult<T> = Result<T, TxLogError>;
