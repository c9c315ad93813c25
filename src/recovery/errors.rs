use thiserror::Error;

use crate::txlog::TxLogError;

/// Failures surfaced by the startup recovery pass.
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// The transaction log itself could not be scanned or appended to.
    #[error("transaction log failure during recovery: {0}")]
    TxLog(#[from] TxLogError),

    /// Compensating an individual operation failed.
    #[error("compensation failed for txid {txid} record {record_id}: {reason}")]
    Compensation {
        txid: u64,
        record_id: u64,
        reason: String,
    },
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
