use std::io;

use thiserror::Error;

use crate::content::ContentError;
use crate::mapped::MappedError;
use crate::recovery::RecoveryError;
use crate::search::SearchError;
use crate::strings::StringsError;
use crate::txlog::TxLogError;

/// Facade error: component failures with operation context, plus the
/// lookup failures the facade produces itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no live record for id {0}")]
    NotFound(u64),

    #[error("record file failure: {0}")]
    Mapped(#[from] MappedError),

    #[error("content store failure: {0}")]
    Content(#[from] ContentError),

    #[error("string pool failure: {0}")]
    Strings(#[from] StringsError),

    #[error("search index failure: {0}")]
    Search(#[from] SearchError),

    #[error("transaction log failure: {0}")]
    TxLog(#[from] TxLogError),

    #[error("recovery failure: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("store io failure: {0}")]
    Io(#[from] io::Error),

    /// A step inside a transaction failed; compensations were applied
    /// and the transaction rolled back.
    #[error("{op} failed for record {id}: {source}")]
    Transaction {
        op: &'static str,
        id: u64,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Wrap with the operation and record id it occurred in.
    pub fn in_op(self, op: &'static str, id: u64) -> Self {
        StoreError::Transaction {
            op,
            id,
            source: Box::new(self),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
