//! Write-ahead transaction log.
//!
//! Every logical mutation runs inside a transaction. The log records the
//! transaction boundary, each operation with enough pre-image data to
//! undo it, and the terminal state (commit or rollback). On startup,
//! transactions with no terminal state are compensated by the recovery
//! pass and forced to rollback.
//!
//! # Durability
//!
//! - `begin`, `commit`, and `rollback` fsync before returning
//! - `log_operation` is buffered; a crash may lose the log tail, which
//!   replay tolerates as a torn tail
//! - Every frame is CRC32-protected; a bad frame ends replay

mod errors;
mod reader;
mod record;
mod writer;

pub use errors::{TxLogError, TxLogErrorCode, TxLogResult};
pub use reader::{LogReader, PendingTransaction};
pub use record::{FrameKind, LogFrame, Operation, OperationKind, PreImage};
pub use writer::TransactionLog;
