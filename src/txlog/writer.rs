//! Transaction log writer.
//!
//! Transaction boundaries (`begin`, `commit`, `rollback`) fsync before
//! returning; `log_operation` only buffers. Acknowledging a commit
//! before its fsync is forbidden.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::observability::Logger;

use super::errors::{TxLogError, TxLogResult};
use super::reader::LogReader;
use super::record::{FrameKind, LogFrame, Operation};

/// Append-only write-ahead log of transaction frames.
pub struct TransactionLog {
    log_path: PathBuf,
    file: File,
    /// Next transaction id to assign (starts at 1, never reused).
    next_txid: u64,
    /// Transactions begun in this session that have not reached a
    /// terminal state.
    open_txids: HashSet<u64>,
    #[cfg(test)]
    pub(crate) fail_next_commit: bool,
}

impl TransactionLog {
    /// Open or create the log file.
    ///
    /// The next transaction id continues from the highest id present in
    /// the existing log. A torn tail left by a crash is truncated away
    /// so that frames appended in this session stay replayable.
    pub fn open(path: &Path) -> TxLogResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                TxLogError::append_failed(
                    format!("failed to open transaction log: {}", path.display()),
                    e,
                )
            })?;

        let (next_txid, valid_len) = Self::scan_tail(path)?;

        let file_len = file
            .metadata()
            .map_err(|e| TxLogError::append_failed("failed to stat transaction log", e))?
            .len();
        if file_len > valid_len {
            Logger::warn(
                "txlog_tail_truncated",
                &[
                    ("valid_bytes", &valid_len.to_string()),
                    ("discarded_bytes", &(file_len - valid_len).to_string()),
                ],
            );
            file.set_len(valid_len)
                .map_err(|e| TxLogError::append_failed("failed to truncate torn tail", e))?;
            file.sync_all()
                .map_err(|e| TxLogError::fsync_failed("fsync after tail truncation failed", e))?;
        }

        Ok(Self {
            log_path: path.to_path_buf(),
            file,
            next_txid,
            open_txids: HashSet::new(),
            #[cfg(test)]
            fail_next_commit: false,
        })
    }

    /// Scan the whole log, returning the next transaction id and the
    /// byte length of the valid frame prefix.
    fn scan_tail(path: &Path) -> TxLogResult<(u64, u64)> {
        let mut reader = match LogReader::open(path) {
            Ok(r) => r,
            Err(_) => return Ok((1, 0)),
        };
        let mut max_txid = 0u64;
        while let Some(frame) = reader.read_next()? {
            max_txid = max_txid.max(frame.txid);
        }
        Ok((max_txid + 1, reader.current_offset()))
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Begin a new transaction; the Begin frame is durable on return.
    pub fn begin(&mut self) -> TxLogResult<u64> {
        let txid = self.next_txid;
        let frame = LogFrame::new(FrameKind::Begin, txid, Utc::now().timestamp_micros());
        self.append_frame(&frame)?;
        self.fsync()?;
        self.next_txid += 1;
        self.open_txids.insert(txid);
        Ok(txid)
    }

    /// Log one operation under an open transaction. Buffered; durability
    /// comes from the later commit or rollback fsync.
    pub fn log_operation(&mut self, txid: u64, operation: Operation) -> TxLogResult<()> {
        if !self.open_txids.contains(&txid) {
            return Err(TxLogError::unknown_tx(txid));
        }
        let frame = LogFrame::operation(txid, Utc::now().timestamp_micros(), operation);
        self.append_frame(&frame)
    }

    /// Mark a transaction committed; durable on return.
    pub fn commit(&mut self, txid: u64) -> TxLogResult<()> {
        #[cfg(test)]
        if self.fail_next_commit {
            self.fail_next_commit = false;
            return Err(TxLogError::fsync_failed(
                "transaction log fsync failed",
                std::io::Error::new(std::io::ErrorKind::Other, "simulated fsync failure"),
            ));
        }
        self.terminate(txid, FrameKind::Commit)
    }

    /// Mark a transaction rolled back; durable on return.
    pub fn rollback(&mut self, txid: u64) -> TxLogResult<()> {
        self.terminate(txid, FrameKind::Rollback)
    }

    /// Write a terminal frame for a transaction recovered from a prior
    /// session (not present in this writer's open set).
    pub fn force_rollback(&mut self, txid: u64) -> TxLogResult<()> {
        let frame =
            LogFrame::new(FrameKind::Rollback, txid, Utc::now().timestamp_micros());
        self.append_frame(&frame)?;
        self.fsync()
    }

    fn terminate(&mut self, txid: u64, kind: FrameKind) -> TxLogResult<()> {
        if !self.open_txids.contains(&txid) {
            return Err(TxLogError::unknown_tx(txid));
        }
        let frame = LogFrame::new(kind, txid, Utc::now().timestamp_micros());
        self.append_frame(&frame)?;
        self.fsync()?;
        // Only forget the transaction once the terminal frame is durable,
        // so a failed commit can still be rolled back.
        self.open_txids.remove(&txid);
        Ok(())
    }

    fn append_frame(&mut self, frame: &LogFrame) -> TxLogResult<()> {
        let bytes = frame.serialize();
        self.file.write_all(&bytes).map_err(|e| {
            TxLogError::append_failed(
                format!("failed to write frame for transaction {}", frame.txid),
                e,
            )
        })
    }

    fn fsync(&self) -> TxLogResult<()> {
        self.file.sync_all().map_err(|e| {
            TxLogError::fsync_failed("transaction log fsync failed", e)
        })
    }

    /// Scan the whole log and return transactions whose last observed
    /// state is still pending.
    pub fn pending_transactions(&self) -> TxLogResult<Vec<super::reader::PendingTransaction>> {
        LogReader::open(&self.log_path)?.pending_transactions()
    }
}

#[cfg(test)]
mod tests {
    use super::super::record::{OperationKind, PreImage};
    use super::*;
    use tempfile::TempDir;

    fn sample_op(record_id: u64) -> Operation {
        Operation {
            kind: OperationKind::Insert,
            record_id,
            record_index: 0,
            pre: PreImage::default(),
        }
    }

    #[test]
    fn test_txids_start_at_one_and_increment() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        assert_eq!(log.begin().unwrap(), 1);
        assert_eq!(log.begin().unwrap(), 2);
    }

    #[test]
    fn test_txids_continue_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.log");
        {
            let mut log = TransactionLog::open(&path).unwrap();
            let txid = log.begin().unwrap();
            log.commit(txid).unwrap();
        }
        {
            let mut log = TransactionLog::open(&path).unwrap();
            assert_eq!(log.begin().unwrap(), 2);
        }
    }

    #[test]
    fn test_operation_on_unknown_tx_rejected() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let err = log.log_operation(77, sample_op(1)).unwrap_err();
        assert_eq!(err.code().code(), "PS_TXLOG_UNKNOWN_TX");
    }

    #[test]
    fn test_failed_commit_leaves_tx_open_for_rollback() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let txid = log.begin().unwrap();
        log.log_operation(txid, sample_op(1)).unwrap();
        log.fail_next_commit = true;
        assert!(log.commit(txid).is_err());

        log.rollback(txid).unwrap();
        assert!(log.pending_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_committed_tx_not_pending() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let txid = log.begin().unwrap();
        log.log_operation(txid, sample_op(1)).unwrap();
        log.commit(txid).unwrap();

        assert!(log.pending_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_uncommitted_tx_reported_pending() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tx.log");
        {
            let mut log = TransactionLog::open(&path).unwrap();
            let committed = log.begin().unwrap();
            log.log_operation(committed, sample_op(1)).unwrap();
            log.commit(committed).unwrap();

            let abandoned = log.begin().unwrap();
            log.log_operation(abandoned, sample_op(2)).unwrap();
            log.log_operation(abandoned, sample_op(3)).unwrap();
            // No terminal frame: simulates a crash mid-transaction.
        }

        let log = TransactionLog::open(&path).unwrap();
        let pending = log.pending_transactions().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].txid, 2);
        assert_eq!(pending[0].operations.len(), 2);
    }

    #[test]
    fn test_rolled_back_tx_not_pending() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let txid = log.begin().unwrap();
        log.log_operation(txid, sample_op(1)).unwrap();
        log.rollback(txid).unwrap();

        assert!(log.pending_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_double_commit_rejected() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let txid = log.begin().unwrap();
        log.commit(txid).unwrap();
        assert!(log.commit(txid).is_err());
    }
}
