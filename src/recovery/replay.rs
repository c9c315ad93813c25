//! Compensation replay for transactions left pending by a crash.
//!
//! Commit is the only success terminal: any transaction without a
//! terminal frame is undone. Operations are compensated in reverse log
//! order, then the transaction is forced to its rollback terminal so a
//! second recovery pass sees nothing pending.
//!
//! A failed compensation is logged and counted, never propagated: one
//! unrecoverable record must not keep the rest of the log from being
//! settled. The transaction is still forced to rollback.

use crate::observability::Logger;
use crate::txlog::{Operation, OperationKind, PreImage, TransactionLog};

use super::errors::{RecoveryError, RecoveryResult};

/// Mutations the recovery pass applies to record state.
///
/// The record layer implements this; unit tests substitute a mock.
pub trait CompensationTarget {
    /// Undo an insert by flagging the record deleted.
    fn mark_deleted(&mut self, record_id: u64, record_index: u32) -> Result<(), String>;

    /// Undo a content update by restoring the pre-image pointer and
    /// bookkeeping fields.
    fn restore_pre_image(
        &mut self,
        record_id: u64,
        record_index: u32,
        pre: &PreImage,
    ) -> Result<(), String>;

    /// Undo a soft delete by clearing the deleted flag.
    fn clear_deleted(&mut self, record_id: u64, record_index: u32) -> Result<(), String>;
}

/// Outcome counters for one recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub transactions_rolled_back: u64,
    pub operations_compensated: u64,
    pub compensation_failures: u64,
}

impl RecoveryStats {
    pub fn is_clean(&self) -> bool {
        self.transactions_rolled_back == 0 && self.compensation_failures == 0
    }
}

/// Scan the log for pending transactions and compensate each one.
pub fn recover<T: CompensationTarget>(
    log: &mut TransactionLog,
    target: &mut T,
) -> RecoveryResult<RecoveryStats> {
    let pending = log.pending_transactions()?;
    let mut stats = RecoveryStats::default();

    if pending.is_empty() {
        return Ok(stats);
    }

    Logger::warn(
        "recovery_started",
        &[("pending_transactions", &pending.len().to_string())],
    );

    for tx in pending {
        for op in tx.operations.iter().rev() {
            match compensate(target, tx.txid, op) {
                Ok(()) => stats.operations_compensated += 1,
                Err(RecoveryError::Compensation {
                    txid,
                    record_id,
                    reason,
                }) => {
                    stats.compensation_failures += 1;
                    Logger::error(
                        "recovery_compensation_failed",
                        &[
                            ("txid", &txid.to_string()),
                            ("record_id", &record_id.to_string()),
                            ("reason", &reason),
                        ],
                    );
                }
                Err(other) => return Err(other),
            }
        }
        log.force_rollback(tx.txid)?;
        stats.transactions_rolled_back += 1;
    }

    Logger::info(
        "recovery_finished",
        &[
            ("rolled_back", &stats.transactions_rolled_back.to_string()),
            ("compensated", &stats.operations_compensated.to_string()),
            ("failures", &stats.compensation_failures.to_string()),
        ],
    );
    Ok(stats)
}

fn compensate<T: CompensationTarget>(
    target: &mut T,
    txid: u64,
    op: &Operation,
) -> RecoveryResult<()> {
    let outcome = match op.kind {
        OperationKind::Insert => target.mark_deleted(op.record_id, op.record_index),
        OperationKind::UpdateContent => {
            target.restore_pre_image(op.record_id, op.record_index, &op.pre)
        }
        OperationKind::SoftDelete => target.clear_deleted(op.record_id, op.record_index),
    };
    outcome.map_err(|reason| RecoveryError::Compensation {
        txid,
        record_id: op.record_id,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txlog::Operation;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq)]
    enum Applied {
        MarkDeleted(u64),
        Restore(u64, u64),
        ClearDeleted(u64),
    }

    #[derive(Default)]
    struct MockTarget {
        applied: Vec<Applied>,
        fail_ids: Vec<u64>,
    }

    impl MockTarget {
        fn check(&mut self, record_id: u64) -> Result<(), String> {
            if self.fail_ids.contains(&record_id) {
                Err(format!("record {record_id} unreachable"))
            } else {
                Ok(())
            }
        }
    }

    impl CompensationTarget for MockTarget {
        fn mark_deleted(&mut self, record_id: u64, _index: u32) -> Result<(), String> {
            self.check(record_id)?;
            self.applied.push(Applied::MarkDeleted(record_id));
            Ok(())
        }

        fn restore_pre_image(
            &mut self,
            record_id: u64,
            _index: u32,
            pre: &PreImage,
        ) -> Result<(), String> {
            self.check(record_id)?;
            self.applied.push(Applied::Restore(record_id, pre.content_offset));
            Ok(())
        }

        fn clear_deleted(&mut self, record_id: u64, _index: u32) -> Result<(), String> {
            self.check(record_id)?;
            self.applied.push(Applied::ClearDeleted(record_id));
            Ok(())
        }
    }

    fn op(kind: OperationKind, record_id: u64, content_offset: u64) -> Operation {
        Operation {
            kind,
            record_id,
            record_index: record_id as u32,
            pre: PreImage {
                content_offset,
                content_length: 10,
                flags: 0,
                modified_micros: 1,
                revision: 1,
            },
        }
    }

    #[test]
    fn test_clean_log_reports_nothing() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let txid = log.begin().unwrap();
        log.log_operation(txid, op(OperationKind::Insert, 1, 0)).unwrap();
        log.commit(txid).unwrap();

        let mut target = MockTarget::default();
        let stats = recover(&mut log, &mut target).unwrap();
        assert!(stats.is_clean());
        assert!(target.applied.is_empty());
    }

    #[test]
    fn test_pending_transaction_compensated_in_reverse() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let txid = log.begin().unwrap();
        log.log_operation(txid, op(OperationKind::Insert, 1, 0)).unwrap();
        log.log_operation(txid, op(OperationKind::UpdateContent, 1, 4096)).unwrap();
        log.log_operation(txid, op(OperationKind::SoftDelete, 2, 0)).unwrap();
        // No terminal frame: crashed mid-transaction.
        drop(log);

        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let mut target = MockTarget::default();
        let stats = recover(&mut log, &mut target).unwrap();

        assert_eq!(stats.transactions_rolled_back, 1);
        assert_eq!(stats.operations_compensated, 3);
        assert_eq!(stats.compensation_failures, 0);
        assert_eq!(
            target.applied,
            vec![
                Applied::ClearDeleted(2),
                Applied::Restore(1, 4096),
                Applied::MarkDeleted(1),
            ]
        );

        // The forced rollback settles the log for the next pass.
        assert!(log.pending_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_failed_compensation_still_rolls_back() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let txid = log.begin().unwrap();
        log.log_operation(txid, op(OperationKind::Insert, 7, 0)).unwrap();
        log.log_operation(txid, op(OperationKind::SoftDelete, 8, 0)).unwrap();
        drop(log);

        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let mut target = MockTarget {
            fail_ids: vec![7],
            ..MockTarget::default()
        };
        let stats = recover(&mut log, &mut target).unwrap();

        assert_eq!(stats.transactions_rolled_back, 1);
        assert_eq!(stats.operations_compensated, 1);
        assert_eq!(stats.compensation_failures, 1);
        assert_eq!(target.applied, vec![Applied::ClearDeleted(8)]);
        assert!(log.pending_transactions().unwrap().is_empty());
    }

    #[test]
    fn test_multiple_pending_transactions() {
        let dir = TempDir::new().unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let a = log.begin().unwrap();
        log.log_operation(a, op(OperationKind::Insert, 1, 0)).unwrap();
        let b = log.begin().unwrap();
        log.log_operation(b, op(OperationKind::Insert, 2, 0)).unwrap();
        drop(log);

        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
        let mut target = MockTarget::default();
        let stats = recover(&mut log, &mut target).unwrap();

        assert_eq!(stats.transactions_rolled_back, 2);
        assert_eq!(
            target.applied,
            vec![Applied::MarkDeleted(1), Applied::MarkDeleted(2)]
        );
    }
}
