//! Crash Recovery Tests
//!
//! A transaction that logged operations but never reached a terminal
//! frame is pending. On the next open it must be compensated: an
//! insert disappears, an update is restored to its prior content, and
//! the transaction is forced to rollback so a second open finds a
//! settled log.

use std::path::Path;

use promptstore::config::StoreConfig;
use promptstore::content::{ContentOptions, ContentStore};
use promptstore::mapped::RecordFile;
use promptstore::store::{PromptRecord, RecordFields, Store, StoreError};
use promptstore::txlog::{Operation, OperationKind, PreImage, TransactionLog};
use tempfile::TempDir;

fn fields(title: &str, content: &str) -> RecordFields {
    RecordFields {
        title: title.to_string(),
        content: content.as_bytes().to_vec(),
        category: 0,
    }
}

fn open_store(dir: &Path) -> Store {
    Store::open(dir, &StoreConfig::default()).unwrap()
}

#[test]
fn test_pending_transaction_detected_after_unclean_shutdown() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("wal.log");
    {
        let mut log = TransactionLog::open(&log_path).unwrap();
        let committed = log.begin().unwrap();
        log.commit(committed).unwrap();
        let abandoned = log.begin().unwrap();
        log.log_operation(
            abandoned,
            Operation {
                kind: OperationKind::Insert,
                record_id: 7,
                record_index: 0,
                pre: PreImage::default(),
            },
        )
        .unwrap();
        // Dropped with no terminal frame.
    }

    let log = TransactionLog::open(&log_path).unwrap();
    let pending = log.pending_transactions().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].operations.len(), 1);
    assert_eq!(pending[0].operations[0].record_id, 7);
}

#[test]
fn test_uncommitted_insert_is_absent_after_recovery() {
    let dir = TempDir::new().unwrap();
    let committed_id = {
        let store = open_store(dir.path());
        let id = store.create(fields("Kept", "committed before the crash")).unwrap();
        store.flush().unwrap();
        id
    };

    // Replay the write path of a create by hand, stopping short of the
    // commit frame: the record lands in the record file but the
    // transaction never terminates.
    let ghost_id = committed_id + 1;
    {
        let mut records: RecordFile<PromptRecord> =
            RecordFile::open(&dir.path().join("records.db"), 16).unwrap();
        let mut content =
            ContentStore::open(&dir.path().join("content.db"), ContentOptions::default()).unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();

        let txid = log.begin().unwrap();
        let record_index = records.len();
        log.log_operation(
            txid,
            Operation {
                kind: OperationKind::Insert,
                record_id: ghost_id,
                record_index: record_index as u32,
                pre: PreImage::default(),
            },
        )
        .unwrap();

        let location = content.append(b"never committed").unwrap();
        let existing = records.get(0).unwrap();
        records
            .append(&PromptRecord {
                id: ghost_id,
                content_offset: location.offset,
                content_length: location.length,
                title_id: existing.title_id,
                category: 0,
                flags: 0,
                created_micros: existing.created_micros,
                modified_micros: existing.modified_micros,
                revision: 1,
            })
            .unwrap();
        records.flush().unwrap();
        content.flush().unwrap();
    }

    let store = open_store(dir.path());
    assert!(store.get(committed_id).is_ok());
    assert!(matches!(store.get(ghost_id), Err(StoreError::NotFound(_))));

    // The forced rollback settles the log.
    let log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();
    assert!(log.pending_transactions().unwrap().is_empty());
}

#[test]
fn test_uncommitted_update_restores_prior_content() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = open_store(dir.path());
        let id = store.create(fields("Doc", "original content")).unwrap();
        store.flush().unwrap();
        id
    };

    // Replay the write path of an update by hand: new block appended,
    // record repointed, no commit.
    {
        let mut records: RecordFile<PromptRecord> =
            RecordFile::open(&dir.path().join("records.db"), 16).unwrap();
        let mut content =
            ContentStore::open(&dir.path().join("content.db"), ContentOptions::default()).unwrap();
        let mut log = TransactionLog::open(&dir.path().join("tx.log")).unwrap();

        let old = records.get(0).unwrap();
        assert_eq!(old.id, id);

        let txid = log.begin().unwrap();
        log.log_operation(
            txid,
            Operation {
                kind: OperationKind::UpdateContent,
                record_id: id,
                record_index: 0,
                pre: PreImage {
                    content_offset: old.content_offset,
                    content_length: old.content_length,
                    flags: old.flags,
                    modified_micros: old.modified_micros,
                    revision: old.revision,
                },
            },
        )
        .unwrap();

        let location = content.append(b"half-written replacement").unwrap();
        let mut updated = old;
        updated.content_offset = location.offset;
        updated.content_length = location.length;
        updated.revision += 1;
        records.put(0, &updated).unwrap();
        records.flush().unwrap();
        content.flush().unwrap();
    }

    let store = open_store(dir.path());
    let doc = store.get(id).unwrap();
    assert_eq!(doc.content, b"original content");
    assert_eq!(doc.revision, 1);
}

#[test]
fn test_torn_log_tail_is_tolerated() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = open_store(dir.path());
        let id = store.create(fields("Stable", "content before the torn tail")).unwrap();
        store.flush().unwrap();
        id
    };

    // Garbage after the last complete frame, as left by a crash
    // mid-append.
    {
        use std::fs::OpenOptions;
        use std::io::Write;
        let mut file = OpenOptions::new()
            .append(true)
            .open(dir.path().join("tx.log"))
            .unwrap();
        file.write_all(&[0xDE, 0xAD, 0xBE]).unwrap();
    }

    let store = open_store(dir.path());
    assert_eq!(store.get(id).unwrap().content, b"content before the torn tail");
}
