//! Store facade composing the lower components.
//!
//! Every mutating operation runs inside a transaction: begin, acquire
//! the per-id write lock, log the operation with its pre-image, apply
//! the component mutations, commit. If any step fails, the commit
//! fsync included, the applied mutations are compensated and the
//! transaction rolls back, so a failed create leaves no visible record
//! and a failed update leaves the prior content visible.
//!
//! Each component sits behind its own lock, held only for the duration
//! of a single call, so a large write on one record does not stall
//! operations on unrelated ids; the per-id locks in [`AccessManager`]
//! serialize writers touching the same record. The heavy per-document
//! work, compression and tokenization, runs before the component locks
//! are taken. The one multi-lock section is the record append, which
//! reserves its slot and writes the matching log entry under the
//! record lock so the logged index stays accurate with concurrent
//! creates.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::access::AccessManager;
use crate::config::StoreConfig;
use crate::content::{
    CompressionOptions, ContentLocation, ContentOptions, ContentStore, ContentStream,
};
use crate::mapped::RecordFile;
use crate::observability::Logger;
use crate::recovery::{recover, CompensationTarget, RecoveryStats};
use crate::search::{DocumentTerms, IndexStats, SearchIndex};
use crate::strings::{PoolStats, StringId, StringPool};
use crate::txlog::{Operation, OperationKind, PreImage, TransactionLog};

use super::errors::{StoreError, StoreResult};
use super::record::PromptRecord;

const RECORDS_FILE: &str = "records.db";
const CONTENT_FILE: &str = "content.db";
const STRINGS_INDEX_FILE: &str = "strings.idx";
const STRINGS_DATA_FILE: &str = "strings.dat";
const TOKENS_FILE: &str = "tokens.idx";
const POSTINGS_FILE: &str = "postings.db";
const TXLOG_FILE: &str = "tx.log";

/// Caller-supplied fields for a new record.
#[derive(Debug, Clone)]
pub struct RecordFields {
    pub title: String,
    pub content: Vec<u8>,
    pub category: u16,
}

/// A record read back with its content.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptDocument {
    pub id: u64,
    pub title: String,
    pub content: Vec<u8>,
    pub category: u16,
    pub created_micros: i64,
    pub modified_micros: i64,
    pub revision: u32,
}

/// One search result with its resolved title.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: u64,
    pub title: String,
    pub score: f64,
}

/// Aggregate counters across all components.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Records ever created, deleted ones included.
    pub total_records: u64,
    pub live_records: u64,
    /// Bytes written to the content file.
    pub content_bytes: u64,
    /// Content blocks superseded this session by updates and deletes,
    /// reclaimable by an offline compactor.
    pub superseded_blocks: u64,
    pub strings: PoolStats,
    pub index: IndexStats,
}

/// State of a fully applied create, kept until its commit is durable so
/// a failed commit can be compensated.
struct AppliedCreate {
    record_index: u64,
    record: PromptRecord,
    title_id: StringId,
    terms: DocumentTerms,
}

/// State of a fully applied content update, kept until its commit is
/// durable.
struct AppliedUpdate {
    record_index: u64,
    prior: PromptRecord,
    old_terms: DocumentTerms,
    new_terms: DocumentTerms,
}

/// State of a fully applied soft delete, kept until its commit is
/// durable.
struct AppliedDelete {
    record_index: u64,
    prior: PromptRecord,
    terms: DocumentTerms,
}

/// Embedded prompt store.
pub struct Store {
    access: AccessManager,
    next_id: AtomicU64,
    records: RwLock<RecordFile<PromptRecord>>,
    content: RwLock<ContentStore>,
    strings: RwLock<StringPool>,
    index: RwLock<SearchIndex>,
    txlog: Mutex<TransactionLog>,
    /// record id -> record file index
    id_map: RwLock<HashMap<u64, u64>>,
    superseded_blocks: AtomicU64,
}

impl Store {
    /// Open (or create) a store in `dir`: open every component, run
    /// crash recovery over the transaction log, then rebuild the id
    /// map and the derived search state from live records.
    pub fn open(dir: &Path, config: &StoreConfig) -> StoreResult<Self> {
        fs::create_dir_all(dir)?;

        let mut txlog = TransactionLog::open(&dir.join(TXLOG_FILE))?;
        let mut records: RecordFile<PromptRecord> =
            RecordFile::open(&dir.join(RECORDS_FILE), config.initial_record_capacity)?;
        let content = ContentStore::open(
            &dir.join(CONTENT_FILE),
            ContentOptions {
                initial_bytes: config.initial_content_bytes,
                chunk_bytes: config.stream_chunk_bytes,
                compression: if config.compression_enabled {
                    Some(CompressionOptions {
                        threshold_bytes: config.compression_threshold_bytes,
                        level: config.compression_level,
                    })
                } else {
                    None
                },
            },
        )?;
        let strings =
            StringPool::open(&dir.join(STRINGS_INDEX_FILE), &dir.join(STRINGS_DATA_FILE))?;
        let (mut index, index_rebuilt) = open_index(dir)?;

        let recovery_stats = {
            let mut target = RecordCompensator {
                records: &mut records,
            };
            recover(&mut txlog, &mut target)?
        };
        log_open(&recovery_stats, records.len());

        // Rebuild lookup and derived search state from the record file.
        let mut id_map = HashMap::new();
        let mut max_id = 0u64;
        for record_index in 0..records.len() {
            let record = records.get(record_index)?;
            max_id = max_id.max(record.id);
            id_map.insert(record.id, record_index);
            if record.is_deleted() {
                continue;
            }
            let title = strings.resolve(StringId(record.title_id))?;
            match content.read_at(record.content_offset) {
                Ok((bytes, _)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    if index_rebuilt {
                        index.index_document(record.id, record_index as u32, &title, &text)?;
                    } else {
                        index.restore_document(record.id, &title, &text);
                    }
                }
                Err(err) => {
                    // The record stays addressable; its reads will
                    // surface the corruption to the caller.
                    Logger::error(
                        "startup_content_unreadable",
                        &[
                            ("record_id", &record.id.to_string()),
                            ("error", &err.to_string()),
                        ],
                    );
                }
            }
        }

        Ok(Self {
            access: AccessManager::new(),
            next_id: AtomicU64::new(max_id + 1),
            records: RwLock::new(records),
            content: RwLock::new(content),
            strings: RwLock::new(strings),
            index: RwLock::new(index),
            txlog: Mutex::new(txlog),
            id_map: RwLock::new(id_map),
            superseded_blocks: AtomicU64::new(0),
        })
    }

    /// Create a new record, returning its id.
    pub fn create(&self, fields: RecordFields) -> StoreResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let _guard = self.access.write(id);
        self.create_record(id, &fields)
            .map_err(|e| with_op(e, "create", id))?;
        Ok(id)
    }

    /// Replace a record's content with `bytes`.
    pub fn update_content(&self, id: u64, bytes: &[u8]) -> StoreResult<()> {
        let _guard = self.access.write(id);
        self.update_record_content(id, bytes)
            .map_err(|e| with_op(e, "update_content", id))
    }

    /// Read a record and its content.
    pub fn get(&self, id: u64) -> StoreResult<PromptDocument> {
        let _guard = self.access.read(id);
        self.get_document(id).map_err(|e| with_op(e, "get", id))
    }

    /// Stream a record's content in chunks. The returned stream owns
    /// its bytes, so dropping it mid-iteration needs no cleanup.
    pub fn stream_content(&self, id: u64) -> StoreResult<ContentStream> {
        let _guard = self.access.read(id);
        let (_, record) = self.live_record(id)?;
        let stream = self.content.read().stream(ContentLocation {
            offset: record.content_offset,
            length: record.content_length,
        })?;
        Ok(stream)
    }

    /// Search titles and content, returning up to `limit` hits in
    /// descending relevance order.
    pub fn search(&self, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        let hits = self.index.read().search(query, limit)?;
        let id_map = self.id_map.read();
        let records = self.records.read();
        let strings = self.strings.read();
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(&record_index) = id_map.get(&hit.doc_id) else {
                continue;
            };
            let record = records.get(record_index)?;
            if record.is_deleted() {
                continue;
            }
            out.push(SearchHit {
                id: hit.doc_id,
                title: strings.resolve(StringId(record.title_id))?,
                score: hit.score,
            });
        }
        Ok(out)
    }

    /// Flag a record deleted. Its index entry and content block stay
    /// on disk for a future compactor.
    pub fn soft_delete(&self, id: u64) -> StoreResult<()> {
        let _guard = self.access.write(id);
        self.soft_delete_record(id)
            .map_err(|e| with_op(e, "soft_delete", id))
    }

    pub fn stats(&self) -> StoreStats {
        let index = self.index.read().stats();
        StoreStats {
            total_records: self.records.read().len(),
            live_records: index.live_documents,
            content_bytes: self.content.read().write_offset(),
            superseded_blocks: self.superseded_blocks.load(Ordering::Relaxed),
            strings: self.strings.read().stats(),
            index,
        }
    }

    /// Synchronously flush every component to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.records.read().flush()?;
        self.content.read().flush()?;
        self.strings.read().flush()?;
        self.index.read().flush()?;
        Ok(())
    }

    fn record_index(&self, id: u64) -> StoreResult<u64> {
        self.id_map
            .read()
            .get(&id)
            .copied()
            .ok_or(StoreError::NotFound(id))
    }

    fn live_record(&self, id: u64) -> StoreResult<(u64, PromptRecord)> {
        let record_index = self.record_index(id)?;
        let record = self.records.read().get(record_index)?;
        if record.is_deleted() {
            return Err(StoreError::NotFound(id));
        }
        Ok((record_index, record))
    }

    fn get_document(&self, id: u64) -> StoreResult<PromptDocument> {
        let (_, record) = self.live_record(id)?;
        let title = self.strings.read().resolve(StringId(record.title_id))?;
        let (content, _) = self.content.read().read_at(record.content_offset)?;
        Ok(PromptDocument {
            id,
            title,
            content,
            category: record.category,
            created_micros: record.created_micros,
            modified_micros: record.modified_micros,
            revision: record.revision,
        })
    }

    fn create_record(&self, id: u64, fields: &RecordFields) -> StoreResult<()> {
        let txid = self.txlog.lock().begin()?;
        let applied = match self.apply_create(txid, id, fields) {
            Ok(applied) => applied,
            Err(err) => return self.fail_transaction(txid, err),
        };
        // Bind before matching: the lock guard must drop before the
        // rollback inside fail_transaction re-locks the log.
        let committed = self.txlog.lock().commit(txid);
        if let Err(err) = committed {
            self.undo_create(&applied);
            return self.fail_transaction(txid, err.into());
        }
        self.id_map.write().insert(id, applied.record_index);
        Ok(())
    }

    fn apply_create(
        &self,
        txid: u64,
        id: u64,
        fields: &RecordFields,
    ) -> StoreResult<AppliedCreate> {
        let title_id = self.strings.write().intern(&fields.title)?;

        // Compress without the content store borrowed, then take the
        // write lock only for the append.
        let codec = self.content.read().codec();
        let location = codec.encode(&fields.content).and_then(|(stored, encoding)| {
            self.content.write().append_encoded(&stored, encoding)
        });
        let location = match location {
            Ok(location) => location,
            Err(err) => {
                self.release_title(title_id);
                return Err(err.into());
            }
        };

        let now = Utc::now().timestamp_micros();
        let record = PromptRecord {
            id,
            content_offset: location.offset,
            content_length: location.length,
            title_id: title_id.0,
            category: fields.category,
            flags: 0,
            created_micros: now,
            modified_micros: now,
            revision: 1,
        };

        // Reserve the slot and write its log entry under the record
        // lock, so the logged index matches the append even with
        // concurrent creates.
        let record_index = {
            let mut records = self.records.write();
            let record_index = records.len();
            let logged = self.txlog.lock().log_operation(
                txid,
                Operation {
                    kind: OperationKind::Insert,
                    record_id: id,
                    record_index: record_index as u32,
                    pre: PreImage::default(),
                },
            );
            let appended = match logged {
                Ok(()) => records.append(&record).map_err(StoreError::from),
                Err(err) => Err(err.into()),
            };
            drop(records);
            if let Err(err) = appended {
                self.release_title(title_id);
                return Err(err);
            }
            record_index
        };

        // Tokenize outside the index lock; large bodies parse without
        // blocking queries.
        let text = String::from_utf8_lossy(&fields.content);
        let terms = DocumentTerms::parse(&fields.title, &text);
        if let Err(err) = self
            .index
            .write()
            .index_terms(id, record_index as u32, &terms)
        {
            // The appended record must never surface: flag it deleted.
            self.retire_record(record_index, &record);
            self.release_title(title_id);
            return Err(err.into());
        }

        Ok(AppliedCreate {
            record_index,
            record,
            title_id,
            terms,
        })
    }

    /// Compensate a fully applied create whose commit failed.
    fn undo_create(&self, applied: &AppliedCreate) {
        self.retire_record(applied.record_index, &applied.record);
        if let Err(err) = self
            .index
            .write()
            .remove_terms(applied.record.id, &applied.terms)
        {
            log_compensation_failure("create", applied.record.id, &err.to_string());
        }
        self.release_title(applied.title_id);
    }

    fn update_record_content(&self, id: u64, bytes: &[u8]) -> StoreResult<()> {
        let (record_index, prior) = self.live_record(id)?;

        let txid = self.txlog.lock().begin()?;
        let applied = match self.apply_update(txid, record_index, &prior, bytes) {
            Ok(applied) => applied,
            Err(err) => return self.fail_transaction(txid, err),
        };
        let committed = self.txlog.lock().commit(txid);
        if let Err(err) = committed {
            self.undo_update(&applied);
            return self.fail_transaction(txid, err.into());
        }
        self.superseded_blocks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn apply_update(
        &self,
        txid: u64,
        record_index: u64,
        prior: &PromptRecord,
        bytes: &[u8],
    ) -> StoreResult<AppliedUpdate> {
        self.txlog.lock().log_operation(
            txid,
            Operation {
                kind: OperationKind::UpdateContent,
                record_id: prior.id,
                record_index: record_index as u32,
                pre: pre_image(prior),
            },
        )?;

        let title = self.strings.read().resolve(StringId(prior.title_id))?;
        let (old_bytes, _) = self.content.read().read_at(prior.content_offset)?;

        // Compress without the content store borrowed, then take the
        // write lock only for the append.
        let codec = self.content.read().codec();
        let (stored, encoding) = codec.encode(bytes)?;
        let location = self.content.write().append_encoded(&stored, encoding)?;

        let mut updated = *prior;
        updated.content_offset = location.offset;
        updated.content_length = location.length;
        updated.modified_micros = Utc::now().timestamp_micros();
        updated.revision += 1;
        self.records.write().put(record_index, &updated)?;

        // Tokenize outside the index lock; large bodies parse without
        // blocking queries.
        let old_terms = DocumentTerms::parse(&title, &String::from_utf8_lossy(&old_bytes));
        let new_terms = DocumentTerms::parse(&title, &String::from_utf8_lossy(bytes));
        {
            let mut index = self.index.write();
            if let Err(err) = index.remove_terms(prior.id, &old_terms) {
                drop(index);
                // The removal undid itself; just repoint at the old
                // block.
                self.restore_record(record_index, prior, "update_content");
                return Err(err.into());
            }
            if let Err(err) = index.index_terms(prior.id, record_index as u32, &new_terms) {
                // Put the old document back into query visibility and
                // repoint at the old block.
                if let Err(reinstate_err) = index.reinstate_terms(prior.id, &old_terms) {
                    log_compensation_failure(
                        "update_content",
                        prior.id,
                        &reinstate_err.to_string(),
                    );
                }
                drop(index);
                self.restore_record(record_index, prior, "update_content");
                return Err(err.into());
            }
        }

        Ok(AppliedUpdate {
            record_index,
            prior: *prior,
            old_terms,
            new_terms,
        })
    }

    /// Compensate a fully applied update whose commit failed.
    fn undo_update(&self, applied: &AppliedUpdate) {
        self.restore_record(applied.record_index, &applied.prior, "update_content");
        let mut index = self.index.write();
        let undone = index
            .remove_terms(applied.prior.id, &applied.new_terms)
            .and_then(|()| index.reinstate_terms(applied.prior.id, &applied.old_terms));
        if let Err(err) = undone {
            log_compensation_failure("update_content", applied.prior.id, &err.to_string());
        }
    }

    fn soft_delete_record(&self, id: u64) -> StoreResult<()> {
        let (record_index, prior) = self.live_record(id)?;

        let txid = self.txlog.lock().begin()?;
        let applied = match self.apply_soft_delete(txid, record_index, &prior) {
            Ok(applied) => applied,
            Err(err) => return self.fail_transaction(txid, err),
        };
        let committed = self.txlog.lock().commit(txid);
        if let Err(err) = committed {
            self.undo_soft_delete(&applied);
            return self.fail_transaction(txid, err.into());
        }
        self.superseded_blocks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn apply_soft_delete(
        &self,
        txid: u64,
        record_index: u64,
        prior: &PromptRecord,
    ) -> StoreResult<AppliedDelete> {
        self.txlog.lock().log_operation(
            txid,
            Operation {
                kind: OperationKind::SoftDelete,
                record_id: prior.id,
                record_index: record_index as u32,
                pre: pre_image(prior),
            },
        )?;

        let title = self.strings.read().resolve(StringId(prior.title_id))?;
        let (old_bytes, _) = self.content.read().read_at(prior.content_offset)?;

        let mut updated = *prior;
        updated.set_deleted(true);
        updated.modified_micros = Utc::now().timestamp_micros();
        self.records.write().put(record_index, &updated)?;

        let terms = DocumentTerms::parse(&title, &String::from_utf8_lossy(&old_bytes));
        if let Err(err) = self.index.write().remove_terms(prior.id, &terms) {
            self.restore_record(record_index, prior, "soft_delete");
            return Err(err.into());
        }

        Ok(AppliedDelete {
            record_index,
            prior: *prior,
            terms,
        })
    }

    /// Compensate a fully applied soft delete whose commit failed.
    fn undo_soft_delete(&self, applied: &AppliedDelete) {
        self.restore_record(applied.record_index, &applied.prior, "soft_delete");
        if let Err(err) = self
            .index
            .write()
            .reinstate_terms(applied.prior.id, &applied.terms)
        {
            log_compensation_failure("soft_delete", applied.prior.id, &err.to_string());
        }
    }

    /// Flag a freshly appended record deleted so it never surfaces.
    fn retire_record(&self, record_index: u64, record: &PromptRecord) {
        let mut undone = *record;
        undone.set_deleted(true);
        if let Err(err) = self.records.write().put(record_index, &undone) {
            log_compensation_failure("create", record.id, &err.to_string());
        }
    }

    /// Put a record back to its pre-mutation state.
    fn restore_record(&self, record_index: u64, prior: &PromptRecord, op: &'static str) {
        if let Err(err) = self.records.write().put(record_index, prior) {
            log_compensation_failure(op, prior.id, &err.to_string());
        }
    }

    fn release_title(&self, title_id: StringId) {
        let _ = self.strings.write().release(title_id);
    }

    /// Roll back `txid` and propagate the original failure. A rollback
    /// that itself fails is logged; the caller still sees the original
    /// error and recovery will settle the transaction on next open.
    fn fail_transaction(&self, txid: u64, err: StoreError) -> StoreResult<()> {
        if let Err(rollback_err) = self.txlog.lock().rollback(txid) {
            Logger::error(
                "rollback_failed",
                &[
                    ("txid", &txid.to_string()),
                    ("error", &rollback_err.to_string()),
                ],
            );
        }
        Err(err)
    }
}

fn pre_image(record: &PromptRecord) -> PreImage {
    PreImage {
        content_offset: record.content_offset,
        content_length: record.content_length,
        flags: record.flags,
        modified_micros: record.modified_micros,
        revision: record.revision,
    }
}

fn with_op(err: StoreError, op: &'static str, id: u64) -> StoreError {
    match err {
        StoreError::NotFound(_) => err,
        other => other.in_op(op, id),
    }
}

fn log_compensation_failure(op: &'static str, id: u64, reason: &str) {
    Logger::error(
        "compensation_failed",
        &[
            ("op", op),
            ("record_id", &id.to_string()),
            ("reason", reason),
        ],
    );
}

fn log_open(recovery: &RecoveryStats, record_count: u64) {
    Logger::info(
        "store_opened",
        &[
            ("records", &record_count.to_string()),
            (
                "recovered_transactions",
                &recovery.transactions_rolled_back.to_string(),
            ),
        ],
    );
}

/// Open the search index, rebuilding from scratch if its files are
/// unreadable. The caller reindexes live records when `true` is
/// returned.
fn open_index(dir: &Path) -> StoreResult<(SearchIndex, bool)> {
    let tokens = dir.join(TOKENS_FILE);
    let postings = dir.join(POSTINGS_FILE);
    match SearchIndex::open(&tokens, &postings) {
        Ok(index) => Ok((index, false)),
        Err(err) => {
            Logger::warn("search_index_rebuild", &[("reason", &err.to_string())]);
            let _ = fs::remove_file(&tokens);
            let _ = fs::remove_file(&postings);
            Ok((SearchIndex::open(&tokens, &postings)?, true))
        }
    }
}

/// Applies recovery compensations to the record file.
struct RecordCompensator<'a> {
    records: &'a mut RecordFile<PromptRecord>,
}

impl RecordCompensator<'_> {
    /// `None` when the logged operation never reached the record file,
    /// in which case there is nothing to undo.
    fn fetch(&self, record_id: u64, index: u32) -> Result<Option<PromptRecord>, String> {
        if u64::from(index) >= self.records.len() {
            return Ok(None);
        }
        let record = self
            .records
            .get(u64::from(index))
            .map_err(|e| e.to_string())?;
        if record.id != record_id {
            return Err(format!(
                "record id mismatch at index {index}: found {}, logged {record_id}",
                record.id
            ));
        }
        Ok(Some(record))
    }

    fn put(&mut self, index: u32, record: &PromptRecord) -> Result<(), String> {
        self.records
            .put(u64::from(index), record)
            .map_err(|e| e.to_string())
    }
}

impl CompensationTarget for RecordCompensator<'_> {
    fn mark_deleted(&mut self, record_id: u64, index: u32) -> Result<(), String> {
        let Some(mut record) = self.fetch(record_id, index)? else {
            return Ok(());
        };
        record.set_deleted(true);
        self.put(index, &record)
    }

    fn restore_pre_image(
        &mut self,
        record_id: u64,
        index: u32,
        pre: &PreImage,
    ) -> Result<(), String> {
        let Some(mut record) = self.fetch(record_id, index)? else {
            return Ok(());
        };
        record.content_offset = pre.content_offset;
        record.content_length = pre.content_length;
        record.flags = pre.flags;
        record.modified_micros = pre.modified_micros;
        record.revision = pre.revision;
        self.put(index, &record)
    }

    fn clear_deleted(&mut self, record_id: u64, index: u32) -> Result<(), String> {
        let Some(mut record) = self.fetch(record_id, index)? else {
            return Ok(());
        };
        record.set_deleted(false);
        self.put(index, &record)
    }
}
