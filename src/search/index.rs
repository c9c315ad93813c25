//! Inverted index plus trigram fuzzy index.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use xxhash_rust::xxh3::xxh3_64;

use crate::content::{ContentOptions, ContentStore};
use crate::mapped::RecordFile;
use crate::observability::Logger;

use super::errors::{SearchError, SearchResult};
use super::postings::{PostingEntry, TokenRecord, NO_POSTING};
use super::tokenizer::{tokenize, trigrams};

/// Flat score added per matching query trigram.
const TRIGRAM_BOOST: f64 = 0.1;

/// Tokenized view of one document, parsed up front so large bodies can
/// be processed without the index borrowed.
#[derive(Debug, Clone)]
pub struct DocumentTerms {
    /// token -> positions, in deterministic order.
    occurrences: BTreeMap<String, Vec<u32>>,
    /// Distinct trigrams across title and content.
    grams: HashSet<String>,
}

impl DocumentTerms {
    pub fn parse(title: &str, content: &str) -> Self {
        let text = format!("{} {}", title, content);
        let mut occurrences: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for token in tokenize(&text) {
            occurrences.entry(token.text).or_default().push(token.position);
        }
        Self {
            occurrences,
            grams: trigrams(&text),
        }
    }
}

/// Token-record states captured before a batch of aggregate mutations,
/// so a mid-batch failure can put the persistent counters back.
struct TokenUndo {
    /// Token file length at capture time; records appended after this
    /// point belong to the failed batch.
    token_len: u64,
    saved: Vec<(u32, TokenRecord)>,
}

/// One scored document.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub doc_id: u64,
    pub score: f64,
}

/// Index bookkeeping counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    /// Distinct tokens with a token record.
    pub token_count: u64,
    /// Documents currently visible to queries.
    pub live_documents: u64,
    /// Bytes consumed by the postings file.
    pub postings_bytes: u64,
}

/// Inverted index over document titles and content.
///
/// Token records and posting chains are persistent; the trigram map and
/// live-document set are derived state the store rebuilds from live
/// records on startup, the same way a table index is rebuilt from its
/// table.
pub struct SearchIndex {
    tokens: RecordFile<TokenRecord>,
    postings: ContentStore,
    /// token hash -> token record index.
    by_hash: HashMap<u64, u32>,
    /// trigram -> documents containing it (live documents only).
    trigram_docs: HashMap<String, HashSet<u64>>,
    /// Documents visible to queries.
    live_docs: HashSet<u64>,
}

impl SearchIndex {
    /// Open or create the index from its token and postings file paths.
    pub fn open(tokens_path: &Path, postings_path: &Path) -> SearchResult<Self> {
        let tokens: RecordFile<TokenRecord> = RecordFile::open(tokens_path, 256)?;
        let postings = ContentStore::open(
            postings_path,
            ContentOptions {
                // Postings are small structured records; compressing
                // them individually would not pay for itself.
                compression: None,
                ..ContentOptions::default()
            },
        )?;

        let mut by_hash = HashMap::new();
        for index in 0..tokens.len() {
            let record = tokens.get(index)?;
            by_hash.insert(record.hash, index as u32);
        }

        Ok(Self {
            tokens,
            postings,
            by_hash,
            trigram_docs: HashMap::new(),
            live_docs: HashSet::new(),
        })
    }

    /// Index a document's title and content.
    pub fn index_document(
        &mut self,
        doc_id: u64,
        record_index: u32,
        title: &str,
        content: &str,
    ) -> SearchResult<()> {
        self.index_terms(doc_id, record_index, &DocumentTerms::parse(title, content))
    }

    /// Index a pre-parsed document.
    ///
    /// Re-indexing the same `doc_id` (after a content update) appends
    /// fresh postings; stale ones remain in the chain and are
    /// deduplicated at query time, newest first.
    pub fn index_terms(
        &mut self,
        doc_id: u64,
        record_index: u32,
        terms: &DocumentTerms,
    ) -> SearchResult<()> {
        // A failure halfway through the token loop must not leave
        // partially bumped aggregates behind.
        let undo = self.snapshot_tokens(terms.occurrences.keys().map(String::as_str))?;
        if let Err(err) = self.write_postings(doc_id, record_index, &terms.occurrences) {
            self.restore_tokens(&undo);
            return Err(err);
        }

        for gram in &terms.grams {
            self.trigram_docs
                .entry(gram.clone())
                .or_default()
                .insert(doc_id);
        }
        self.live_docs.insert(doc_id);
        Ok(())
    }

    fn write_postings(
        &mut self,
        doc_id: u64,
        record_index: u32,
        occurrences: &BTreeMap<String, Vec<u32>>,
    ) -> SearchResult<()> {
        for (token, positions) in occurrences {
            let hash = xxh3_64(token.as_bytes());
            let token_index = match self.by_hash.get(&hash) {
                Some(&index) => index,
                None => {
                    let record = TokenRecord::new(hash, token.len() as u16);
                    let index = self.tokens.append(&record)? as u32;
                    self.by_hash.insert(hash, index);
                    index
                }
            };

            let mut record = self.tokens.get(token_index as u64)?;
            let posting = PostingEntry {
                doc_id,
                record_index,
                term_frequency: positions.len() as u32,
                prev_posting: record.last_posting,
                positions: positions.clone(),
            };
            let location = self.postings.append(&posting.serialize())?;

            if record.first_posting == NO_POSTING {
                record.first_posting = location.offset;
            }
            record.last_posting = location.offset;
            record.doc_freq += 1;
            record.total_term_freq += posting.term_frequency as u64;
            self.tokens.put(token_index as u64, &record)?;
        }
        Ok(())
    }

    fn snapshot_tokens<'a>(
        &self,
        tokens: impl Iterator<Item = &'a str>,
    ) -> SearchResult<TokenUndo> {
        let mut saved = Vec::new();
        for token in tokens {
            let hash = xxh3_64(token.as_bytes());
            if let Some(&index) = self.by_hash.get(&hash) {
                saved.push((index, self.tokens.get(index as u64)?));
            }
        }
        Ok(TokenUndo {
            token_len: self.tokens.len(),
            saved,
        })
    }

    /// Put captured token records back after a failed batch. Records
    /// appended during the batch are reset to empty aggregates; their
    /// slots stay reusable through the hash map. Best effort, failures
    /// are logged.
    fn restore_tokens(&mut self, undo: &TokenUndo) {
        for &(index, ref record) in &undo.saved {
            if let Err(err) = self.tokens.put(index as u64, record) {
                Logger::error(
                    "token_restore_failed",
                    &[
                        ("token_index", &index.to_string()),
                        ("reason", &err.to_string()),
                    ],
                );
            }
        }
        for index in undo.token_len..self.tokens.len() {
            let reset = self
                .tokens
                .get(index)
                .map(|record| TokenRecord::new(record.hash, record.token_len))
                .and_then(|blank| self.tokens.put(index, &blank));
            if let Err(err) = reset {
                Logger::error(
                    "token_restore_failed",
                    &[
                        ("token_index", &index.to_string()),
                        ("reason", &err.to_string()),
                    ],
                );
            }
        }
    }

    /// Remove a document from query visibility.
    pub fn remove_document(
        &mut self,
        doc_id: u64,
        title: &str,
        content: &str,
    ) -> SearchResult<()> {
        self.remove_terms(doc_id, &DocumentTerms::parse(title, content))
    }

    /// Remove a pre-parsed document from query visibility.
    ///
    /// Posting chains are left in place as bookkeeping for a future
    /// compactor; only the aggregates and derived maps change.
    pub fn remove_terms(&mut self, doc_id: u64, terms: &DocumentTerms) -> SearchResult<()> {
        let undo = self.snapshot_tokens(terms.occurrences.keys().map(String::as_str))?;
        for (token, positions) in &terms.occurrences {
            let hash = xxh3_64(token.as_bytes());
            if let Some(&index) = self.by_hash.get(&hash) {
                let adjusted = self.tokens.get(index as u64).and_then(|mut record| {
                    record.doc_freq = record.doc_freq.saturating_sub(1);
                    record.total_term_freq =
                        record.total_term_freq.saturating_sub(positions.len() as u64);
                    self.tokens.put(index as u64, &record)
                });
                if let Err(err) = adjusted {
                    self.restore_tokens(&undo);
                    return Err(err.into());
                }
            }
        }

        for gram in &terms.grams {
            if let Some(docs) = self.trigram_docs.get_mut(gram) {
                docs.remove(&doc_id);
                if docs.is_empty() {
                    self.trigram_docs.remove(gram);
                }
            }
        }
        self.live_docs.remove(&doc_id);
        Ok(())
    }

    /// Re-add a document whose removal is being undone, without
    /// writing new postings.
    pub fn reinstate_document(
        &mut self,
        doc_id: u64,
        title: &str,
        content: &str,
    ) -> SearchResult<()> {
        self.reinstate_terms(doc_id, &DocumentTerms::parse(title, content))
    }

    /// Re-add a pre-parsed document whose removal is being undone. The
    /// document's newest posting chain entries are still in place, so
    /// only the aggregates and derived maps change.
    pub fn reinstate_terms(&mut self, doc_id: u64, terms: &DocumentTerms) -> SearchResult<()> {
        let undo = self.snapshot_tokens(terms.occurrences.keys().map(String::as_str))?;
        for (token, positions) in &terms.occurrences {
            let hash = xxh3_64(token.as_bytes());
            if let Some(&index) = self.by_hash.get(&hash) {
                let adjusted = self.tokens.get(index as u64).and_then(|mut record| {
                    record.doc_freq += 1;
                    record.total_term_freq += positions.len() as u64;
                    self.tokens.put(index as u64, &record)
                });
                if let Err(err) = adjusted {
                    self.restore_tokens(&undo);
                    return Err(err.into());
                }
            }
        }

        self.restore_terms(doc_id, terms);
        Ok(())
    }

    /// Restore the derived (in-memory) state for a live document at
    /// startup without writing new postings.
    pub fn restore_document(&mut self, doc_id: u64, title: &str, content: &str) {
        self.restore_terms(doc_id, &DocumentTerms::parse(title, content));
    }

    /// Restore the derived (in-memory) state for a pre-parsed live
    /// document.
    pub fn restore_terms(&mut self, doc_id: u64, terms: &DocumentTerms) {
        for gram in &terms.grams {
            self.trigram_docs
                .entry(gram.clone())
                .or_default()
                .insert(doc_id);
        }
        self.live_docs.insert(doc_id);
    }

    /// Search for `query`, returning up to `limit` hits sorted by
    /// descending score.
    pub fn search(&self, query: &str, limit: usize) -> SearchResult<Vec<IndexHit>> {
        let total_docs = self.live_docs.len() as f64;
        let mut scores: HashMap<u64, f64> = HashMap::new();

        // Exact token matches, TF-IDF scored over the full posting
        // chain. Chains are walked newest-first; only the newest posting
        // per (token, doc) pair counts, since updates supersede.
        for token in tokenize(query) {
            let hash = xxh3_64(token.text.as_bytes());
            let Some(&token_index) = self.by_hash.get(&hash) else {
                continue;
            };
            let record = self.tokens.get(token_index as u64)?;
            let idf = (total_docs / (record.doc_freq as f64 + 1.0)).ln();

            let mut seen_docs: HashSet<u64> = HashSet::new();
            let mut offset = record.last_posting;
            while offset != NO_POSTING {
                let (bytes, _) = self.postings.read_at(offset)?;
                let posting = PostingEntry::deserialize(&bytes)
                    .map_err(|e| SearchError::malformed_posting(offset, e.to_string()))?;

                if self.live_docs.contains(&posting.doc_id)
                    && seen_docs.insert(posting.doc_id)
                {
                    let tf = posting.term_frequency as f64 / 100.0;
                    *scores.entry(posting.doc_id).or_insert(0.0) += tf * idf.max(0.0);
                }
                offset = posting.prev_posting;
            }
        }

        // Trigram fuzzy boost.
        for gram in trigrams(&query.to_lowercase()) {
            if let Some(docs) = self.trigram_docs.get(&gram) {
                for &doc_id in docs {
                    *scores.entry(doc_id).or_insert(0.0) += TRIGRAM_BOOST;
                }
            }
        }

        // A posting whose term no longer appears anywhere contributes
        // nothing; zero-score entries are noise, not matches.
        let mut hits: Vec<IndexHit> = scores
            .into_iter()
            .filter(|&(_, score)| score > 0.0)
            .map(|(doc_id, score)| IndexHit { doc_id, score })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Current bookkeeping counters.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            token_count: self.tokens.len(),
            live_documents: self.live_docs.len() as u64,
            postings_bytes: self.postings.write_offset(),
        }
    }

    /// Durable flush of both backing files.
    pub fn flush(&self) -> SearchResult<()> {
        self.tokens.flush()?;
        self.postings.flush()?;
        Ok(())
    }
}
