//! Full-text search.
//!
//! Two sibling structures serve a query:
//!
//! - an inverted index: fixed 64-byte token records pointing at chains
//!   of variable-length posting entries, persisted via the mapped-file
//!   and content-store primitives
//! - a trigram index: token -> document-set map over all overlapping
//!   3-character windows, kept in memory and rebuilt from live records
//!   on startup (derived state, never the source of truth)
//!
//! Exact token matches are scored with TF-IDF; trigram overlap adds a
//! flat boost so one-character typos still find their document.
//!
//! Queries walk the full posting chain of each token. Earlier designs
//! read only the most recent posting per token, which silently dropped
//! scores for older documents sharing a token; the chain traversal
//! closes that gap.

mod errors;
mod index;
mod postings;
mod tokenizer;

pub use errors::{SearchError, SearchResult};
pub use index::{DocumentTerms, IndexHit, IndexStats, SearchIndex};
pub use postings::{PostingEntry, TokenRecord, NO_POSTING};
pub use tokenizer::{tokenize, trigrams, Token};
