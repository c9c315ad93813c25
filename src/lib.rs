//! promptstore - an embedded memory-mapped storage and search engine
//!
//! The engine is a durable record store with crash recovery, content
//! deduplication and full-text search, built directly on memory-mapped
//! files rather than a database library.
//!
//! Composition, leaf first:
//!
//! - [`mapped`]: page-aligned, growable memory-mapped files of
//!   fixed-stride binary records
//! - [`content`]: append-only, checksummed, optionally compressed blob
//!   store with chunked streaming reads
//! - [`strings`]: content-addressed string interner with hash-based
//!   dedup and reference counting
//! - [`search`]: inverted index plus trigram fuzzy index, scored with
//!   TF-IDF
//! - [`txlog`]: write-ahead log of transaction boundaries and
//!   operations with pre-images
//! - [`recovery`]: startup compensation of transactions that never
//!   reached a terminal state
//! - [`access`]: per-record cooperative read/write lock coordinator
//! - [`store`]: the orchestrating facade the application talks to

pub mod access;
pub mod config;
pub mod content;
pub mod mapped;
pub mod observability;
pub mod recovery;
pub mod search;
pub mod store;
pub mod strings;
pub mod txlog;

pub use config::StoreConfig;
pub use store::{
    PromptDocument, RecordFields, SearchHit, Store, StoreError, StoreResult, StoreStats,
};
