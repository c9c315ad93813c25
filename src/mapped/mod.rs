//! Memory-mapped record files.
//!
//! A [`RecordFile`] is a page-aligned, growable memory-mapped file of
//! fixed-stride binary records, addressed by integer index. It is the
//! primitive everything else in the engine is built on.
//!
//! # Design Principles
//!
//! - Records are encoded/decoded through an explicit fixed-width codec
//!   ([`FixedRecord`]); in-memory struct layout never touches the file
//! - The file grows in page multiples and never shrinks
//! - Growth remaps the file and invalidates all outstanding views, so
//!   callers must treat it as an exclusive, file-wide operation
//! - Indexes are never reused once assigned

mod errors;
mod record_file;

pub use errors::{MappedError, MappedErrorCode, MappedResult, Severity};
pub use record_file::{FixedRecord, RecordFile, PAGE_SIZE};

pub(crate) use record_file::page_align;
