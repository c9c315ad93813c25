//! Append-only content store.
//!
//! Variable-length payloads are written as checksummed, 16-byte aligned
//! blocks into a single memory-mapped file and addressed by
//! (offset, length). Blocks are immutable once written; updating a
//! record's content always appends a new block and repoints the owning
//! record, so readers observe old-or-new content, never a partial value.
//!
//! # Invariants Enforced
//!
//! - Every block carries magic + CRC32, verified before any byte is
//!   yielded to a reader
//! - The write cursor is recovered on open by scanning block headers
//!   from byte 0, tolerating a torn tail after an unclean shutdown
//! - Superseded blocks are never reclaimed here (bookkeeping for a
//!   future offline compactor)

mod block;
mod errors;
mod store;

pub use block::{BlockHeader, Encoding, BLOCK_ALIGN, BLOCK_HEADER_SIZE, BLOCK_MAGIC};
pub use errors::{ContentError, ContentResult};
pub use store::{
    CompressionOptions, ContentCodec, ContentLocation, ContentOptions, ContentStore,
    ContentStream,
};
