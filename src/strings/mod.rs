//! Content-addressed string interning.
//!
//! The pool deduplicates equal strings to one stored copy. Lookups go
//! through a salted xxh3 hash; hash hits are byte-verified before reuse,
//! so colliding strings are still stored correctly. Entries carry a
//! reference count; entries at refcount 0 are *eligible* for reclamation
//! by a future offline compactor but are never reclaimed here.

mod errors;
mod pool;

pub use errors::{StringsError, StringsResult};
pub use pool::{PoolStats, StringEntry, StringId, StringPool};
