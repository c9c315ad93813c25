//! Facade tying the components into one embedded store.

mod engine;
mod errors;
mod record;

pub use engine::{PromptDocument, RecordFields, SearchHit, Store, StoreStats};
pub use errors::{StoreError, StoreResult};
pub use record::{PromptRecord, FLAG_DELETED};
