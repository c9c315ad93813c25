//! Startup crash recovery.

mod errors;
mod replay;

pub use errors::{RecoveryError, RecoveryResult};
pub use replay::{recover, CompensationTarget, RecoveryStats};
