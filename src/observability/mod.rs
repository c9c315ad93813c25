//! Structured logging for the engine.
//!
//! The engine is embedded, so it never assumes a logging framework is
//! installed in the host application. Events are emitted as single-line
//! JSON with deterministic key ordering, one line per event, written
//! synchronously.

mod logger;

pub use logger::{LogLevel, Logger};
