//! Structured JSON logger.
//!
//! - One log line = one event
//! - Deterministic key ordering (event, level, then fields sorted by key)
//! - Synchronous, no buffering
//! - WARN and above go to stderr, everything else to stdout

use std::fmt;
use std::io::{self, Write};

/// Log levels, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug-level detail
    Debug = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues (e.g. an unconfirmed flush)
    Warn = 2,
    /// Operation failures
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Synchronous structured logger.
pub struct Logger;

impl Logger {
    /// Log an event with the given level and fields.
    pub fn log(level: LogLevel, event: &str, fields: &[(&str, &str)]) {
        if level >= LogLevel::Warn {
            Self::log_to_writer(level, event, fields, &mut io::stderr());
        } else {
            Self::log_to_writer(level, event, fields, &mut io::stdout());
        }
    }

    /// Shorthand for INFO events.
    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(LogLevel::Info, event, fields);
    }

    /// Shorthand for WARN events.
    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(LogLevel::Warn, event, fields);
    }

    /// Shorthand for ERROR events.
    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(LogLevel::Error, event, fields);
    }

    fn log_to_writer<W: Write>(
        level: LogLevel,
        event: &str,
        fields: &[(&str, &str)],
        writer: &mut W,
    ) {
        // JSON is built by hand so key ordering stays deterministic.
        let mut output = String::with_capacity(256);

        output.push('{');
        output.push_str("\"event\":\"");
        Self::escape_json_string(&mut output, event);
        output.push('"');

        output.push_str(",\"level\":\"");
        output.push_str(level.as_str());
        output.push('"');

        let mut sorted_fields: Vec<_> = fields.iter().collect();
        sorted_fields.sort_by_key(|(k, _)| *k);

        for (key, value) in sorted_fields {
            output.push_str(",\"");
            Self::escape_json_string(&mut output, key);
            output.push_str("\":\"");
            Self::escape_json_string(&mut output, value);
            output.push('"');
        }

        output.push('}');
        output.push('\n');

        // One syscall per event; failures to log are ignored.
        let _ = writer.write_all(output.as_bytes());
        let _ = writer.flush();
    }

    fn escape_json_string(output: &mut String, s: &str) {
        for c in s.chars() {
            match c {
                '"' => output.push_str("\\\""),
                '\\' => output.push_str("\\\\"),
                '\n' => output.push_str("\\n"),
                '\r' => output.push_str("\\r"),
                '\t' => output.push_str("\\t"),
                c if c.is_control() => {
                    output.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => output.push(c),
            }
        }
    }
}
