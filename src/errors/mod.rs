//! Domain-specific error types for the p2p-bench harness
//!
//! Stream-level failures are absorbed by the worker that hit them; everything
//! else propagates to the run boundary and ends the run.

use crate::metrics::record::RecordField;
use thiserror::Error;

/// Main error type for the benchmark harness
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration-related errors (CLI parsing, validation, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Fatal setup failures: sink creation, binding, peer address parsing
    #[error("Startup failure: {0}")]
    Startup(String),

    /// A durable metrics source contains a line that cannot be decoded
    #[error("Malformed record #{index} in '{source_name}': {reason}")]
    MalformedRecord {
        source_name: String,
        index: usize,
        #[source]
        reason: RecordError,
    },

    /// A metrics source could not be opened at all
    #[error("Cannot read metrics source '{path}': {source}")]
    Source {
        path: String,
        #[source]
        source: csv::Error,
    },

    /// Timeout or transport error on a single stream
    #[error("Stream I/O failure: {0}")]
    StreamIo(#[from] std::io::Error),

    /// Protocol negotiation or peer identity errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization errors
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Reason a single durable line failed to decode
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing field '{0}'")]
    MissingField(RecordField),

    #[error("field '{field}' is not a valid integer: '{value}'")]
    InvalidField { field: RecordField, value: String },

    #[error("{count} unexpected trailing field(s)")]
    TrailingFields { count: usize },

    #[error("unreadable line: {0}")]
    Unreadable(String),
}

/// Result type using BenchError
pub type Result<T> = std::result::Result<T, BenchError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_config_context(self, msg: &str) -> Result<T>;
    fn with_startup_context(self, msg: &str) -> Result<T>;
    fn with_transport_context(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_config_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| BenchError::Config(format!("{}: {}", msg, e)))
    }

    fn with_startup_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| BenchError::Startup(format!("{}: {}", msg, e)))
    }

    fn with_transport_context(self, msg: &str) -> Result<T> {
        self.map_err(|e| BenchError::Transport(format!("{}: {}", msg, e)))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn with_config_context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| BenchError::Config(msg.to_string()))
    }

    fn with_startup_context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| BenchError::Startup(msg.to_string()))
    }

    fn with_transport_context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| BenchError::Transport(msg.to_string()))
    }
}

// Convenience constructors
impl BenchError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        BenchError::Config(msg.into())
    }

    pub fn startup<S: Into<String>>(msg: S) -> Self {
        BenchError::Startup(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        BenchError::Transport(msg.into())
    }

    /// Whether this error is confined to a single stream and must not end the run
    pub fn is_stream_local(&self) -> bool {
        matches!(self, BenchError::StreamIo(_) | BenchError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_helpers_pick_variant() {
        let err: std::result::Result<(), &str> = Err("boom");
        assert!(matches!(
            err.with_startup_context("bind"),
            Err(BenchError::Startup(msg)) if msg == "bind: boom"
        ));

        let missing: Option<u32> = None;
        assert!(matches!(
            missing.with_config_context("no target"),
            Err(BenchError::Config(msg)) if msg == "no target"
        ));
    }

    #[test]
    fn test_stream_local_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline");
        assert!(BenchError::from(io).is_stream_local());
        assert!(BenchError::transport("na protocol").is_stream_local());
        assert!(!BenchError::startup("bind failed").is_stream_local());
    }

    #[test]
    fn test_malformed_record_names_index_and_field() {
        let err = BenchError::MalformedRecord {
            source_name: "run.csv".to_string(),
            index: 3,
            reason: RecordError::MissingField(RecordField::BytesWritten),
        };
        let msg = err.to_string();
        assert!(msg.contains("#3"));
        assert!(msg.contains("run.csv"));
        assert!(msg.contains("bytes_written"));
    }
}
