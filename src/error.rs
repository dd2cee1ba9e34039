//! Error types and result handling for hub-writer.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! Every error belongs to one of two classes. User errors are caused by the
//! configuration or the exported data and are shown to the end user as-is
//! (exit code 1). Application errors are internal faults and keep their full
//! diagnostic context for the operator (exit code 2).
//!
//! # Example
//!
//! ```rust
//! use hub_writer::{Error, Result};
//!
//! fn check_batch_size(batch_size: usize) -> Result<()> {
//!     if batch_size == 0 {
//!         return Err(Error::Config("batchSize must be at least 1".to_string()));
//!     }
//!     Ok(())
//! }
//!
//! let err = check_batch_size(0).unwrap_err();
//! assert!(err.is_user_error());
//! assert_eq!(err.exit_code(), 1);
//! ```

use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;
use thiserror::Error;

/// Exit code of a successful run.
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code of a run that failed because of a user error.
pub const EXIT_USER_ERROR: i32 = 1;

/// Exit code of a run that failed because of an application error.
pub const EXIT_APPLICATION_ERROR: i32 = 2;

/// The main error type for hub-writer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration.
    #[error("{0}")]
    Config(String),

    /// A configured column does not exist in the table header.
    #[error("Column \"{column}\" not found in table \"{table}\".")]
    ColumnNotFound {
        /// Name of the missing column
        column: String,
        /// Table the column was looked up in
        table: String,
    },

    /// A cell that must contain JSON could not be parsed.
    #[error("{0}")]
    InvalidMessage(String),

    /// A single message does not fit into an empty batch.
    #[error("Message {ordinal} is too large: {size} bytes exceeds the batch capacity of {capacity} bytes.")]
    MessageTooLarge {
        /// 1-based position of the message in the exported stream
        ordinal: u64,
        /// Encoded size of the message
        size: usize,
        /// Capacity of an empty batch
        capacity: usize,
    },

    /// The hub rejected our credentials.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The hub could not be reached or addressed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation timeout.
    #[error("Timeout error: {message}")]
    Timeout {
        /// Description of what timed out
        message: String,
    },

    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// JSON serialization error when encoding or decoding messages.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The input table could not be parsed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error, typically from reading the input table.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The input table or frame stream has an unexpected shape.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A frame in the driver/worker byte stream is malformed.
    #[error("Invalid frame: {0}")]
    Frame(String),

    /// The pipeline broke internally (channel closed, task panicked).
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Graceful shutdown was requested (e.g., via Ctrl+C).
    ///
    /// This is not really an error but uses the error mechanism
    /// to cleanly exit the export loop.
    #[error("Shutdown requested")]
    Shutdown,
}

impl Error {
    /// Returns `true` when the error is caused by the configuration or the
    /// exported data rather than by a fault in hub-writer itself.
    pub fn is_user_error(&self) -> bool {
        match self {
            Error::Config(_)
            | Error::ColumnNotFound { .. }
            | Error::InvalidMessage(_)
            | Error::MessageTooLarge { .. }
            | Error::Authentication(_)
            | Error::Connection(_)
            | Error::Timeout { .. } => true,
            Error::Kafka(e) => is_user_kafka_error(e),
            _ => false,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        if self.is_user_error() {
            EXIT_USER_ERROR
        } else {
            EXIT_APPLICATION_ERROR
        }
    }

    /// Converts any error raised while checking connectivity into a user error.
    ///
    /// A failed connection check is always reported to the user, whatever
    /// the underlying cause was.
    pub fn into_user_error(self) -> Error {
        if self.is_user_error() {
            self
        } else {
            Error::Connection(self.to_string())
        }
    }

    /// Returns a copy of this error whose message has every secret removed.
    ///
    /// Only user errors are rewritten; application errors keep the full
    /// context for debugging.
    pub fn sanitized(self, secrets: &[&str]) -> Error {
        if !self.is_user_error() {
            return self;
        }
        let message = sanitize(&self.to_string(), secrets);
        match self {
            Error::Authentication(_) => {
                Error::Authentication(strip_prefix(&message, "Authentication error: "))
            }
            Error::Connection(_) => Error::Connection(strip_prefix(&message, "Connection error: ")),
            Error::Kafka(_) => Error::Connection(strip_prefix(&message, "Kafka error: ")),
            Error::Config(_) => Error::Config(message),
            other => other,
        }
    }
}

/// Replaces every occurrence of a non-empty secret with `*****`.
pub fn sanitize(message: &str, secrets: &[&str]) -> String {
    let mut out = message.to_string();
    // Longest first, the connection string contains the access key.
    let mut secrets: Vec<&str> = secrets.iter().copied().filter(|s| !s.is_empty()).collect();
    secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
    for secret in secrets {
        out = out.replace(secret, "*****");
    }
    out
}

fn strip_prefix(message: &str, prefix: &str) -> String {
    message.strip_prefix(prefix).unwrap_or(message).to_string()
}

/// Kafka failures that are the user's fault whenever they happen.
///
/// Transport failures only count as user errors while connecting; the hub
/// client converts them at that point.
fn is_user_kafka_error(error: &KafkaError) -> bool {
    match error.rdkafka_error_code() {
        Some(code) => is_auth_code(code) || is_unknown_topic_code(code),
        None => matches!(error, KafkaError::ClientConfig(..)),
    }
}

pub(crate) fn is_auth_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed
    )
}

pub(crate) fn is_unknown_topic_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownPartition
    )
}

/// A convenient Result type alias for hub-writer operations.
///
/// This is equivalent to `std::result::Result<T, hub_writer::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
