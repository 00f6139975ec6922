//! Error types for the receiver and ingest pipeline

use thiserror::Error;

/// Result type for ingest operations
pub type IngestResult<T> = Result<T, IngestError>;

/// Malformed traffic on the coredump topics
///
/// Detected at the routing boundary, logged and dropped. Never reaches the
/// session store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("topic '{0}' is outside the coredump base topic")]
    ForeignTopic(String),

    #[error("unexpected topic shape: '{0}'")]
    UnexpectedTopic(String),

    #[error("fragment index is not a non-negative integer: '{0}'")]
    InvalidIndex(String),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("part count must be a positive integer, got {0}")]
    InvalidPartCount(String),
}

/// External coredump decoder failures
#[derive(Error, Debug)]
pub enum ParserError {
    #[error("failed to launch decoder: {0}")]
    Launch(#[source] std::io::Error),

    #[error("decoder exited with status {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("decoder timed out after {0} s")]
    Timeout(u64),

    #[error("invalid decoder input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the ingest pipeline
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Common(#[from] cdrc_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MQTT client error: {0}")]
    Mqtt(String),
}
