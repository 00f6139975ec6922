//! Error types for clustering and reconciliation

use thiserror::Error;

/// Result type for clustering runs
pub type ClusterResult<T> = Result<T, ClusterError>;

/// External corpus clusterer failures
#[derive(Error, Debug)]
pub enum ClustererError {
    #[error("failed to launch clusterer: {0}")]
    Launch(#[source] std::io::Error),

    #[error("clusterer exited with status {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("clusterer timed out after {0} s")]
    Timeout(u64),

    #[error("clusterer produced no output at {0}")]
    MissingOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Partition construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    #[error("item {item} assigned to more than one cluster")]
    DuplicateItem { item: i64 },
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Clusterer(#[from] ClustererError),

    #[error(transparent)]
    Common(#[from] cdrc_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
