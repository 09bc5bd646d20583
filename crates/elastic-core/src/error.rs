//! Error types for elastic

use thiserror::Error;

/// Main error type for elastic
#[derive(Error, Debug)]
pub enum ElasticError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cloud provider error (quota, capacity, API failure)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Remote execution error
    #[error("Network error: {0}")]
    Network(String),

    /// Node could not be reached, usually because it is booting or tearing down
    #[error("Node unreachable: {0}")]
    Unreachable(String),

    /// State store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// History document was written by someone else since it was loaded
    #[error("State conflict: expected version {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },

    /// Workload did not drain within the allowed time
    #[error("Drain timed out on node {node} after {secs}s")]
    DrainTimeout { node: String, secs: u64 },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for elastic operations
pub type ElasticResult<T> = Result<T, ElasticError>;

impl ElasticError {
    /// Whether the error only means the node was not reachable this time
    pub fn is_transient(&self) -> bool {
        matches!(self, ElasticError::Unreachable(_))
    }
}

impl From<serde_json::Error> for ElasticError {
    fn from(err: serde_json::Error) -> Self {
        ElasticError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ElasticError {
    fn from(err: toml::de::Error) -> Self {
        ElasticError::Config(format!("Failed to parse config: {}", err))
    }
}
