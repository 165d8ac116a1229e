use thiserror::Error;

/// Core error type for Conclave operations.
#[derive(Error, Debug)]
pub enum ConclaveError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Cluster error: {0}")]
    Cluster(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConclaveError {
    /// Whether the error came from the coordination store.
    ///
    /// Store failures are transient from the scheduler's point of view: the
    /// heartbeat cadence retries them on its own.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<serde_json::Error> for ConclaveError {
    fn from(e: serde_json::Error) -> Self {
        ConclaveError::Serialization(e.to_string())
    }
}

/// Result type alias using ConclaveError.
pub type Result<T> = std::result::Result<T, ConclaveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_flagged() {
        assert!(ConclaveError::Store("down".into()).is_store());
        assert!(!ConclaveError::Config("bad".into()).is_store());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err: ConclaveError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, ConclaveError::Serialization(_)));
    }
}
