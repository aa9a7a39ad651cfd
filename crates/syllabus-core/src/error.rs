//! Error types for Syllabus

use thiserror::Error;

use crate::domain::locking::LockError;

/// Result type alias using Syllabus's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Syllabus error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Graph errors (E001-E099)
    #[error("Concept '{0}' not found. Run `syllabus stats` to inspect the graph.")]
    ConceptNotFound(String),

    #[error("Graph invariant violated: {0}")]
    InvariantViolation(String),

    // Network errors (E100-E199)
    #[error("Network error: {0}. Check that the embedding endpoint is reachable.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Embedding request failed: {0}")]
    EmbeddingFailed(String),

    #[error("Rate limited by embedding endpoint after {0} attempts.")]
    RateLimited(u32),

    // Lock errors (E300-E399)
    #[error("Lock timeout: title '{0}' is being merged by another batch. Try again later.")]
    LockTimeout(String),

    // Storage errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Graph store unavailable: {0}")]
    StoreUnavailable(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Malformed extraction file: {0}")]
    MalformedExtractionFile(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConceptNotFound(_) => "E001",
            Self::InvariantViolation(_) => "E002",
            Self::NetworkError(_) => "E100",
            Self::EmbeddingFailed(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::LockTimeout(_) => "E300",
            Self::DatabaseError(_) => "E400",
            Self::StoreUnavailable(_) => "E401",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::MalformedExtractionFile(_) => "E801",
            Self::Serialization(_) => "E802",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::ConceptNotFound(_) => Some("syllabus stats".to_string()),
            Self::NetworkError(_) | Self::EmbeddingFailed(_) => {
                Some("syllabus config get embedding.endpoint".to_string())
            }
            Self::LockTimeout(_) => {
                Some("syllabus config set resolver.lock_timeout_ms 10000".to_string())
            }
            Self::DatabaseError(_) | Self::StoreUnavailable(_) => {
                Some("syllabus config get database.path".to_string())
            }
            Self::MalformedExtractionFile(_) => {
                Some("Provide a JSON array or JSON Lines file of extraction batches".to_string())
            }
            _ => None,
        }
    }

    /// Whether this error means the backing store or gateway could not be reached
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::EmbeddingFailed(_)
                | Self::RateLimited(_)
                | Self::DatabaseError(_)
                | Self::StoreUnavailable(_)
        )
    }
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Timeout { resource, .. } => Self::LockTimeout(resource),
            other => Self::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::ConceptNotFound("x".into()).code(), "E001");
        assert_eq!(Error::LockTimeout("gd".into()).code(), "E300");
        assert_eq!(Error::StoreUnavailable("down".into()).code(), "E401");
        assert_eq!(Error::Other("x".into()).code(), "E9999");
    }

    #[test]
    fn test_suggestions() {
        assert_eq!(
            Error::ConceptNotFound("x".into()).suggestion(),
            Some("syllabus stats".to_string())
        );
        assert!(Error::InvalidInput("x".into()).suggestion().is_none());
    }

    #[test]
    fn test_lock_timeout_conversion() {
        let err: Error = LockError::Timeout {
            resource: "gradient descent".into(),
            waited: Duration::from_millis(50),
        }
        .into();

        assert!(matches!(err, Error::LockTimeout(ref t) if t == "gradient descent"));
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(Error::StoreUnavailable("x".into()).is_connectivity());
        assert!(Error::EmbeddingFailed("x".into()).is_connectivity());
        assert!(!Error::InvalidInput("x".into()).is_connectivity());
    }
}
