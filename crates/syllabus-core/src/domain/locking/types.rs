//! Lock types and error definitions

use std::time::Duration;
use thiserror::Error;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone)]
pub enum LockError {
    /// Lock acquisition timed out
    #[error("Lock timeout: title '{resource}' still held after {}ms", waited.as_millis())]
    Timeout { resource: String, waited: Duration },

    /// A caller asked for something the lock table cannot represent
    #[error("Invalid lock state: {0}")]
    InvalidState(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E300",
            Self::InvalidState(_) => "E305",
        }
    }
}

/// Configuration for the title lock manager
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Default timeout for acquiring a full title set
    pub default_timeout: Duration,

    /// Number of idle lock entries tolerated before the table is pruned on release
    pub prune_threshold: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            prune_threshold: 1024,
        }
    }
}

impl LockConfig {
    /// Set the default acquisition timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the prune threshold
    pub fn with_prune_threshold(mut self, threshold: usize) -> Self {
        self.prune_threshold = threshold;
        self
    }
}
