//! # Error Handling
//!
//! Cache-specific error types built on `thiserror`. Transport failures from
//! the remote tier are never surfaced through these types - the provider
//! swallows them and returns safe defaults. What does propagate:
//! computation errors from compute functions, configuration problems, and
//! contention errors such as an already-running warming pass.

use thiserror::Error;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Key generation error: {message}")]
    KeyGeneration { message: String },

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    /// A compute function failed. Caching never masks these - the error is
    /// handed back to the `get_or_compute` caller untouched.
    #[error(transparent)]
    Computation(#[from] anyhow::Error),

    #[error("Cache warming is already in progress")]
    WarmingInProgress,

    #[error("Cache operation timeout")]
    Timeout,
}

impl CacheError {
    /// True when a caller can safely retry the operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CacheError::WarmingInProgress | CacheError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warming_in_progress_is_retryable() {
        assert!(CacheError::WarmingInProgress.is_retryable());
        assert!(!CacheError::Configuration {
            message: "bad".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_computation_error_preserves_message() {
        let err: CacheError = anyhow::anyhow!("tax table missing").into();
        assert_eq!(err.to_string(), "tax table missing");
    }
}
