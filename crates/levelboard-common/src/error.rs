//! Error types for Levelboard
//!
//! This module defines the error type returned by shard and registry
//! operations.

use thiserror::Error;

/// Common result type for Levelboard operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Levelboard
#[derive(Debug, Error)]
pub enum Error {
    // Caller errors
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Storage errors
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("leaderboard chain corrupted: {0}")]
    ChainCorrupted(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    /// Create a chain corruption error
    pub fn chain_corrupted(msg: impl Into<String>) -> Self {
        Self::ChainCorrupted(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }

    /// Check if the caller supplied a bad value
    #[must_use]
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::storage("disk gone").is_retryable());
        assert!(!Error::invalid_argument("xp must be > 0").is_retryable());
        assert!(!Error::chain_corrupted("dangling prev").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = Error::invalid_argument("xp 0 is invalid");
        assert_eq!(err.to_string(), "invalid argument: xp 0 is invalid");
        assert!(err.is_invalid_argument());
    }
}
