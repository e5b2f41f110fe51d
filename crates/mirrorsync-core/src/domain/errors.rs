//! Domain error types
//!
//! This module defines error types specific to domain operations,
//! including validation failures, invalid state transitions, and path errors.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid hash format (expected lowercase hex SHA-256)
    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    /// Invalid state transition attempt
    #[error("Invalid state transition from {from} to {to}")]
    InvalidState {
        /// The current state
        from: String,
        /// The attempted target state
        to: String,
    },

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("../escape".to_string());
        assert_eq!(err.to_string(), "Invalid path: ../escape");

        let err = DomainError::InvalidHash("zz".to_string());
        assert_eq!(err.to_string(), "Invalid hash format: zz");

        let err = DomainError::InvalidState {
            from: "completed".to_string(),
            to: "in_progress".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from completed to in_progress"
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidPath("a/../b".to_string());
        let err2 = DomainError::InvalidPath("a/../b".to_string());
        let err3 = DomainError::InvalidPath("/abs".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }
}
