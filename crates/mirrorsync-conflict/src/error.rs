//! Error types for the conflict engine

use thiserror::Error;

/// Errors that can occur while building conflict policies
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictError {
    /// Invalid glob pattern in conflict rule
    #[error("invalid glob pattern: {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}
