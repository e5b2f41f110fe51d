//! Domain entities and business logic
//!
//! This module contains the core domain types for MirrorSync:
//! - Newtypes for type-safe identifiers and validated paths/hashes
//! - File records and change sets produced by detection
//! - Session lifecycle and progress tracking
//! - Conflict resolution records
//! - The persisted metadata snapshot
//! - Domain-specific error types

pub mod conflict;
pub mod errors;
pub mod file_record;
pub mod metadata;
pub mod newtypes;
pub mod session;

// Re-export commonly used types
pub use conflict::{ConflictResolution, ConflictStrategy, VersionInfo, Winner};
pub use errors::DomainError;
pub use file_record::{ChangeSet, FileRecord};
pub use metadata::{HashIndex, SyncMetadata};
pub use newtypes::*;
pub use session::{FileError, SessionStatus, SyncSession};
