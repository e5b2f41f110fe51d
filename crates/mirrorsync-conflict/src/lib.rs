//! MirrorSync Conflict - Divergence detection and resolution
//!
//! Provides:
//! - Hash-based divergence detection against the last common sync point
//! - Deterministic resolution strategies (`newer`, `larger`, `local`, `remote`)
//! - Per-path strategy selection from glob rules

pub mod detector;
pub mod error;
pub mod policy;
pub mod resolver;

pub use detector::has_diverged;
pub use error::ConflictError;
pub use policy::PolicyEngine;
pub use resolver::{resolve_conflict, ConflictResolver};
