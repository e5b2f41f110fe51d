//! Conflict resolution
//!
//! Picks the winning version of a diverged path. Resolution is pure: the
//! same inputs always produce the same record, and swapping the two
//! versions swaps the winner except on ties, which go to the local side.

use chrono::{DateTime, Utc};
use tracing::debug;

use mirrorsync_core::domain::{
    ConflictResolution, ConflictStrategy, RelativePath, VersionInfo, Winner,
};

use crate::policy::PolicyEngine;

/// Resolves one conflict with an explicit strategy
pub fn resolve_conflict(
    file: RelativePath,
    local: VersionInfo,
    remote: VersionInfo,
    strategy: ConflictStrategy,
    resolved_at: DateTime<Utc>,
) -> ConflictResolution {
    let winner = match strategy {
        ConflictStrategy::Newer if remote.modified_at() > local.modified_at() => Winner::Remote,
        ConflictStrategy::Larger if remote.size() > local.size() => Winner::Remote,
        ConflictStrategy::Remote => Winner::Remote,
        ConflictStrategy::Newer | ConflictStrategy::Larger | ConflictStrategy::Local => {
            Winner::Local
        }
    };

    debug!(
        path = %file,
        strategy = %strategy,
        winner = %winner,
        "Conflict resolved"
    );

    ConflictResolution::new(file, strategy, winner, local, remote, resolved_at)
}

/// Resolves conflicts using per-path strategies from a [`PolicyEngine`]
#[derive(Debug)]
pub struct ConflictResolver {
    policy: PolicyEngine,
}

impl ConflictResolver {
    pub fn new(policy: PolicyEngine) -> Self {
        Self { policy }
    }

    /// Strategy that applies to `file`, unless `strategy_override` is set
    pub fn strategy_for(
        &self,
        file: &RelativePath,
        strategy_override: Option<ConflictStrategy>,
    ) -> ConflictStrategy {
        strategy_override.unwrap_or_else(|| self.policy.evaluate(file.as_str()))
    }

    /// Resolves a conflict on `file`
    pub fn resolve(
        &self,
        file: RelativePath,
        local: VersionInfo,
        remote: VersionInfo,
        strategy_override: Option<ConflictStrategy>,
        resolved_at: DateTime<Utc>,
    ) -> ConflictResolution {
        let strategy = self.strategy_for(&file, strategy_override);
        resolve_conflict(file, local, remote, strategy, resolved_at)
    }
}
