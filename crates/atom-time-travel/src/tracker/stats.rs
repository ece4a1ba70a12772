use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::atom::{AtomId, AtomRole};
use crate::config::CleanupStrategyKind;

/// Outcome of one cleanup pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    /// Atoms no longer tracked, archived ones included
    pub removed: usize,
    pub archived: usize,
    pub removed_ids: Vec<AtomId>,
    pub freed_bytes_estimate: u64,
    #[serde(with = "crate::config::duration_ms")]
    pub duration: Duration,
    pub strategy: CleanupStrategyKind,
}

impl CleanupResult {
    pub(crate) fn empty(strategy: CleanupStrategyKind) -> Self {
        Self {
            removed: 0,
            archived: 0,
            removed_ids: Vec::new(),
            freed_bytes_estimate: 0,
            duration: Duration::ZERO,
            strategy,
        }
    }
}

/// Cumulative cleanup statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub total_cleanups: u64,
    pub total_atoms_removed: u64,
    pub total_atoms_archived: u64,
    pub total_freed_bytes: u64,
    #[serde(with = "crate::config::duration_ms")]
    pub average_cleanup_time: Duration,
    pub last_cleanup: Option<DateTime<Utc>>,
    /// Only populated with `detailed_stats`
    pub removed_by_role: HashMap<AtomRole, u64>,
    /// Only populated with `detailed_stats`
    pub removed_by_strategy: HashMap<CleanupStrategyKind, u64>,
}

impl CleanupStats {
    pub(crate) fn record(
        &mut self,
        result: &CleanupResult,
        roles: &[AtomRole],
        now: DateTime<Utc>,
        detailed: bool,
    ) {
        self.total_cleanups += 1;
        self.total_atoms_removed += result.removed as u64;
        self.total_atoms_archived += result.archived as u64;
        self.total_freed_bytes += result.freed_bytes_estimate;
        self.last_cleanup = Some(now);

        // Running mean over every pass.
        let n = u128::from(self.total_cleanups);
        let total = self.average_cleanup_time.as_nanos() * (n - 1) + result.duration.as_nanos();
        self.average_cleanup_time = Duration::from_nanos((total / n) as u64);

        if detailed {
            for role in roles {
                *self.removed_by_role.entry(*role).or_insert(0) += 1;
            }
            if result.removed > 0 {
                *self.removed_by_strategy.entry(result.strategy).or_insert(0) +=
                    result.removed as u64;
            }
        }
    }
}
