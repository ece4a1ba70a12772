//! Cleanup strategies decide which eligible atoms go first.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::tracked::TrackedAtom;
use crate::atom::AtomId;
use crate::clock::elapsed;
use crate::config::CleanupStrategyKind;

/// Eviction policy over GC-eligible atoms
pub trait CleanupStrategy: Send + Sync + fmt::Debug {
    fn kind(&self) -> CleanupStrategyKind;

    /// Higher values are evicted first
    fn priority(&self, atom: &TrackedAtom, now: DateTime<Utc>) -> f64;

    /// Up to `limit` candidates in eviction order. Ties go to the oldest record.
    fn select_candidates(
        &self,
        candidates: &[TrackedAtom],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<AtomId> {
        let mut scored: Vec<(f64, &TrackedAtom)> = candidates
            .iter()
            .map(|atom| (self.priority(atom, now), atom))
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.created_at.cmp(&b.1.created_at))
        });
        scored
            .into_iter()
            .take(limit)
            .map(|(_, atom)| atom.id())
            .collect()
    }
}

/// Least recently used: longest since last access
#[derive(Debug, Clone, Copy, Default)]
pub struct LruStrategy;

impl CleanupStrategy for LruStrategy {
    fn kind(&self) -> CleanupStrategyKind {
        CleanupStrategyKind::Lru
    }

    fn priority(&self, atom: &TrackedAtom, now: DateTime<Utc>) -> f64 {
        atom.idle_for(now).as_secs_f64()
    }
}

/// Least frequently used: fewest accesses
#[derive(Debug, Clone, Copy, Default)]
pub struct LfuStrategy;

impl CleanupStrategy for LfuStrategy {
    fn kind(&self) -> CleanupStrategyKind {
        CleanupStrategyKind::Lfu
    }

    fn priority(&self, atom: &TrackedAtom, _now: DateTime<Utc>) -> f64 {
        -(atom.access_count as f64)
    }
}

/// First in, first out: oldest record
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoStrategy;

impl CleanupStrategy for FifoStrategy {
    fn kind(&self) -> CleanupStrategyKind {
        CleanupStrategyKind::Fifo
    }

    fn priority(&self, atom: &TrackedAtom, now: DateTime<Utc>) -> f64 {
        elapsed(atom.created_at, now).as_secs_f64()
    }
}

/// Furthest past its own TTL
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeBasedStrategy;

impl CleanupStrategy for TimeBasedStrategy {
    fn kind(&self) -> CleanupStrategyKind {
        CleanupStrategyKind::TimeBased
    }

    fn priority(&self, atom: &TrackedAtom, now: DateTime<Utc>) -> f64 {
        atom.overdue_ms(now)
    }
}

pub fn strategy_for(kind: CleanupStrategyKind) -> Arc<dyn CleanupStrategy> {
    match kind {
        CleanupStrategyKind::Lru => Arc::new(LruStrategy),
        CleanupStrategyKind::Lfu => Arc::new(LfuStrategy),
        CleanupStrategyKind::Fifo => Arc::new(FifoStrategy),
        CleanupStrategyKind::TimeBased => Arc::new(TimeBasedStrategy),
    }
}
