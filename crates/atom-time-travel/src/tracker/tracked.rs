use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::atom::{Atom, AtomId, AtomRole};
use crate::clock::elapsed;

/// Liveness of a tracked atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomStatus {
    Active,
    Idle,
    Stale,
}

/// Identifies one subscriber holding a reference to an atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberToken(pub Uuid);

impl SubscriberToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Usage record of one tracked atom
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedAtom {
    pub atom: Atom,
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// When this record was created; reset when restored from the archive
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
    pub change_count: u64,
    #[serde(with = "crate::config::duration_ms")]
    pub ttl: Duration,
    pub status: AtomStatus,
    pub gc_eligible: bool,
    pub ref_count: usize,
    pub subscribers: HashSet<SubscriberToken>,
}

impl TrackedAtom {
    pub(crate) fn new(atom: Atom, name: String, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            atom,
            name,
            first_seen: now,
            last_seen: now,
            created_at: now,
            access_count: 0,
            change_count: 0,
            ttl,
            status: AtomStatus::Active,
            gc_eligible: false,
            ref_count: 0,
            subscribers: HashSet::new(),
        }
    }

    pub fn id(&self) -> AtomId {
        self.atom.id()
    }

    pub fn role(&self) -> AtomRole {
        self.atom.role()
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.last_seen, now)
    }

    /// Milliseconds past the TTL; negative while still within it
    pub fn overdue_ms(&self, now: DateTime<Utc>) -> f64 {
        self.idle_for(now).as_secs_f64() * 1000.0 - self.ttl.as_secs_f64() * 1000.0
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_seen = now;
        self.status = AtomStatus::Active;
        self.gc_eligible = false;
    }

    /// Recompute status and eligibility. Returns the old status if it moved.
    pub(crate) fn evaluate(
        &mut self,
        now: DateTime<Utc>,
        idle_threshold: Duration,
        ref_counting: bool,
    ) -> Option<AtomStatus> {
        let idle = self.idle_for(now);
        let status = if idle > self.ttl {
            AtomStatus::Stale
        } else if idle > idle_threshold {
            AtomStatus::Idle
        } else {
            AtomStatus::Active
        };

        let unreferenced = !ref_counting || self.ref_count == 0;
        self.gc_eligible = status == AtomStatus::Stale && unreferenced;

        if status != self.status {
            let previous = self.status;
            self.status = status;
            Some(previous)
        } else {
            None
        }
    }

    /// Recheck eligibility after a reference count change
    pub(crate) fn refresh_eligibility(&mut self, ref_counting: bool) {
        let unreferenced = !ref_counting || self.ref_count == 0;
        self.gc_eligible = self.status == AtomStatus::Stale && unreferenced;
    }

    /// Rough footprint of the record in bytes
    pub fn approximate_size(&self) -> u64 {
        (std::mem::size_of::<TrackedAtom>()
            + self.name.len()
            + self.subscribers.len() * std::mem::size_of::<SubscriberToken>()) as u64
    }
}
