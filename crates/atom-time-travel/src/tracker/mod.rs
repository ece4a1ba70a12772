//! Atom tracking with TTL, reference counting and garbage collection.
//!
//! The tracker keeps one [`TrackedAtom`] per watched atom in a concurrent
//! map. Statuses move from `Active` to `Idle` to `Stale` as time passes
//! without access; stale, unreferenced atoms become eligible for cleanup,
//! which a [`CleanupStrategy`] orders and which either deletes them or moves
//! them into a bounded archive.
//!
//! Events are published on a broadcast channel. Nobody listening is fine.

pub mod archive;
pub mod stats;
pub mod strategy;
pub mod tracked;

pub use archive::{ArchivedAtom, AtomArchive};
pub use stats::{CleanupResult, CleanupStats};
pub use strategy::{
    strategy_for, CleanupStrategy, FifoStrategy, LfuStrategy, LruStrategy, TimeBasedStrategy,
};
pub use tracked::{AtomStatus, SubscriberToken, TrackedAtom};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::atom::{Atom, AtomId};
use crate::clock::{self, SharedClock};
use crate::config::{OnCleanup, TrackerConfig};
use crate::disposal::{Disposable, DisposableState, DisposalConfig};
use crate::error::Result;
use crate::value::SerializedValue;

/// Why a tracker operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerErrorKind {
    CapacityExceeded,
    RoleExcluded,
    InvalidAtom,
}

#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Tracked {
        id: AtomId,
        name: String,
    },
    Untracked {
        id: AtomId,
        name: String,
    },
    Changed {
        id: AtomId,
        name: String,
        old_value: SerializedValue,
        new_value: SerializedValue,
        timestamp: DateTime<Utc>,
    },
    StatusChanged {
        id: AtomId,
        from: AtomStatus,
        to: AtomStatus,
    },
    Cleanup(CleanupResult),
    Archived {
        id: AtomId,
    },
    ArchiveEvicted {
        id: AtomId,
    },
    Restored {
        id: AtomId,
    },
    Error {
        kind: TrackerErrorKind,
        atom: AtomId,
        message: String,
    },
}

struct TrackerInner {
    config: TrackerConfig,
    clock: SharedClock,
    strategy: Arc<dyn CleanupStrategy>,
    atoms: DashMap<AtomId, TrackedAtom>,
    archive: Mutex<AtomArchive>,
    stats: Mutex<CleanupStats>,
    events: broadcast::Sender<TrackerEvent>,
    // Serializes inserts so the capacity check holds
    admission: Mutex<()>,
}

/// Tracks atom usage and reclaims atoms that stop being used
pub struct AtomTracker {
    inner: Arc<TrackerInner>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
    lifecycle: DisposableState,
}

impl AtomTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, clock::system_clock())
    }

    pub fn with_clock(config: TrackerConfig, clock: SharedClock) -> Self {
        let strategy = strategy_for(config.ttl.cleanup_strategy);
        Self::with_strategy(config, clock, strategy)
    }

    pub fn with_strategy(
        config: TrackerConfig,
        clock: SharedClock,
        strategy: Arc<dyn CleanupStrategy>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let archive = AtomArchive::new(config.ttl.archive_storage.max_archived);
        Self {
            inner: Arc::new(TrackerInner {
                config,
                clock,
                strategy,
                atoms: DashMap::new(),
                archive: Mutex::new(archive),
                stats: Mutex::new(CleanupStats::default()),
                events,
                admission: Mutex::new(()),
            }),
            gc_task: Mutex::new(None),
            lifecycle: DisposableState::new("atom-tracker", DisposalConfig::default()),
        }
    }

    pub fn with_disposal(mut self, config: DisposalConfig) -> Self {
        self.lifecycle = DisposableState::new("atom-tracker", config);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    pub fn strategy(&self) -> &Arc<dyn CleanupStrategy> {
        &self.inner.strategy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.inner.events.subscribe()
    }

    /// Start tracking an atom.
    ///
    /// Returns true if the atom is tracked afterwards. Refusals emit
    /// [`TrackerEvent::Error`] instead of failing.
    pub fn track(&self, atom: &Atom, name: Option<&str>) -> bool {
        if self.lifecycle.is_disposed() {
            return false;
        }
        let inner = &self.inner;
        if inner.atoms.contains_key(&atom.id()) {
            return true;
        }

        let role = atom.role();
        if inner.config.exclude_roles.contains(&role) {
            inner.emit_error(
                TrackerErrorKind::RoleExcluded,
                atom.id(),
                format!("role {} is excluded from tracking", role.as_str()),
            );
            return false;
        }

        let name = match name.or(atom.name()) {
            Some("") => {
                inner.emit_error(
                    TrackerErrorKind::InvalidAtom,
                    atom.id(),
                    "atom name must not be empty".to_string(),
                );
                return false;
            }
            Some(name) => name.to_string(),
            None => atom.display_name(),
        };

        {
            let _admission = inner.admission.lock();
            if inner.atoms.contains_key(&atom.id()) {
                return true;
            }
            if inner.atoms.len() >= inner.config.max_atoms {
                warn!(atom = %name, max_atoms = inner.config.max_atoms, "tracker at capacity");
                inner.emit_error(
                    TrackerErrorKind::CapacityExceeded,
                    atom.id(),
                    format!("tracker holds the maximum of {} atoms", inner.config.max_atoms),
                );
                return false;
            }

            let ttl = inner.config.ttl.effective_ttl(role);
            let tracked = TrackedAtom::new(atom.clone(), name.clone(), ttl, inner.clock.now());
            inner.atoms.insert(atom.id(), tracked);
        }
        inner.archive.lock().take(atom.id());

        debug!(atom = %name, role = role.as_str(), "tracking atom");
        inner.emit(TrackerEvent::Tracked { id: atom.id(), name });
        true
    }

    pub fn untrack(&self, atom: &Atom) -> bool {
        match self.inner.atoms.remove(&atom.id()) {
            Some((id, tracked)) => {
                debug!(atom = %tracked.name, "untracked atom");
                self.inner.emit(TrackerEvent::Untracked {
                    id,
                    name: tracked.name,
                });
                true
            }
            None => false,
        }
    }

    pub fn is_tracked(&self, atom: &Atom) -> bool {
        self.inner.atoms.contains_key(&atom.id())
    }

    /// Note a read of the atom, optionally on behalf of a subscriber
    pub fn record_access(&self, atom: &Atom, subscriber: Option<SubscriberToken>) -> bool {
        let now = self.inner.clock.now();
        let ref_counting = self.inner.config.ttl.enable_ref_counting;

        let previous = {
            let Some(mut tracked) = self.inner.atoms.get_mut(&atom.id()) else {
                return false;
            };
            let previous = tracked.status;
            tracked.touch(now);
            if ref_counting {
                if let Some(token) = subscriber {
                    if tracked.subscribers.insert(token) {
                        tracked.ref_count += 1;
                    }
                }
            }
            previous
        };

        if previous != AtomStatus::Active {
            self.inner.emit(TrackerEvent::StatusChanged {
                id: atom.id(),
                from: previous,
                to: AtomStatus::Active,
            });
        }
        true
    }

    pub fn remove_subscriber(&self, atom: &Atom, token: &SubscriberToken) -> bool {
        let ttl = &self.inner.config.ttl;
        let released = {
            let Some(mut tracked) = self.inner.atoms.get_mut(&atom.id()) else {
                return false;
            };
            if !tracked.subscribers.remove(token) {
                return false;
            }
            tracked.ref_count = tracked.ref_count.saturating_sub(1);
            tracked.refresh_eligibility(ttl.enable_ref_counting);
            tracked.ref_count == 0
        };

        if released && ttl.auto_untrack_when_ref_zero {
            self.untrack(atom);
        }
        true
    }

    /// Count a change of a tracked atom; values arrive already serialized
    pub fn record_change(
        &self,
        atom: &Atom,
        old_value: &SerializedValue,
        new_value: &SerializedValue,
    ) -> bool {
        let name = {
            let Some(mut tracked) = self.inner.atoms.get_mut(&atom.id()) else {
                return false;
            };
            tracked.change_count += 1;
            tracked.name.clone()
        };

        if self.inner.events.receiver_count() > 0 {
            self.inner.emit(TrackerEvent::Changed {
                id: atom.id(),
                name,
                old_value: old_value.clone(),
                new_value: new_value.clone(),
                timestamp: self.inner.clock.now(),
            });
        }
        true
    }

    /// Recompute every status; returns how many changed
    pub fn update_atom_statuses(&self) -> usize {
        self.inner.update_statuses(self.inner.clock.now())
    }

    pub fn get_stale_atoms(&self) -> Vec<TrackedAtom> {
        self.update_atom_statuses();
        self.filtered(|t| t.status == AtomStatus::Stale)
    }

    pub fn get_idle_atoms(&self) -> Vec<TrackedAtom> {
        self.update_atom_statuses();
        self.filtered(|t| t.status == AtomStatus::Idle)
    }

    pub fn get_gc_eligible_atoms(&self) -> Vec<TrackedAtom> {
        self.update_atom_statuses();
        self.filtered(|t| t.gc_eligible)
    }

    pub fn get_tracked_atom(&self, id: AtomId) -> Option<TrackedAtom> {
        self.inner.atoms.get(&id).map(|entry| entry.value().clone())
    }

    /// All tracked atoms, oldest record first
    pub fn tracked_atoms(&self) -> Vec<TrackedAtom> {
        self.filtered(|_| true)
    }

    pub fn len(&self) -> usize {
        self.inner.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.atoms.is_empty()
    }

    /// Run one cleanup pass of up to `batch_size` atoms
    pub fn perform_cleanup(&self) -> CleanupResult {
        self.cleanup_now(None)
    }

    /// Empty result once disposed
    pub fn cleanup_now(&self, limit: Option<usize>) -> CleanupResult {
        if self.lifecycle.is_disposed() {
            return CleanupResult::empty(self.inner.strategy.kind());
        }
        self.inner
            .cleanup_pass(limit.unwrap_or(self.inner.config.ttl.batch_size))
    }

    /// Yield once to let in-flight work settle, then run a cleanup pass
    pub async fn wait_for_cleanup(&self) -> CleanupResult {
        tokio::task::yield_now().await;
        self.perform_cleanup()
    }

    pub fn restore_archived_atom(&self, id: AtomId) -> bool {
        if self.lifecycle.is_disposed() {
            return false;
        }
        let inner = &self.inner;
        let Some(archived) = inner.archive.lock().take(id) else {
            return false;
        };

        let _admission = inner.admission.lock();
        if inner.atoms.len() >= inner.config.max_atoms {
            inner
                .archive
                .lock()
                .insert(archived.tracked, archived.archived_at);
            inner.emit_error(
                TrackerErrorKind::CapacityExceeded,
                id,
                "no room to restore archived atom".to_string(),
            );
            return false;
        }

        let now = inner.clock.now();
        let mut tracked = archived.tracked;
        tracked.created_at = now;
        tracked.last_seen = now;
        tracked.status = AtomStatus::Active;
        tracked.gc_eligible = false;
        debug!(atom = %tracked.name, "restored archived atom");
        inner.atoms.insert(id, tracked);
        inner.emit(TrackerEvent::Restored { id });
        true
    }

    pub fn archived_atoms(&self) -> Vec<ArchivedAtom> {
        self.inner.archive.lock().iter().cloned().collect()
    }

    pub fn archive_len(&self) -> usize {
        self.inner.archive.lock().len()
    }

    pub fn stats(&self) -> CleanupStats {
        self.inner.stats.lock().clone()
    }

    /// Start the background sweep on the current tokio runtime
    pub fn start_gc(&self) -> bool {
        let mut task = self.gc_task.lock();
        if task.is_some() || self.lifecycle.is_disposed() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("garbage collection requested outside a tokio runtime");
            return false;
        };

        let tracker: Weak<TrackerInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.ttl.gc_interval;
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = tracker.upgrade() else {
                    break;
                };
                inner.cleanup_pass(inner.config.ttl.batch_size);
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "atom garbage collection started");
        true
    }

    pub fn stop_gc(&self) {
        if let Some(task) = self.gc_task.lock().take() {
            task.abort();
            debug!("atom garbage collection stopped");
        }
    }

    pub fn is_gc_running(&self) -> bool {
        self.gc_task.lock().is_some()
    }

    fn filtered(&self, keep: impl Fn(&TrackedAtom) -> bool) -> Vec<TrackedAtom> {
        let mut atoms: Vec<TrackedAtom> = self
            .inner
            .atoms
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        atoms.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        atoms
    }
}

impl TrackerInner {
    fn emit(&self, event: TrackerEvent) {
        let _ = self.events.send(event);
    }

    fn emit_error(&self, kind: TrackerErrorKind, atom: AtomId, message: String) {
        debug!(?kind, %atom, %message, "tracker refused operation");
        self.emit(TrackerEvent::Error {
            kind,
            atom,
            message,
        });
    }

    fn update_statuses(&self, now: DateTime<Utc>) -> usize {
        let idle_threshold = self.config.ttl.idle_threshold;
        let ref_counting = self.config.ttl.enable_ref_counting;

        let mut transitions = Vec::new();
        for mut entry in self.atoms.iter_mut() {
            if let Some(from) = entry.evaluate(now, idle_threshold, ref_counting) {
                transitions.push((entry.id(), from, entry.status));
            }
        }

        for (id, from, to) in &transitions {
            self.emit(TrackerEvent::StatusChanged {
                id: *id,
                from: *from,
                to: *to,
            });
        }
        transitions.len()
    }

    fn cleanup_pass(&self, limit: usize) -> CleanupResult {
        let started = Instant::now();
        let now = self.clock.now();
        self.update_statuses(now);

        // Candidates are copied out before anything is removed.
        let candidates: Vec<TrackedAtom> = self
            .atoms
            .iter()
            .filter(|entry| entry.gc_eligible)
            .map(|entry| entry.value().clone())
            .collect();
        let selected = self.strategy.select_candidates(&candidates, limit, now);

        let mut result = CleanupResult::empty(self.strategy.kind());
        let mut roles = Vec::new();
        for id in selected {
            let Some((_, tracked)) = self.atoms.remove_if(&id, |_, t| t.gc_eligible) else {
                continue;
            };
            result.freed_bytes_estimate += tracked.approximate_size();
            result.removed_ids.push(id);
            roles.push(tracked.role());

            if self.config.ttl.on_cleanup == OnCleanup::Archive {
                let evicted = self.archive.lock().insert(tracked, now);
                result.archived += 1;
                self.emit(TrackerEvent::Archived { id });
                for dropped in evicted {
                    self.emit(TrackerEvent::ArchiveEvicted {
                        id: dropped.tracked.id(),
                    });
                }
            }
        }
        result.removed = result.removed_ids.len();
        result.duration = started.elapsed();

        self.stats
            .lock()
            .record(&result, &roles, now, self.config.ttl.detailed_stats);

        if result.removed > 0 {
            info!(
                removed = result.removed,
                archived = result.archived,
                strategy = ?result.strategy,
                "atom cleanup pass"
            );
        }
        self.emit(TrackerEvent::Cleanup(result.clone()));
        result
    }
}

#[async_trait]
impl Disposable for AtomTracker {
    fn lifecycle(&self) -> &DisposableState {
        &self.lifecycle
    }

    async fn dispose(&self) -> Result<()> {
        self.lifecycle
            .dispose_with(async {
                self.stop_gc();
                self.inner.atoms.clear();
                self.inner.archive.lock().clear();
                Ok(())
            })
            .await
    }
}

impl Drop for AtomTracker {
    fn drop(&mut self) {
        if let Some(task) = self.gc_task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::AtomRole;
    use crate::clock::ManualClock;
    use crate::config::{CleanupStrategyKind, TtlConfig};
    use std::time::Duration;

    fn ttl_config() -> TtlConfig {
        TtlConfig {
            default_ttl: Duration::from_millis(100),
            idle_threshold: Duration::from_millis(25),
            min_ttl: Duration::from_millis(10),
            gc_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn tracker_with(ttl: TtlConfig) -> (AtomTracker, ManualClock) {
        let clock = ManualClock::starting_now();
        let config = TrackerConfig {
            ttl,
            ..Default::default()
        };
        (AtomTracker::with_clock(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_track_and_untrack() {
        let (tracker, _) = tracker_with(ttl_config());
        let counter = Atom::primitive("counter");

        assert!(tracker.track(&counter, None));
        assert!(tracker.track(&counter, None));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.tracked_atoms()[0].name, "counter");

        assert!(tracker.untrack(&counter));
        assert!(!tracker.untrack(&counter));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_capacity_refusal_emits_error() {
        let clock = ManualClock::starting_now();
        let config = TrackerConfig {
            max_atoms: 1,
            ..Default::default()
        };
        let tracker = AtomTracker::with_clock(config, Arc::new(clock));
        let mut events = tracker.subscribe();

        assert!(tracker.track(&Atom::primitive("a"), None));
        assert!(!tracker.track(&Atom::primitive("b"), None));
        assert_eq!(tracker.len(), 1);

        let mut saw_error = false;
        while let Ok(event) = events.try_recv() {
            if let TrackerEvent::Error { kind, .. } = event {
                assert_eq!(kind, TrackerErrorKind::CapacityExceeded);
                saw_error = true;
            }
        }
        assert!(saw_error);
    }

    #[test]
    fn test_excluded_role_and_empty_name_refused() {
        let clock = ManualClock::starting_now();
        let mut config = TrackerConfig::default();
        config.exclude_roles.insert(AtomRole::Computed);
        let tracker = AtomTracker::with_clock(config, Arc::new(clock));

        assert!(!tracker.track(&Atom::computed("total"), None));
        assert!(!tracker.track(&Atom::primitive("valid"), Some("")));
        assert!(tracker.track(&Atom::new(AtomRole::Primitive), None));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_ttl_statuses_and_access_reset() {
        let (tracker, clock) = tracker_with(ttl_config());
        let counter = Atom::primitive("counter");
        tracker.track(&counter, None);

        clock.advance(Duration::from_millis(50));
        assert_eq!(tracker.get_idle_atoms().len(), 1);
        assert!(tracker.get_stale_atoms().is_empty());

        clock.advance(Duration::from_millis(100));
        let stale = tracker.get_stale_atoms();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id(), counter.id());
        assert_eq!(tracker.get_gc_eligible_atoms().len(), 1);

        assert!(tracker.record_access(&counter, None));
        assert!(tracker.get_stale_atoms().is_empty());
        let tracked = tracker.get_tracked_atom(counter.id()).unwrap();
        assert_eq!(tracked.status, AtomStatus::Active);
        assert!(!tracked.gc_eligible);
        assert_eq!(tracked.access_count, 1);
    }

    #[test]
    fn test_type_ttl_override() {
        let mut ttl = ttl_config();
        ttl.type_ttl.insert(AtomRole::Computed, Duration::from_secs(10));
        let (tracker, clock) = tracker_with(ttl);
        let base = Atom::primitive("base");
        let derived = Atom::computed("derived");
        tracker.track(&base, None);
        tracker.track(&derived, None);

        clock.advance(Duration::from_millis(200));
        let stale = tracker.get_stale_atoms();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id(), base.id());
    }

    #[test]
    fn test_ref_counting_blocks_collection() {
        let mut ttl = ttl_config();
        ttl.enable_ref_counting = true;
        let (tracker, clock) = tracker_with(ttl);
        let counter = Atom::primitive("counter");
        let token = SubscriberToken::new();
        tracker.track(&counter, None);
        tracker.record_access(&counter, Some(token));
        tracker.record_access(&counter, Some(token));
        assert_eq!(tracker.get_tracked_atom(counter.id()).unwrap().ref_count, 1);

        clock.advance(Duration::from_millis(500));
        assert_eq!(tracker.get_stale_atoms().len(), 1);
        assert!(tracker.get_gc_eligible_atoms().is_empty());
        assert_eq!(tracker.perform_cleanup().removed, 0);

        assert!(tracker.remove_subscriber(&counter, &token));
        assert_eq!(tracker.get_gc_eligible_atoms().len(), 1);
        assert_eq!(tracker.perform_cleanup().removed, 1);
    }

    #[test]
    fn test_auto_untrack_when_ref_zero() {
        let mut ttl = ttl_config();
        ttl.enable_ref_counting = true;
        ttl.auto_untrack_when_ref_zero = true;
        let (tracker, _) = tracker_with(ttl);
        let counter = Atom::primitive("counter");
        let token = SubscriberToken::new();
        tracker.track(&counter, None);
        tracker.record_access(&counter, Some(token));

        assert!(tracker.remove_subscriber(&counter, &token));
        assert!(!tracker.is_tracked(&counter));
        assert!(!tracker.remove_subscriber(&counter, &token));
    }

    #[test]
    fn test_cleanup_respects_batch_size_and_strategy() {
        let mut ttl = ttl_config();
        ttl.batch_size = 2;
        ttl.cleanup_strategy = CleanupStrategyKind::Lfu;
        ttl.detailed_stats = true;
        let (tracker, clock) = tracker_with(ttl);

        let busy = Atom::primitive("busy");
        let quiet = Atom::primitive("quiet");
        let silent = Atom::primitive("silent");
        for atom in [&busy, &quiet, &silent] {
            tracker.track(atom, None);
        }
        for _ in 0..5 {
            tracker.record_access(&busy, None);
        }
        tracker.record_access(&quiet, None);

        clock.advance(Duration::from_millis(500));
        let result = tracker.perform_cleanup();
        assert_eq!(result.removed, 2);
        assert!(result.removed_ids.contains(&silent.id()));
        assert!(result.removed_ids.contains(&quiet.id()));
        assert!(tracker.is_tracked(&busy));

        let stats = tracker.stats();
        assert_eq!(stats.total_cleanups, 1);
        assert_eq!(stats.total_atoms_removed, 2);
        assert_eq!(stats.removed_by_role[&AtomRole::Primitive], 2);
        assert_eq!(stats.removed_by_strategy[&CleanupStrategyKind::Lfu], 2);
    }

    #[test]
    fn test_archive_and_restore() {
        let mut ttl = ttl_config();
        ttl.on_cleanup = OnCleanup::Archive;
        ttl.archive_storage.max_archived = 1;
        let (tracker, clock) = tracker_with(ttl);
        let first = Atom::primitive("first");
        let second = Atom::primitive("second");
        tracker.track(&first, None);
        clock.advance(Duration::from_millis(10));
        tracker.track(&second, None);

        clock.advance(Duration::from_millis(500));
        let result = tracker.cleanup_now(None);
        assert_eq!(result.removed, 2);
        assert_eq!(result.archived, 2);
        // Capacity one: the oldest archived entry was dropped.
        assert_eq!(tracker.archive_len(), 1);

        let kept = tracker.archived_atoms()[0].tracked.id();
        let dropped = if kept == first.id() { second.id() } else { first.id() };
        assert!(!tracker.restore_archived_atom(dropped));
        assert!(tracker.restore_archived_atom(kept));
        assert_eq!(tracker.archive_len(), 0);

        let restored = tracker.get_tracked_atom(kept).unwrap();
        assert_eq!(restored.status, AtomStatus::Active);
        assert!(tracker.get_stale_atoms().is_empty());
    }

    #[test]
    fn test_record_change_emits_event() {
        let (tracker, _) = tracker_with(ttl_config());
        let counter = Atom::primitive("counter");
        tracker.track(&counter, None);
        let mut events = tracker.subscribe();

        let (one, two) = (SerializedValue::Number(1.0), SerializedValue::Number(2.0));
        assert!(tracker.record_change(&counter, &one, &two));
        let null = SerializedValue::Null;
        assert!(!tracker.record_change(&Atom::primitive("other"), &null, &null));
        assert_eq!(tracker.get_tracked_atom(counter.id()).unwrap().change_count, 1);

        match events.try_recv() {
            Ok(TrackerEvent::Changed { name, new_value, .. }) => {
                assert_eq!(name, "counter");
                assert_eq!(new_value, SerializedValue::Number(2.0));
            }
            other => panic!("expected change event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_gc_collects_stale_atoms() {
        let (tracker, clock) = tracker_with(ttl_config());
        let counter = Atom::primitive("counter");
        tracker.track(&counter, None);
        assert!(tracker.start_gc());
        assert!(!tracker.start_gc());

        clock.advance(Duration::from_millis(500));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(!tracker.is_tracked(&counter));
        assert!(tracker.stats().total_cleanups >= 1);
        tracker.stop_gc();
        assert!(!tracker.is_gc_running());
    }

    #[tokio::test]
    async fn test_dispose_clears_and_refuses_tracking() {
        let (tracker, _) = tracker_with(ttl_config());
        tracker.track(&Atom::primitive("counter"), None);
        tracker.dispose().await.unwrap();

        assert!(tracker.is_disposed());
        assert!(tracker.is_empty());
        assert!(!tracker.track(&Atom::primitive("late"), None));
        assert!(!tracker.start_gc());

        let cleanups = tracker.stats().total_cleanups;
        assert_eq!(tracker.perform_cleanup().removed, 0);
        assert_eq!(tracker.cleanup_now(Some(5)).removed, 0);
        assert_eq!(tracker.stats().total_cleanups, cleanups);
    }
}
