//! Undo/redo facade over a host store.
//!
//! [`TimeTravel`] subscribes to the store, feeds tracked changes through the
//! change detector, captures snapshots into the history and restores them on
//! navigation. While a navigation is restoring values the time-travel flag is
//! raised, so the store notifications caused by the restoration never turn
//! into new captures.

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::atom::Atom;
use crate::change_detector::{ChangeBatch, ChangeDetector, WatchId};
use crate::clock::{self, SharedClock};
use crate::config::{TimeTravelConfig, TtlConfig};
use crate::disposal::{Disposable, DisposableState};
use crate::error::Result;
use crate::guard::FlagGuard;
use crate::history::{
    EvictReason, HistoryManager, HistoryQuery, HistoryStatistics, HistoryValidator,
    NavigationInfo,
};
use crate::leak::LeakDetector;
use crate::snapshot::{
    RestorationResult, Snapshot, SnapshotCreator, SnapshotCreatorConfig, SnapshotDiff,
    SnapshotRestorer, SnapshotValidator, ValidationResult,
};
use crate::store::{AtomStore, ListenerId, StoreChange};
use crate::tracker::{strategy_for, AtomTracker, CleanupStats, CleanupStrategy};

const INITIAL_LABEL: &str = "initial";

/// Aggregated counters of a [`TimeTravel`] instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeTravelStatistics {
    pub history: HistoryStatistics,
    pub tracked_atoms: usize,
    pub archived_atoms: usize,
    pub snapshots_created: u64,
    pub cleanup: CleanupStats,
    pub is_time_traveling: bool,
}

/// Builder for [`TimeTravel`]
#[derive(Default)]
pub struct TimeTravelBuilder {
    config: TimeTravelConfig,
    clock: Option<SharedClock>,
    leak_detector: Option<Arc<LeakDetector>>,
    atoms: Vec<Atom>,
    strategy: Option<Arc<dyn CleanupStrategy>>,
    start_gc: bool,
}

impl TimeTravelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: TimeTravelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_history(mut self, max_history: usize) -> Self {
        self.config.max_history = max_history;
        self
    }

    pub fn with_auto_capture(mut self, enabled: bool) -> Self {
        self.config.auto_capture = enabled;
        self
    }

    pub fn with_ttl_config(mut self, ttl: TtlConfig) -> Self {
        self.config.tracker.ttl = ttl;
        self
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Register every component with `detector` until it is disposed
    pub fn with_leak_detector(mut self, detector: Arc<LeakDetector>) -> Self {
        self.leak_detector = Some(detector);
        self
    }

    /// Atoms tracked as soon as the instance is built
    pub fn with_atoms(mut self, atoms: impl IntoIterator<Item = Atom>) -> Self {
        self.atoms.extend(atoms);
        self
    }

    /// Replace the strategy named by the TTL config
    pub fn with_cleanup_strategy(mut self, strategy: Arc<dyn CleanupStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Start the background sweep; needs a running tokio runtime
    pub fn with_background_gc(mut self, enabled: bool) -> Self {
        self.start_gc = enabled;
        self
    }

    pub fn build(self, store: Arc<dyn AtomStore>) -> Result<TimeTravel> {
        self.config.validate()?;

        let config = self.config;
        let clock = self.clock.unwrap_or_else(clock::system_clock);
        let strategy = self
            .strategy
            .unwrap_or_else(|| strategy_for(config.tracker.ttl.cleanup_strategy));

        let tracker = Arc::new(
            AtomTracker::with_strategy(config.tracker.clone(), Arc::clone(&clock), strategy)
                .with_disposal(config.disposal.clone()),
        );
        let detector = Arc::new(
            ChangeDetector::new(Arc::clone(&tracker), Arc::clone(&clock))
                .with_disposal(config.disposal.clone()),
        );
        let creator = Arc::new(
            SnapshotCreator::new(
                Arc::clone(&store),
                Arc::clone(&tracker),
                Arc::clone(&clock),
                SnapshotCreatorConfig {
                    exclude_atoms: config.exclude_atoms.iter().cloned().collect(),
                    ..Default::default()
                },
            )
            .with_disposal(config.disposal.clone()),
        );
        let restorer = Arc::new(
            SnapshotRestorer::new(Arc::clone(&store), Arc::clone(&clock), config.restorer.clone())
                .with_disposal(config.disposal.clone()),
        );

        let mut history = HistoryManager::new(config.max_history);
        history.on_evict(Arc::new(|snapshot: &Arc<Snapshot>, reason: EvictReason| {
            debug!(snapshot = %snapshot.id(), ?reason, "history entry evicted");
        }));

        let lifecycle = DisposableState::new("time-travel", config.disposal.clone());
        lifecycle.add_child(Arc::clone(&restorer) as Arc<dyn Disposable>);
        lifecycle.add_child(Arc::clone(&creator) as Arc<dyn Disposable>);
        lifecycle.add_child(Arc::clone(&detector) as Arc<dyn Disposable>);
        lifecycle.add_child(Arc::clone(&tracker) as Arc<dyn Disposable>);

        if let Some(leaks) = &self.leak_detector {
            lifecycle.register_with(leaks);
            tracker.lifecycle().register_with(leaks);
            detector.lifecycle().register_with(leaks);
            creator.lifecycle().register_with(leaks);
            restorer.lifecycle().register_with(leaks);
        }

        let inner = Arc::new(TimeTravelInner {
            validator: HistoryValidator::new(SnapshotValidator::new(
                Arc::clone(&clock),
                Duration::from_secs(60),
            )),
            config,
            store,
            tracker,
            detector,
            creator,
            restorer,
            history: Mutex::new(history),
            last_restoration: Mutex::new(None),
            time_traveling: AtomicBool::new(false),
            transaction_depth: AtomicUsize::new(0),
            store_listener: Mutex::new(None),
            batch_listener: Mutex::new(None),
            leak_detector: self.leak_detector,
            lifecycle,
        });
        TimeTravelInner::connect(&inner);

        let time_travel = TimeTravel { inner };
        let mut tracked_any = false;
        for atom in &self.atoms {
            tracked_any |= time_travel.inner.tracker.track(atom, None);
        }
        if tracked_any && time_travel.inner.config.auto_capture {
            time_travel.inner.capture_inner(Some(INITIAL_LABEL), false);
        }
        if self.start_gc {
            time_travel.inner.tracker.start_gc();
        }

        info!(
            max_history = time_travel.inner.config.max_history,
            auto_capture = time_travel.inner.config.auto_capture,
            atoms = time_travel.inner.tracker.len(),
            "time travel ready"
        );
        Ok(time_travel)
    }
}

/// Undo/redo over the tracked atoms of a store
pub struct TimeTravel {
    inner: Arc<TimeTravelInner>,
}

struct TimeTravelInner {
    config: TimeTravelConfig,
    store: Arc<dyn AtomStore>,
    tracker: Arc<AtomTracker>,
    detector: Arc<ChangeDetector>,
    creator: Arc<SnapshotCreator>,
    restorer: Arc<SnapshotRestorer>,
    history: Mutex<HistoryManager>,
    validator: HistoryValidator,
    last_restoration: Mutex<Option<RestorationResult>>,
    time_traveling: AtomicBool,
    transaction_depth: AtomicUsize,
    store_listener: Mutex<Option<ListenerId>>,
    batch_listener: Mutex<Option<WatchId>>,
    leak_detector: Option<Arc<LeakDetector>>,
    lifecycle: DisposableState,
}

impl TimeTravel {
    pub fn builder() -> TimeTravelBuilder {
        TimeTravelBuilder::new()
    }

    pub fn new(store: Arc<dyn AtomStore>, config: TimeTravelConfig) -> Result<Self> {
        TimeTravelBuilder::new().with_config(config).build(store)
    }

    pub fn config(&self) -> &TimeTravelConfig {
        &self.inner.config
    }

    /// Capture the current state of every tracked atom.
    ///
    /// Returns `None` while time-traveling, after disposal, or when no
    /// tracked atom has a value.
    pub fn capture(&self, label: Option<&str>) -> Option<Arc<Snapshot>> {
        self.inner.capture_inner(label, false)
    }

    pub fn undo(&self) -> bool {
        let target = self.inner.history.lock().undo_target();
        match target {
            Some(index) => self.inner.travel_to(index, "undo"),
            None => false,
        }
    }

    pub fn redo(&self) -> bool {
        let target = self.inner.history.lock().redo_target();
        match target {
            Some(index) => self.inner.travel_to(index, "redo"),
            None => false,
        }
    }

    /// Restore the snapshot at `index` directly
    pub fn jump_to(&self, index: usize) -> bool {
        let len = self.inner.history.lock().len();
        if index >= len {
            debug!(index, len, "jump target out of range");
            return false;
        }
        self.inner.travel_to(index, "jump")
    }

    pub fn can_undo(&self) -> bool {
        self.inner.history.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.inner.history.lock().can_redo()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.history.lock().current_index()
    }

    pub fn navigation_info(&self) -> NavigationInfo {
        self.inner.history.lock().navigation_info()
    }

    /// Oldest first
    pub fn get_history(&self) -> Vec<Arc<Snapshot>> {
        self.inner.history.lock().snapshots()
    }

    pub fn get_snapshot(&self, id: Uuid) -> Option<Arc<Snapshot>> {
        self.inner
            .history
            .lock()
            .find_by_id(id)
            .map(|(_, snapshot)| snapshot)
    }

    pub fn clear_history(&self) {
        if self.inner.lifecycle.is_disposed() {
            return;
        }
        self.inner.history.lock().clear();
        debug!("history cleared");
    }

    /// Change the history capacity, dropping the oldest entries if needed.
    ///
    /// Returns how many entries were dropped; always zero once disposed.
    pub fn set_max_history(&self, max_history: usize) -> usize {
        if self.inner.lifecycle.is_disposed() {
            return 0;
        }
        self.inner.history.lock().resize(max_history).len()
    }

    pub fn validate_history(&self) -> ValidationResult {
        let history = self.get_history();
        self.inner.validator.validate(&history)
    }

    pub fn search(&self, query: &HistoryQuery) -> Vec<usize> {
        let history = self.get_history();
        self.inner.validator.search(&history, query)
    }

    /// Differences between the snapshots at two history positions
    pub fn diff(&self, from: usize, to: usize) -> Option<SnapshotDiff> {
        let (from, to) = {
            let history = self.inner.history.lock();
            (history.get(from)?, history.get(to)?)
        };
        Some(self.inner.validator.diff(&from, &to))
    }

    /// Start tracking `atom`.
    ///
    /// With auto-capture on, the first tracked atom also seeds the history
    /// with an initial snapshot.
    pub fn track(&self, atom: &Atom) -> bool {
        if !self.inner.tracker.track(atom, None) {
            return false;
        }
        if self.inner.config.auto_capture && self.inner.history.lock().is_empty() {
            self.inner.capture_inner(Some(INITIAL_LABEL), false);
        }
        true
    }

    pub fn untrack(&self, atom: &Atom) -> bool {
        self.inner.tracker.untrack(atom)
    }

    /// Run `f` as one unit: its changes are delivered as a single batch and
    /// produce at most one snapshot, labelled `label`.
    ///
    /// Nested transactions join the outermost one.
    pub fn transaction<R>(&self, label: &str, f: impl FnOnce() -> R) -> R {
        let (result, outermost) = {
            let _depth = DepthGuard::enter(&self.inner.transaction_depth);
            let result = self.inner.detector.batch(f);
            (result, self.inner.transaction_depth.load(Ordering::Acquire) == 1)
        };
        if outermost {
            let require_novelty = !self.inner.config.skip_state_check;
            self.inner.capture_inner(Some(label), require_novelty);
        }
        result
    }

    pub fn is_time_traveling(&self) -> bool {
        self.inner.time_traveling.load(Ordering::Acquire)
    }

    /// Outcome of the most recent restoration, successful or not
    pub fn last_restoration(&self) -> Option<RestorationResult> {
        self.inner.last_restoration.lock().clone()
    }

    pub fn statistics(&self) -> TimeTravelStatistics {
        TimeTravelStatistics {
            history: self.inner.history.lock().statistics(),
            tracked_atoms: self.inner.tracker.len(),
            archived_atoms: self.inner.tracker.archive_len(),
            snapshots_created: self.inner.creator.created_count(),
            cleanup: self.inner.tracker.stats(),
            is_time_traveling: self.is_time_traveling(),
        }
    }

    pub fn atom_tracker(&self) -> &Arc<AtomTracker> {
        &self.inner.tracker
    }

    pub fn change_detector(&self) -> &Arc<ChangeDetector> {
        &self.inner.detector
    }

    pub fn snapshot_creator(&self) -> &Arc<SnapshotCreator> {
        &self.inner.creator
    }

    pub fn snapshot_restorer(&self) -> &Arc<SnapshotRestorer> {
        &self.inner.restorer
    }

    pub fn history_validator(&self) -> &HistoryValidator {
        &self.inner.validator
    }

    /// Direct access to the history.
    ///
    /// Navigation methods take the same lock; release the guard before
    /// calling them.
    pub fn history_manager(&self) -> MutexGuard<'_, HistoryManager> {
        self.inner.history.lock()
    }

    pub fn leak_detector(&self) -> Option<&Arc<LeakDetector>> {
        self.inner.leak_detector.as_ref()
    }
}

impl TimeTravelInner {
    fn connect(this: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let listener = this.store.subscribe(Arc::new(move |change: &StoreChange| {
            if let Some(inner) = weak.upgrade() {
                inner.on_store_change(change);
            }
        }));
        *this.store_listener.lock() = Some(listener);

        let weak: Weak<Self> = Arc::downgrade(this);
        let batch = this.detector.on_batch(Arc::new(move |batch: &ChangeBatch| {
            if let Some(inner) = weak.upgrade() {
                inner.on_batch_end(batch);
            }
        }));
        *this.batch_listener.lock() = Some(batch);
    }

    fn on_store_change(&self, change: &StoreChange) {
        if self.lifecycle.is_disposed() || !self.tracker.is_tracked(&change.atom) {
            return;
        }
        let Some(event) = self
            .detector
            .record_change(&change.atom, &change.old_value, &change.new_value)
        else {
            return;
        };

        if self.config.auto_capture
            && !self.detector.is_batching()
            && self.transaction_depth.load(Ordering::Acquire) == 0
        {
            let label = format!("set {}", event.atom_name);
            self.capture_inner(Some(&label), !self.config.skip_state_check);
        }
    }

    fn on_batch_end(&self, batch: &ChangeBatch) {
        if !self.config.auto_capture
            || self.lifecycle.is_disposed()
            || self.transaction_depth.load(Ordering::Acquire) > 0
        {
            return;
        }
        let label = format!("batch of {} changes", batch.events.len());
        self.capture_inner(Some(&label), !self.config.skip_state_check);
    }

    fn capture_inner(&self, label: Option<&str>, require_novelty: bool) -> Option<Arc<Snapshot>> {
        // Writes made while restoring, by navigation or through the restorer
        // accessor, never become history entries.
        if self.lifecycle.is_disposed()
            || self.time_traveling.load(Ordering::Acquire)
            || self.restorer.is_restoring()
        {
            return None;
        }

        let created = self.creator.create_with_result(label);
        let Some(snapshot) = created.snapshot else {
            debug!(label, error = ?created.error, "nothing captured");
            return None;
        };
        let snapshot = Arc::new(snapshot);

        let mut history = self.history.lock();
        if require_novelty {
            if let Some(current) = history.current() {
                if current.same_state_as(&snapshot) {
                    debug!(label, "state unchanged since the current snapshot");
                    return None;
                }
            }
        }
        history.push(Arc::clone(&snapshot));
        debug!(
            snapshot = %snapshot.id(),
            label,
            index = ?history.current_index(),
            "snapshot captured"
        );
        Some(snapshot)
    }

    fn travel_to(&self, target: usize, operation: &'static str) -> bool {
        if self.lifecycle.is_disposed() {
            return false;
        }
        let Some(_traveling) = FlagGuard::acquire(&self.time_traveling) else {
            warn!(operation, "navigation rejected: already time-traveling");
            return false;
        };
        let Some(snapshot) = self.history.lock().get(target) else {
            return false;
        };

        let result = self.restorer.restore(&snapshot);
        let success = result.success;
        if !success {
            warn!(
                operation,
                index = target,
                snapshot = %snapshot.id(),
                error = ?result.error,
                rolled_back = result.rolled_back,
                rollback_failures = result.rollback_failures.len(),
                "time travel failed"
            );
        }
        let restored = result.restored.len();
        *self.last_restoration.lock() = Some(result);
        if !success {
            return false;
        }

        if let Err(error) = self.history.lock().set_current(target) {
            warn!(operation, %error, "history changed during time travel");
            return false;
        }
        debug!(operation, index = target, restored, "time traveled");
        true
    }

    fn disconnect(&self) {
        if let Some(id) = self.store_listener.lock().take() {
            self.store.unsubscribe(id);
        }
        if let Some(id) = self.batch_listener.lock().take() {
            self.detector.unwatch(id);
        }
    }
}

/// Counts open transactions; leaving the scope closes one even on unwind
struct DepthGuard<'a> {
    depth: &'a AtomicUsize,
}

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a AtomicUsize) -> Self {
        depth.fetch_add(1, Ordering::AcqRel);
        Self { depth }
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

#[async_trait]
impl Disposable for TimeTravel {
    fn lifecycle(&self) -> &DisposableState {
        &self.inner.lifecycle
    }

    async fn dispose(&self) -> Result<()> {
        let inner = &self.inner;
        inner
            .lifecycle
            .dispose_with(async {
                inner.disconnect();
                inner.history.lock().clear();
                *inner.last_restoration.lock() = None;
                info!("time travel disposed");
                Ok(())
            })
            .await
    }
}

impl Drop for TimeTravel {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::value::AtomValue;

    fn counter_setup(auto_capture: bool) -> (Arc<InMemoryStore>, Atom, TimeTravel) {
        let store = Arc::new(InMemoryStore::new());
        let counter = Atom::primitive("counter");
        store.set(&counter, AtomValue::from(0)).unwrap();
        let tt = TimeTravel::builder()
            .with_auto_capture(auto_capture)
            .build(store.clone())
            .unwrap();
        assert!(tt.track(&counter));
        (store, counter, tt)
    }

    fn value(store: &InMemoryStore, atom: &Atom) -> Option<f64> {
        store.get(atom).ok().and_then(|v| v.as_f64())
    }

    #[test]
    fn test_counter_undo_redo() {
        let (store, counter, tt) = counter_setup(true);
        store.set(&counter, AtomValue::from(5)).unwrap();
        store.set(&counter, AtomValue::from(7)).unwrap();
        assert_eq!(tt.get_history().len(), 3);

        assert!(tt.undo());
        assert_eq!(value(&store, &counter), Some(5.0));
        assert!(tt.can_redo());

        assert!(tt.undo());
        assert_eq!(value(&store, &counter), Some(0.0));
        assert!(!tt.can_undo());
        assert!(!tt.undo());

        assert!(tt.redo());
        assert!(tt.redo());
        assert_eq!(value(&store, &counter), Some(7.0));
        assert!(!tt.redo());

        // Restorations never fed back into the history
        assert_eq!(tt.get_history().len(), 3);
    }

    #[test]
    fn test_capture_after_undo_discards_redo_tail() {
        let (store, counter, tt) = counter_setup(true);
        store.set(&counter, AtomValue::from(1)).unwrap();
        store.set(&counter, AtomValue::from(2)).unwrap();
        assert!(tt.undo());

        store.set(&counter, AtomValue::from(9)).unwrap();
        assert!(!tt.can_redo());
        let labels: Vec<String> = tt
            .get_history()
            .iter()
            .map(|s| s.action().unwrap_or_default().to_string())
            .collect();
        assert_eq!(labels, vec!["initial", "set counter", "set counter"]);
        assert_eq!(tt.statistics().history.truncated, 1);
    }

    #[test]
    fn test_jump_to() {
        let (store, counter, tt) = counter_setup(false);
        for n in [1, 2, 3] {
            store.set(&counter, AtomValue::from(n)).unwrap();
            tt.capture(Some(format!("n={n}").as_str()));
        }

        assert!(tt.jump_to(0));
        assert_eq!(value(&store, &counter), Some(1.0));
        assert_eq!(tt.current_index(), Some(0));

        assert!(!tt.jump_to(3));
        assert_eq!(tt.current_index(), Some(0));
        assert_eq!(value(&store, &counter), Some(1.0));

        assert!(tt.jump_to(0));
        assert_eq!(tt.current_index(), Some(0));
    }

    #[test]
    fn test_manual_capture_without_auto_capture() {
        let (store, counter, tt) = counter_setup(false);
        assert!(tt.get_history().is_empty());
        store.set(&counter, AtomValue::from(4)).unwrap();
        assert!(tt.get_history().is_empty());

        assert!(tt.capture(Some("first")).is_some());
        // Explicit captures do not require a change
        assert!(tt.capture(Some("again")).is_some());
        assert_eq!(tt.get_history().len(), 2);
    }

    #[test]
    fn test_transaction_produces_one_capture() {
        let store = Arc::new(InMemoryStore::new());
        let a = Atom::primitive("a");
        let b = Atom::primitive("b");
        store.set(&a, AtomValue::from(0)).unwrap();
        store.set(&b, AtomValue::from(0)).unwrap();
        let tt = TimeTravel::builder()
            .with_auto_capture(true)
            .with_atoms([a.clone(), b.clone()])
            .build(store.clone())
            .unwrap();
        assert_eq!(tt.get_history().len(), 1);

        tt.transaction("move both", || {
            store.set(&a, AtomValue::from(1)).unwrap();
            store.set(&b, AtomValue::from(2)).unwrap();
        });

        let history = tt.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action(), Some("move both"));

        assert!(tt.undo());
        assert_eq!(value(&store, &a), Some(0.0));
        assert_eq!(value(&store, &b), Some(0.0));
    }

    #[test]
    fn test_batch_auto_captures_once() {
        let (store, counter, tt) = counter_setup(true);
        tt.change_detector().batch(|| {
            store.set(&counter, AtomValue::from(1)).unwrap();
            store.set(&counter, AtomValue::from(2)).unwrap();
        });
        let history = tt.get_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].action(), Some("batch of 2 changes"));
    }

    #[test]
    fn test_failed_restore_keeps_cursor() {
        let (store, counter, tt) = counter_setup(true);
        store.set(&counter, AtomValue::from(5)).unwrap();

        store.fail_writes(&counter);
        assert!(!tt.undo());
        assert_eq!(tt.current_index(), Some(1));
        assert!(!tt.is_time_traveling());

        let last = tt.last_restoration().unwrap();
        assert!(!last.success);
        assert!(last.error.is_some());

        store.clear_failures();
        assert!(tt.undo());
        assert_eq!(value(&store, &counter), Some(0.0));
    }

    #[test]
    fn test_untracked_atoms_are_ignored() {
        let (store, _counter, tt) = counter_setup(true);
        let other = Atom::primitive("other");
        store.set(&other, AtomValue::from(1)).unwrap();
        assert_eq!(tt.get_history().len(), 1);
        assert!(tt.get_history()[0].entry("other").is_none());
    }

    #[test]
    fn test_excluded_atoms_are_not_captured() {
        let store = Arc::new(InMemoryStore::new());
        let visible = Atom::primitive("visible");
        let secret = Atom::primitive("secret");
        store.set(&visible, AtomValue::from(1)).unwrap();
        store.set(&secret, AtomValue::from(2)).unwrap();

        let config = TimeTravelConfig {
            exclude_atoms: vec!["secret".to_string()],
            ..Default::default()
        };
        let tt = TimeTravel::builder()
            .with_config(config)
            .with_atoms([visible, secret])
            .build(store)
            .unwrap();

        let snapshot = tt.capture(None).unwrap();
        assert!(snapshot.entry("visible").is_some());
        assert!(snapshot.entry("secret").is_none());
    }

    #[test]
    fn test_search_and_diff() {
        let (store, counter, tt) = counter_setup(true);
        store.set(&counter, AtomValue::from(3)).unwrap();

        assert_eq!(tt.search(&HistoryQuery::action("set")), vec![1]);
        let diff = tt.diff(0, 1).unwrap();
        assert_eq!(diff.changed_atoms(), vec!["counter"]);
        assert!(tt.diff(0, 5).is_none());
        assert!(tt.validate_history().is_valid);
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let store = Arc::new(InMemoryStore::new());
        let result = TimeTravel::builder().with_max_history(0).build(store);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_disconnects() {
        let (store, counter, tt) = counter_setup(true);
        assert_eq!(store.listener_count(), 1);
        let capacity = tt.history_manager().max_size();

        tt.dispose().await.unwrap();
        tt.dispose().await.unwrap();

        assert!(tt.is_disposed());
        assert_eq!(store.listener_count(), 0);
        assert!(tt.capture(None).is_none());
        assert!(!tt.track(&counter));
        assert!(!tt.undo());
        assert!(tt.get_history().is_empty());
        assert!(tt.atom_tracker().is_disposed());

        assert_eq!(tt.set_max_history(1), 0);
        assert_eq!(tt.history_manager().max_size(), capacity);
    }

    #[tokio::test]
    async fn test_leak_detector_registration() {
        let leaks = Arc::new(LeakDetector::new(Default::default()));
        let store = Arc::new(InMemoryStore::new());
        let tt = TimeTravel::builder()
            .with_leak_detector(Arc::clone(&leaks))
            .build(store)
            .unwrap();
        assert_eq!(leaks.tracked_count(), 5);

        tt.dispose().await.unwrap();
        assert_eq!(leaks.tracked_count(), 0);
    }
}
