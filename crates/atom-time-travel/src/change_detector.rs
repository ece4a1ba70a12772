//! Classifies atom changes and fans them out to listeners.
//!
//! Changes to untracked atoms are ignored. Inside [`ChangeDetector::batch`]
//! events are queued; when the outermost batch ends the queued events are
//! delivered in order and then summarized in a single [`ChangeBatch`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::atom::{Atom, AtomId};
use crate::clock::SharedClock;
use crate::disposal::{panic_message, Disposable, DisposableState, DisposalConfig};
use crate::error::Result;
use crate::tracker::AtomTracker;
use crate::value::{AtomValue, SerializedValue, ValueSerializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Deleted,
    /// The value kind changed, e.g. number to string
    Type,
    Value,
    Unknown,
}

impl ChangeKind {
    pub fn classify(old: &SerializedValue, new: &SerializedValue) -> Self {
        if old.is_undefined() && !new.is_undefined() {
            ChangeKind::Created
        } else if new.is_undefined() && !old.is_undefined() {
            ChangeKind::Deleted
        } else if old.kind() != new.kind() {
            ChangeKind::Type
        } else if old != new {
            ChangeKind::Value
        } else {
            ChangeKind::Unknown
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub atom_id: AtomId,
    pub atom_name: String,
    pub kind: ChangeKind,
    pub old_value: SerializedValue,
    pub new_value: SerializedValue,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub events: Vec<ChangeEvent>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub atom_ids: BTreeSet<AtomId>,
}

pub type ChangeListener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
pub type BatchListener = Arc<dyn Fn(&ChangeBatch) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

#[derive(Default)]
struct BatchState {
    depth: usize,
    started_at: Option<DateTime<Utc>>,
    queued: Vec<ChangeEvent>,
}

pub struct ChangeDetector {
    tracker: Arc<AtomTracker>,
    clock: SharedClock,
    serializer: ValueSerializer,
    watchers: RwLock<HashMap<AtomId, Vec<(WatchId, ChangeListener)>>>,
    listeners: RwLock<Vec<(WatchId, ChangeListener)>>,
    batch_listeners: RwLock<Vec<(WatchId, BatchListener)>>,
    batch: Mutex<BatchState>,
    next_id: AtomicU64,
    lifecycle: DisposableState,
}

impl ChangeDetector {
    pub fn new(tracker: Arc<AtomTracker>, clock: SharedClock) -> Self {
        Self {
            tracker,
            clock,
            serializer: ValueSerializer::default(),
            watchers: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            batch_listeners: RwLock::new(Vec::new()),
            batch: Mutex::new(BatchState::default()),
            next_id: AtomicU64::new(0),
            lifecycle: DisposableState::new("change-detector", DisposalConfig::default()),
        }
    }

    pub fn with_disposal(mut self, config: DisposalConfig) -> Self {
        self.lifecycle = DisposableState::new("change-detector", config);
        self
    }

    pub fn tracker(&self) -> &Arc<AtomTracker> {
        &self.tracker
    }

    /// Watch one atom
    pub fn watch(&self, atom: &Atom, listener: ChangeListener) -> WatchId {
        let id = self.next_watch_id();
        self.watchers
            .write()
            .entry(atom.id())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a watcher, per-atom or global, or a batch listener
    pub fn unwatch(&self, id: WatchId) -> bool {
        let mut removed = false;
        {
            let mut watchers = self.watchers.write();
            for list in watchers.values_mut() {
                let before = list.len();
                list.retain(|(existing, _)| *existing != id);
                removed |= list.len() != before;
            }
            watchers.retain(|_, list| !list.is_empty());
        }
        {
            let mut listeners = self.listeners.write();
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            removed |= listeners.len() != before;
        }
        let mut batch_listeners = self.batch_listeners.write();
        let before = batch_listeners.len();
        batch_listeners.retain(|(existing, _)| *existing != id);
        removed || batch_listeners.len() != before
    }

    /// Listen to every change
    pub fn on_change(&self, listener: ChangeListener) -> WatchId {
        let id = self.next_watch_id();
        self.listeners.write().push((id, listener));
        id
    }

    pub fn on_batch(&self, listener: BatchListener) -> WatchId {
        let id = self.next_watch_id();
        self.batch_listeners.write().push((id, listener));
        id
    }

    /// Record a change of a tracked atom. Returns the event if one was produced.
    pub fn record_change(
        &self,
        atom: &Atom,
        old_value: &AtomValue,
        new_value: &AtomValue,
    ) -> Option<ChangeEvent> {
        if self.lifecycle.is_disposed() {
            return None;
        }
        let old_value = self.serializer.serialize(old_value);
        let new_value = self.serializer.serialize(new_value);
        if !self.tracker.record_change(atom, &old_value, &new_value) {
            return None;
        }

        let event = ChangeEvent {
            atom_id: atom.id(),
            atom_name: self
                .tracker
                .get_tracked_atom(atom.id())
                .map(|tracked| tracked.name)
                .unwrap_or_else(|| atom.display_name()),
            kind: ChangeKind::classify(&old_value, &new_value),
            old_value,
            new_value,
            timestamp: self.clock.now(),
        };

        {
            let mut batch = self.batch.lock();
            if batch.depth > 0 {
                batch.queued.push(event.clone());
                return Some(event);
            }
        }
        self.deliver(&event);
        Some(event)
    }

    /// Run `f` with delivery suspended, then flush once.
    ///
    /// Nested batches join the outermost one.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        {
            let mut batch = self.batch.lock();
            if batch.depth == 0 {
                batch.started_at = Some(self.clock.now());
            }
            batch.depth += 1;
        }
        let _guard = BatchGuard { detector: self };
        f()
    }

    pub fn is_batching(&self) -> bool {
        self.batch.lock().depth > 0
    }

    fn end_batch(&self) {
        let (events, started_at) = {
            let mut batch = self.batch.lock();
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 {
                return;
            }
            (std::mem::take(&mut batch.queued), batch.started_at.take())
        };
        if events.is_empty() {
            return;
        }

        for event in &events {
            self.deliver(event);
        }

        let ended_at = self.clock.now();
        let summary = ChangeBatch {
            atom_ids: events.iter().map(|event| event.atom_id).collect(),
            started_at: started_at.unwrap_or(ended_at),
            ended_at,
            events,
        };
        let listeners: Vec<BatchListener> = self
            .batch_listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            isolate("batch", || listener(&summary));
        }
    }

    fn deliver(&self, event: &ChangeEvent) {
        let mut targets: Vec<ChangeListener> = self
            .watchers
            .read()
            .get(&event.atom_id)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        targets.extend(self.listeners.read().iter().map(|(_, l)| Arc::clone(l)));

        for listener in targets {
            isolate("change", || listener(event));
        }
    }

    fn next_watch_id(&self) -> WatchId {
        WatchId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

struct BatchGuard<'a> {
    detector: &'a ChangeDetector,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.detector.end_batch();
    }
}

fn isolate(kind: &str, call: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(call)) {
        warn!(listener = kind, error = %panic_message(&*payload), "listener panicked");
    }
}

#[async_trait]
impl Disposable for ChangeDetector {
    fn lifecycle(&self) -> &DisposableState {
        &self.lifecycle
    }

    async fn dispose(&self) -> Result<()> {
        self.lifecycle
            .dispose_with(async {
                self.watchers.write().clear();
                self.listeners.write().clear();
                self.batch_listeners.write().clear();
                *self.batch.lock() = BatchState::default();
                Ok(())
            })
            .await
    }
}
