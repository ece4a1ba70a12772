//! # Atom Time-Travel
//!
//! Undo/redo and state inspection for atom-based reactive stores. The engine
//! watches a host store through the [`AtomStore`] trait, records immutable
//! snapshots of the atoms it tracks and restores them on request.
//!
//! ## Core Concepts
//!
//! - **Atom Tracking**: Per-atom access and change counters, TTL-driven
//!   `Active`/`Idle`/`Stale` status and pluggable cleanup strategies
//!   (LRU, LFU, FIFO, time-based) with an optional archive.
//! - **Change Detection**: Classified change events with per-atom watchers,
//!   global listeners and batching.
//! - **Snapshots**: Point-in-time captures with a closed set of serialized
//!   value tags, rule-based validation and transactional restoration with
//!   checkpoints.
//! - **History**: A bounded stack of snapshots with a cursor, navigation
//!   helpers, sequence validation, search and diffs.
//! - **Disposal**: Idempotent, child-first teardown for every component, and
//!   an injectable leak detector.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use atom_time_travel::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let store = Arc::new(InMemoryStore::new());
//!     let counter = Atom::primitive("counter");
//!     store.set(&counter, AtomValue::from(0)).ok();
//!
//!     let time_travel = TimeTravel::builder()
//!         .with_max_history(100)
//!         .with_auto_capture(true)
//!         .with_atoms([counter.clone()])
//!         .build(store.clone())?;
//!
//!     store.set(&counter, AtomValue::from(5)).ok();
//!     store.set(&counter, AtomValue::from(7)).ok();
//!
//!     time_travel.undo();
//!     assert_eq!(store.get(&counter).ok().and_then(|v| v.as_f64()), Some(5.0));
//!
//!     time_travel.dispose().await?;
//!     Ok(())
//! }
//! ```

pub mod atom;
pub mod change_detector;
pub mod clock;
pub mod config;
pub mod disposal;
pub mod error;
mod guard;
pub mod history;
pub mod leak;
pub mod snapshot;
pub mod store;
pub mod time_travel;
pub mod tracker;
pub mod value;

// Re-export key types for convenience
pub use error::{Result, TimeTravelError};

pub use atom::{Atom, AtomId, AtomRole};

pub use value::{AtomValue, OpaqueKind, SerializedValue, SharedValue, ValueKind, ValueSerializer};

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};

pub use config::{
    ArchiveConfig, CleanupStrategyKind, OnCleanup, TimeTravelConfig, TrackerConfig, TtlConfig,
};

pub use store::{AtomStore, InMemoryStore, ListenerId, StoreChange, StoreError, StoreListener};

pub use tracker::{
    AtomStatus, AtomTracker, CleanupResult, CleanupStats, CleanupStrategy, SubscriberToken,
    TrackedAtom, TrackerEvent,
};

pub use change_detector::{ChangeBatch, ChangeDetector, ChangeEvent, ChangeKind, WatchId};

pub use snapshot::{
    CreationResult, RestorationResult, Snapshot, SnapshotBuilder, SnapshotCreator, SnapshotDiff,
    SnapshotEntry, SnapshotMetadata, SnapshotRestorer, SnapshotValidator, ValidationResult,
};

pub use history::{
    HistoryManager, HistoryNavigator, HistoryQuery, HistoryStack, HistoryStatistics,
    HistoryValidator, NavigationInfo,
};

pub use disposal::{Disposable, DisposableState, DisposalConfig};

pub use leak::{LeakDetector, LeakDetectorConfig, LeakReport};

pub use time_travel::{TimeTravel, TimeTravelBuilder, TimeTravelStatistics};
