use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Snapshot, SnapshotEntry};
use crate::clock::SharedClock;
use crate::disposal::{Disposable, DisposableState, DisposalConfig};
use crate::error::Result;
use crate::store::{AtomStore, StoreError};
use crate::tracker::AtomTracker;
use crate::value::ValueSerializer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotCreatorConfig {
    /// Atom names never captured
    pub exclude_atoms: HashSet<String>,
    /// Nesting depth beyond which values become placeholders
    pub max_depth: usize,
}

impl Default for SnapshotCreatorConfig {
    fn default() -> Self {
        Self {
            exclude_atoms: HashSet::new(),
            max_depth: 64,
        }
    }
}

/// A tracked atom whose value could not be read
#[derive(Debug, Clone, PartialEq)]
pub struct ReadFailure {
    pub atom_name: String,
    pub error: StoreError,
}

#[derive(Debug, Clone)]
pub struct CreationResult {
    pub success: bool,
    pub snapshot: Option<Snapshot>,
    pub error: Option<String>,
    pub read_errors: Vec<ReadFailure>,
    pub duration: Duration,
}

/// Captures the values of all tracked atoms
pub struct SnapshotCreator {
    store: Arc<dyn AtomStore>,
    tracker: Arc<AtomTracker>,
    clock: SharedClock,
    config: SnapshotCreatorConfig,
    serializer: ValueSerializer,
    created: AtomicU64,
    lifecycle: DisposableState,
}

impl SnapshotCreator {
    pub fn new(
        store: Arc<dyn AtomStore>,
        tracker: Arc<AtomTracker>,
        clock: SharedClock,
        config: SnapshotCreatorConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            clock,
            serializer: ValueSerializer::new(config.max_depth),
            config,
            created: AtomicU64::new(0),
            lifecycle: DisposableState::new("snapshot-creator", DisposalConfig::default()),
        }
    }

    pub fn with_disposal(mut self, config: DisposalConfig) -> Self {
        self.lifecycle = DisposableState::new("snapshot-creator", config);
        self
    }

    pub fn config(&self) -> &SnapshotCreatorConfig {
        &self.config
    }

    /// Number of snapshots created so far
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn create(&self, action: Option<&str>) -> Option<Snapshot> {
        self.create_with_result(action).snapshot
    }

    pub fn create_with_result(&self, action: Option<&str>) -> CreationResult {
        let started = Instant::now();
        if self.lifecycle.is_disposed() {
            return CreationResult {
                success: false,
                snapshot: None,
                error: Some("snapshot creator has been disposed".to_string()),
                read_errors: Vec::new(),
                duration: started.elapsed(),
            };
        }

        let mut builder = Snapshot::builder()
            .new_id()
            .timestamp(self.clock.now())
            .maybe_action(action);
        let mut captured = HashSet::new();
        let mut read_errors = Vec::new();

        for tracked in self.tracker.tracked_atoms() {
            if self.config.exclude_atoms.contains(&tracked.name) {
                continue;
            }

            let value = match self.store.get(&tracked.atom) {
                Ok(value) => value,
                // Tracked but never written
                Err(StoreError::Missing { .. }) => continue,
                Err(error) => {
                    warn!(atom = %tracked.name, %error, "skipping atom that failed to read");
                    read_errors.push(ReadFailure {
                        atom_name: tracked.name.clone(),
                        error,
                    });
                    continue;
                }
            };

            // Names are labels, not identities; keep both entries on collision.
            let key = if captured.contains(&tracked.name) {
                format!("{}#{}", tracked.name, tracked.id())
            } else {
                tracked.name.clone()
            };
            captured.insert(key.clone());

            builder = builder.entry_with_key(
                key,
                SnapshotEntry {
                    atom_id: tracked.id(),
                    name: tracked.name,
                    role: tracked.atom.role(),
                    value: self.serializer.serialize(&value),
                },
            );
        }

        if captured.is_empty() {
            return CreationResult {
                success: false,
                snapshot: None,
                error: Some("no tracked atom has a value to capture".to_string()),
                read_errors,
                duration: started.elapsed(),
            };
        }

        match builder.build() {
            Ok(snapshot) => {
                self.created.fetch_add(1, Ordering::Relaxed);
                debug!(
                    snapshot = %snapshot.id(),
                    atoms = snapshot.atom_count(),
                    action = ?snapshot.action(),
                    "snapshot created"
                );
                CreationResult {
                    success: true,
                    snapshot: Some(snapshot),
                    error: None,
                    read_errors,
                    duration: started.elapsed(),
                }
            }
            Err(error) => CreationResult {
                success: false,
                snapshot: None,
                error: Some(error.to_string()),
                read_errors,
                duration: started.elapsed(),
            },
        }
    }
}

#[async_trait]
impl Disposable for SnapshotCreator {
    fn lifecycle(&self) -> &DisposableState {
        &self.lifecycle
    }

    async fn dispose(&self) -> Result<()> {
        self.lifecycle.dispose_with(async { Ok(()) }).await
    }
}
