//! Writes snapshot values back into the store.
//!
//! Every successful write records the atom's prior value in a
//! [`Checkpoint`]. If a later write fails, the checkpoint is replayed in
//! reverse so the store is not left half-restored; atoms that cannot be
//! written back are reported in [`RestorationResult::rollback_failures`]. Successful
//! restorations keep their checkpoint for a later [`SnapshotRestorer::rollback`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Snapshot;
use crate::atom::{Atom, AtomRole};
use crate::clock::SharedClock;
use crate::disposal::{Disposable, DisposableState, DisposalConfig};
use crate::error::{Result, TimeTravelError};
use crate::guard::FlagGuard;
use crate::store::{AtomStore, StoreError};
use crate::value::{AtomValue, ValueSerializer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorerConfig {
    /// Roll back already-applied writes when one fails
    pub transactional: bool,
    pub max_checkpoints: usize,
    /// Leave atoms alone whose current value already matches
    pub skip_unchanged: bool,
}

impl Default for RestorerConfig {
    fn default() -> Self {
        Self {
            transactional: true,
            max_checkpoints: 10,
            skip_unchanged: true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RestoreError {
    #[error("A restoration is already in progress")]
    AlreadyRestoring,

    #[error("Restorer has been disposed")]
    Disposed,

    #[error("Writing {atom} failed: {source}")]
    Write { atom: String, source: StoreError },

    #[error("Rollback left {} atom(s) unrestored: {}", failures.len(), failures.join("; "))]
    RollbackIncomplete { failures: Vec<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ReadOnly,
    /// The value holds a circular or unserializable placeholder
    Placeholder,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub name: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestorationResult {
    pub success: bool,
    pub snapshot_id: Uuid,
    pub restored: Vec<String>,
    pub skipped: Vec<SkippedEntry>,
    pub error: Option<RestoreError>,
    /// True only when every already-applied write was undone
    pub rolled_back: bool,
    /// Atoms whose prior value could not be written back, with the store error
    pub rollback_failures: Vec<String>,
    /// Checkpoint retained for a later rollback
    pub checkpoint_id: Option<Uuid>,
    pub duration: Duration,
}

impl RestorationResult {
    fn rejected(snapshot_id: Uuid, error: RestoreError) -> Self {
        Self {
            success: false,
            snapshot_id,
            restored: Vec::new(),
            skipped: Vec::new(),
            error: Some(error),
            rolled_back: false,
            rollback_failures: Vec::new(),
            checkpoint_id: None,
            duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
struct PriorValue {
    atom: Atom,
    /// `None` if the atom had no value yet
    value: Option<AtomValue>,
}

/// Prior values of the atoms touched by one restoration
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub snapshot_id: Option<Uuid>,
    prior: Vec<PriorValue>,
}

impl Checkpoint {
    fn new(snapshot_id: Option<Uuid>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at,
            snapshot_id,
            prior: Vec::new(),
        }
    }

    fn record(&mut self, atom: Atom, value: Option<AtomValue>) {
        self.prior.push(PriorValue { atom, value });
    }

    pub fn len(&self) -> usize {
        self.prior.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prior.is_empty()
    }
}

pub struct SnapshotRestorer {
    store: Arc<dyn AtomStore>,
    clock: SharedClock,
    config: RestorerConfig,
    serializer: ValueSerializer,
    checkpoints: Mutex<VecDeque<Checkpoint>>,
    active_restoration: AtomicBool,
    lifecycle: DisposableState,
}

impl SnapshotRestorer {
    pub fn new(store: Arc<dyn AtomStore>, clock: SharedClock, config: RestorerConfig) -> Self {
        Self {
            store,
            clock,
            config,
            serializer: ValueSerializer::default(),
            checkpoints: Mutex::new(VecDeque::new()),
            active_restoration: AtomicBool::new(false),
            lifecycle: DisposableState::new("snapshot-restorer", DisposalConfig::default()),
        }
    }

    pub fn with_disposal(mut self, config: DisposalConfig) -> Self {
        self.lifecycle = DisposableState::new("snapshot-restorer", config);
        self
    }

    pub fn config(&self) -> &RestorerConfig {
        &self.config
    }

    pub fn is_restoring(&self) -> bool {
        self.active_restoration
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Write every restorable entry of `snapshot` back into the store
    pub fn restore(&self, snapshot: &Snapshot) -> RestorationResult {
        if self.lifecycle.is_disposed() {
            return RestorationResult::rejected(snapshot.id(), RestoreError::Disposed);
        }
        let Some(_active) = FlagGuard::acquire(&self.active_restoration) else {
            warn!(snapshot = %snapshot.id(), "restoration rejected: another is in progress");
            return RestorationResult::rejected(snapshot.id(), RestoreError::AlreadyRestoring);
        };

        let started = Instant::now();
        let mut checkpoint = Checkpoint::new(Some(snapshot.id()), self.clock.now());
        let mut restored = Vec::new();
        let mut skipped = Vec::new();

        for (name, entry) in snapshot.state() {
            if entry.role.is_read_only() {
                skipped.push(SkippedEntry {
                    name: name.clone(),
                    reason: SkipReason::ReadOnly,
                });
                continue;
            }
            let Some(value) = entry.value.to_atom_value() else {
                skipped.push(SkippedEntry {
                    name: name.clone(),
                    reason: SkipReason::Placeholder,
                });
                continue;
            };

            let atom = entry.atom();
            let current = self.store.get(&atom).ok();
            if self.config.skip_unchanged {
                if let Some(current) = &current {
                    if self.serializer.serialize(current) == entry.value {
                        skipped.push(SkippedEntry {
                            name: name.clone(),
                            reason: SkipReason::Unchanged,
                        });
                        continue;
                    }
                }
            }

            if let Err(source) = self.write(&atom, value) {
                warn!(
                    snapshot = %snapshot.id(),
                    atom = %name,
                    error = %source,
                    "restoration write failed"
                );
                let error = RestoreError::Write {
                    atom: name.clone(),
                    source,
                };
                return self.abort(snapshot, checkpoint, restored, skipped, error, started);
            }
            checkpoint.record(atom, current);
            restored.push(name.clone());
        }

        let checkpoint_id = if checkpoint.is_empty() {
            None
        } else {
            let id = checkpoint.id;
            self.retain(checkpoint);
            Some(id)
        };

        debug!(
            snapshot = %snapshot.id(),
            restored = restored.len(),
            skipped = skipped.len(),
            "snapshot restored"
        );
        RestorationResult {
            success: true,
            snapshot_id: snapshot.id(),
            restored,
            skipped,
            error: None,
            rolled_back: false,
            rollback_failures: Vec::new(),
            checkpoint_id,
            duration: started.elapsed(),
        }
    }

    /// Record the current values of `atoms` for a later rollback
    pub fn create_checkpoint(&self, atoms: &[Atom]) -> Uuid {
        let mut checkpoint = Checkpoint::new(None, self.clock.now());
        for atom in atoms.iter().filter(|atom| !atom.role().is_read_only()) {
            checkpoint.record(atom.clone(), self.store.get(atom).ok());
        }
        let id = checkpoint.id;
        self.retain(checkpoint);
        id
    }

    /// Reapply a checkpoint's prior values in reverse order and discard it.
    ///
    /// Returns the number of atoms written back.
    pub fn rollback(&self, checkpoint_id: Uuid) -> Result<usize> {
        self.lifecycle.ensure_active()?;
        let checkpoint = {
            let mut checkpoints = self.checkpoints.lock();
            let position = checkpoints
                .iter()
                .position(|checkpoint| checkpoint.id == checkpoint_id)
                .ok_or(TimeTravelError::CheckpointNotFound { id: checkpoint_id })?;
            checkpoints
                .remove(position)
                .ok_or(TimeTravelError::CheckpointNotFound { id: checkpoint_id })?
        };

        let Some(_active) = FlagGuard::acquire(&self.active_restoration) else {
            self.checkpoints.lock().push_back(checkpoint);
            return Err(RestoreError::AlreadyRestoring.into());
        };

        let failures = self.replay(&checkpoint);
        if !failures.is_empty() {
            warn!(
                checkpoint = %checkpoint_id,
                failures = failures.len(),
                "rollback incomplete"
            );
            let failures = describe_failures(&checkpoint, &failures);
            return Err(RestoreError::RollbackIncomplete { failures }.into());
        }
        info!(
            checkpoint = %checkpoint_id,
            atoms = checkpoint.len(),
            "rolled back to checkpoint"
        );
        Ok(checkpoint.len())
    }

    /// Retained checkpoints, oldest first
    pub fn checkpoint_ids(&self) -> Vec<Uuid> {
        self.checkpoints.lock().iter().map(|c| c.id).collect()
    }

    pub fn clear_checkpoints(&self) {
        self.checkpoints.lock().clear();
    }

    fn write(&self, atom: &Atom, value: AtomValue) -> std::result::Result<(), StoreError> {
        match atom.role() {
            AtomRole::Writable => self.store.write(atom, value),
            _ => self.store.set(atom, value),
        }
    }

    /// Finish a restoration whose write failed; `restored` lines up with the
    /// checkpoint's entries
    fn abort(
        &self,
        snapshot: &Snapshot,
        checkpoint: Checkpoint,
        restored: Vec<String>,
        skipped: Vec<SkippedEntry>,
        error: RestoreError,
        started: Instant,
    ) -> RestorationResult {
        if !self.config.transactional {
            let checkpoint_id = (!checkpoint.is_empty()).then_some(checkpoint.id);
            self.retain(checkpoint);
            return RestorationResult {
                success: false,
                snapshot_id: snapshot.id(),
                restored,
                skipped,
                error: Some(error),
                rolled_back: false,
                rollback_failures: Vec::new(),
                checkpoint_id,
                duration: started.elapsed(),
            };
        }

        let failures = self.replay(&checkpoint);
        let rolled_back = failures.is_empty();
        if rolled_back {
            info!(
                snapshot = %snapshot.id(),
                atoms = checkpoint.len(),
                "rolled back partial restoration"
            );
        } else {
            warn!(
                snapshot = %snapshot.id(),
                failures = failures.len(),
                "rollback after failed restoration was incomplete"
            );
        }

        // Atoms whose prior value could not be written back stay applied.
        let still_applied = restored
            .into_iter()
            .enumerate()
            .filter(|(index, _)| failures.iter().any(|(failed, _)| failed == index))
            .map(|(_, name)| name)
            .collect();
        RestorationResult {
            success: false,
            snapshot_id: snapshot.id(),
            restored: still_applied,
            skipped,
            error: Some(error),
            rolled_back,
            rollback_failures: describe_failures(&checkpoint, &failures),
            checkpoint_id: None,
            duration: started.elapsed(),
        }
    }

    /// Write prior values back in reverse; returns the entries that failed
    fn replay(&self, checkpoint: &Checkpoint) -> Vec<(usize, StoreError)> {
        let mut failures = Vec::new();
        for (index, prior) in checkpoint.prior.iter().enumerate().rev() {
            let value = prior.value.clone().unwrap_or_default();
            if let Err(error) = self.write(&prior.atom, value) {
                failures.push((index, error));
            }
        }
        failures
    }

    fn retain(&self, checkpoint: Checkpoint) {
        let mut checkpoints = self.checkpoints.lock();
        checkpoints.push_back(checkpoint);
        while checkpoints.len() > self.config.max_checkpoints {
            checkpoints.pop_front();
        }
    }
}

fn describe_failures(checkpoint: &Checkpoint, failures: &[(usize, StoreError)]) -> Vec<String> {
    failures
        .iter()
        .filter_map(|(index, error)| {
            let prior = checkpoint.prior.get(*index)?;
            Some(format!("{}: {}", prior.atom.display_name(), error))
        })
        .collect()
}

#[async_trait]
impl Disposable for SnapshotRestorer {
    fn lifecycle(&self) -> &DisposableState {
        &self.lifecycle
    }

    async fn dispose(&self) -> Result<()> {
        self.lifecycle
            .dispose_with(async {
                self.clear_checkpoints();
                Ok(())
            })
            .await
    }
}
