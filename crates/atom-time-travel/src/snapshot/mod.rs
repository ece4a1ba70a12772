//! Immutable point-in-time captures of tracked atom values.

pub mod creator;
pub mod diff;
pub mod restorer;
pub mod validator;

pub use creator::{CreationResult, ReadFailure, SnapshotCreator, SnapshotCreatorConfig};
pub use diff::{ChangeType, SnapshotDiff, StateChange};
pub use restorer::{
    Checkpoint, RestorationResult, RestoreError, RestorerConfig, SkipReason, SkippedEntry,
    SnapshotRestorer,
};
pub use validator::{
    RuleSet, SnapshotValidator, ValidationIssue, ValidationLevel, ValidationResult, ValidationRule,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::atom::{Atom, AtomId, AtomRole};
use crate::error::{Result, TimeTravelError};
use crate::value::SerializedValue;

/// Captured value of one atom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub atom_id: AtomId,
    pub name: String,
    pub role: AtomRole,
    pub value: SerializedValue,
}

impl SnapshotEntry {
    /// Handle for writing this entry back to the store
    pub fn atom(&self) -> Atom {
        Atom::from_parts(self.atom_id, Some(self.name.clone()), self.role)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub timestamp: DateTime<Utc>,
    pub action: Option<String>,
    pub atom_count: usize,
    /// Free-form data attached by integrations
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

/// State of every captured atom, keyed by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    id: Uuid,
    state: BTreeMap<String, SnapshotEntry>,
    metadata: SnapshotMetadata,
}

impl Snapshot {
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &BTreeMap<String, SnapshotEntry> {
        &self.state
    }

    pub fn metadata(&self) -> &SnapshotMetadata {
        &self.metadata
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.metadata.timestamp
    }

    pub fn action(&self) -> Option<&str> {
        self.metadata.action.as_deref()
    }

    pub fn entry(&self, name: &str) -> Option<&SnapshotEntry> {
        self.state.get(name)
    }

    pub fn value_of(&self, name: &str) -> Option<&SerializedValue> {
        self.state.get(name).map(|entry| &entry.value)
    }

    pub fn atom_count(&self) -> usize {
        self.state.len()
    }

    /// Whether both snapshots hold the same atoms with the same values
    pub fn same_state_as(&self, other: &Snapshot) -> bool {
        self.state.len() == other.state.len()
            && self.state.iter().all(|(name, entry)| {
                other
                    .state
                    .get(name)
                    .map(|theirs| theirs.atom_id == entry.atom_id && theirs.value == entry.value)
                    .unwrap_or(false)
            })
    }

    pub fn contains_placeholders(&self) -> bool {
        self.state
            .values()
            .any(|entry| entry.value.contains_placeholder())
    }

    pub fn approximate_size(&self) -> usize {
        std::mem::size_of::<Snapshot>()
            + self
                .state
                .iter()
                .map(|(name, entry)| name.len() * 2 + entry.value.approximate_size())
                .sum::<usize>()
    }
}

/// Builder for [`Snapshot`]; `id` and `timestamp` are required
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    id: Option<Uuid>,
    timestamp: Option<DateTime<Utc>>,
    action: Option<String>,
    state: BTreeMap<String, SnapshotEntry>,
    atom_count: Option<usize>,
    extensions: BTreeMap<String, serde_json::Value>,
}

impl SnapshotBuilder {
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn new_id(self) -> Self {
        self.id(Uuid::new_v4())
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn maybe_action(mut self, action: Option<&str>) -> Self {
        self.action = action.map(str::to_string);
        self
    }

    pub fn entry(mut self, entry: SnapshotEntry) -> Self {
        self.state.insert(entry.name.clone(), entry);
        self
    }

    /// Insert under an explicit key, which may differ from the entry name
    pub fn entry_with_key(mut self, key: impl Into<String>, entry: SnapshotEntry) -> Self {
        self.state.insert(key.into(), entry);
        self
    }

    /// Override the recorded atom count; defaults to the number of entries
    pub fn atom_count(mut self, count: usize) -> Self {
        self.atom_count = Some(count);
        self
    }

    pub fn extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<Snapshot> {
        let id = self.id.ok_or(TimeTravelError::MissingField { field: "id" })?;
        let timestamp = self
            .timestamp
            .ok_or(TimeTravelError::MissingField { field: "timestamp" })?;
        let atom_count = self.atom_count.unwrap_or(self.state.len());

        Ok(Snapshot {
            id,
            state: self.state,
            metadata: SnapshotMetadata {
                timestamp,
                action: self.action,
                atom_count,
                extensions: self.extensions,
            },
        })
    }
}
