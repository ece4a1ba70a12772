use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::Snapshot;
use crate::value::SerializedValue;

/// Individual change between two snapshots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateChange {
    /// Name of the atom the change belongs to
    pub atom: String,
    /// Atom name followed by the dotted path inside its value
    pub path: String,
    pub change_type: ChangeType,
    pub old_value: Option<SerializedValue>,
    pub new_value: Option<SerializedValue>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotDiff {
    pub from_snapshot: Uuid,
    pub to_snapshot: Uuid,
    pub changes: Vec<StateChange>,
}

impl SnapshotDiff {
    pub fn between(from: &Snapshot, to: &Snapshot) -> Self {
        let mut changes = Vec::new();

        // Removed or modified atoms
        for (name, from_entry) in from.state() {
            match to.entry(name) {
                Some(to_entry) => compute_changes_recursive(
                    name,
                    name,
                    &from_entry.value,
                    &to_entry.value,
                    &mut changes,
                ),
                None => changes.push(StateChange {
                    atom: name.clone(),
                    path: name.clone(),
                    change_type: ChangeType::Removed,
                    old_value: Some(from_entry.value.clone()),
                    new_value: None,
                }),
            }
        }

        // Added atoms
        for (name, to_entry) in to.state() {
            if from.entry(name).is_none() {
                changes.push(StateChange {
                    atom: name.clone(),
                    path: name.clone(),
                    change_type: ChangeType::Added,
                    old_value: None,
                    new_value: Some(to_entry.value.clone()),
                });
            }
        }

        Self {
            from_snapshot: from.id(),
            to_snapshot: to.id(),
            changes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Atom names touched by the diff, each once, in order of first change
    pub fn changed_atoms(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.changes
            .iter()
            .map(|change| change.atom.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }
}

fn compute_changes_recursive(
    atom: &str,
    path: &str,
    from_value: &SerializedValue,
    to_value: &SerializedValue,
    changes: &mut Vec<StateChange>,
) {
    match (from_value, to_value) {
        (SerializedValue::Object(from_obj), SerializedValue::Object(to_obj)) => {
            for (key, from_val) in from_obj {
                let new_path = format!("{path}.{key}");
                match to_obj.get(key) {
                    Some(to_val) => {
                        compute_changes_recursive(atom, &new_path, from_val, to_val, changes)
                    }
                    None => changes.push(StateChange {
                        atom: atom.to_string(),
                        path: new_path,
                        change_type: ChangeType::Removed,
                        old_value: Some(from_val.clone()),
                        new_value: None,
                    }),
                }
            }

            for (key, to_val) in to_obj {
                if !from_obj.contains_key(key) {
                    changes.push(StateChange {
                        atom: atom.to_string(),
                        path: format!("{path}.{key}"),
                        change_type: ChangeType::Added,
                        old_value: None,
                        new_value: Some(to_val.clone()),
                    });
                }
            }
        }
        _ => {
            if from_value != to_value {
                changes.push(StateChange {
                    atom: atom.to_string(),
                    path: path.to_string(),
                    change_type: ChangeType::Modified,
                    old_value: Some(from_value.clone()),
                    new_value: Some(to_value.clone()),
                });
            }
        }
    }
}
