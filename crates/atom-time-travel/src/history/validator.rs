use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::snapshot::{
    RuleSet, Snapshot, SnapshotDiff, SnapshotValidator, ValidationResult, ValidationRule,
};

type History = [Arc<Snapshot>];

/// Filter for [`HistoryValidator::search`]; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    /// Case-insensitive substring of the action label
    pub action_contains: Option<String>,
    /// Snapshot must hold an atom with this name
    pub atom_name: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    pub fn action(text: impl Into<String>) -> Self {
        Self {
            action_contains: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn atom(name: impl Into<String>) -> Self {
        Self {
            atom_name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        if let Some(text) = &self.action_contains {
            let needle = text.to_lowercase();
            let hit = snapshot
                .action()
                .map(|action| action.to_lowercase().contains(&needle))
                .unwrap_or(false);
            if !hit {
                return false;
            }
        }
        if let Some(name) = &self.atom_name {
            if !snapshot.state().values().any(|entry| &entry.name == name) {
                return false;
            }
        }
        if self.from.is_some_and(|from| snapshot.timestamp() < from) {
            return false;
        }
        if self.to.is_some_and(|to| snapshot.timestamp() > to) {
            return false;
        }
        true
    }
}

/// Checks whole histories and answers queries over them
#[derive(Debug, Clone)]
pub struct HistoryValidator {
    sequence_rules: RuleSet<History>,
    snapshot_validator: SnapshotValidator,
}

impl Default for HistoryValidator {
    fn default() -> Self {
        Self::new(SnapshotValidator::default())
    }
}

impl HistoryValidator {
    pub fn new(snapshot_validator: SnapshotValidator) -> Self {
        let mut sequence_rules = RuleSet::new();
        sequence_rules.add_rule(ValidationRule::error(
            "unique-ids",
            "history contains duplicate snapshot ids",
            |history: &History| {
                let mut seen = HashSet::with_capacity(history.len());
                history.iter().all(|snapshot| seen.insert(snapshot.id()))
            },
        ));
        sequence_rules.add_rule(ValidationRule::error(
            "chronological",
            "snapshot timestamps go backwards",
            |history: &History| {
                history
                    .windows(2)
                    .all(|pair| pair[0].timestamp() <= pair[1].timestamp())
            },
        ));
        Self {
            sequence_rules,
            snapshot_validator,
        }
    }

    pub fn add_sequence_rule(&mut self, rule: ValidationRule<History>) {
        self.sequence_rules.add_rule(rule);
    }

    pub fn snapshot_validator(&self) -> &SnapshotValidator {
        &self.snapshot_validator
    }

    pub fn snapshot_validator_mut(&mut self) -> &mut SnapshotValidator {
        &mut self.snapshot_validator
    }

    /// Sequence rules first, then every snapshot on its own
    pub fn validate(&self, history: &History) -> ValidationResult {
        let mut result = self.sequence_rules.evaluate(history);
        for (index, snapshot) in history.iter().enumerate() {
            let checked = self.snapshot_validator.validate(snapshot);
            result.merge(checked.prefixed(&format!("snapshot {index}")));
        }
        result
    }

    /// Indices of matching snapshots, oldest first
    pub fn search(&self, history: &History, query: &HistoryQuery) -> Vec<usize> {
        history
            .iter()
            .enumerate()
            .filter(|(_, snapshot)| query.matches(snapshot))
            .map(|(index, _)| index)
            .collect()
    }

    pub fn diff(&self, from: &Snapshot, to: &Snapshot) -> SnapshotDiff {
        SnapshotDiff::between(from, to)
    }
}
