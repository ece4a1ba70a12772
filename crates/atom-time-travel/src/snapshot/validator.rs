//! Rule-based validation for snapshots and other values.
//!
//! A [`RuleSet`] evaluates every rule and sorts failures into errors and
//! warnings. Validation never fails itself: a rule whose predicate panics is
//! reported as a failed rule.

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use super::Snapshot;
use crate::clock::{self, SharedClock};
use crate::disposal::panic_message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    Error,
    Warning,
}

pub struct ValidationRule<T: ?Sized> {
    pub name: String,
    pub message: String,
    pub level: ValidationLevel,
    check: Arc<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T: ?Sized> ValidationRule<T> {
    pub fn new(
        name: impl Into<String>,
        message: impl Into<String>,
        level: ValidationLevel,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            level,
            check: Arc::new(check),
        }
    }

    pub fn error(
        name: impl Into<String>,
        message: impl Into<String>,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, message, ValidationLevel::Error, check)
    }

    pub fn warning(
        name: impl Into<String>,
        message: impl Into<String>,
        check: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, message, ValidationLevel::Warning, check)
    }

    /// Whether `target` passes. A panicking predicate yields the panic message.
    pub fn check(&self, target: &T) -> std::result::Result<bool, String> {
        panic::catch_unwind(AssertUnwindSafe(|| (self.check)(target)))
            .map_err(|payload| panic_message(&*payload))
    }
}

impl<T: ?Sized> Clone for ValidationRule<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            message: self.message.clone(),
            level: self.level,
            check: Arc::clone(&self.check),
        }
    }
}

impl<T: ?Sized> fmt::Debug for ValidationRule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationRule")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub rule: String,
    pub message: String,
    pub level: ValidationLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::valid()
    }
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn push(&mut self, issue: ValidationIssue) {
        match issue.level {
            ValidationLevel::Error => {
                self.is_valid = false;
                self.errors.push(issue);
            }
            ValidationLevel::Warning => self.warnings.push(issue),
        }
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.is_valid &= other.is_valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Prefix every message, e.g. with the position of the validated item
    pub fn prefixed(mut self, prefix: &str) -> Self {
        for issue in self.errors.iter_mut().chain(self.warnings.iter_mut()) {
            issue.message = format!("{prefix}: {}", issue.message);
        }
        self
    }
}

/// Ordered collection of rules over `T`
pub struct RuleSet<T: ?Sized> {
    rules: Vec<ValidationRule<T>>,
}

impl<T: ?Sized> Default for RuleSet<T> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<T: ?Sized> Clone for RuleSet<T> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for RuleSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|rule| &rule.name))
            .finish()
    }
}

impl<T: ?Sized> RuleSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: ValidationRule<T>) {
        self.rules.push(rule);
    }

    pub fn remove_rule(&mut self, name: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|rule| rule.name != name);
        self.rules.len() != before
    }

    pub fn rules(&self) -> &[ValidationRule<T>] {
        &self.rules
    }

    pub fn evaluate(&self, target: &T) -> ValidationResult {
        let mut result = ValidationResult::valid();
        for rule in &self.rules {
            let message = match rule.check(target) {
                Ok(true) => continue,
                Ok(false) => rule.message.clone(),
                Err(panic) => format!("{} (rule panicked: {panic})", rule.message),
            };
            result.push(ValidationIssue {
                rule: rule.name.clone(),
                message,
                level: rule.level,
            });
        }
        result
    }
}

/// Validates individual snapshots against a configurable rule set
#[derive(Debug, Clone)]
pub struct SnapshotValidator {
    rules: RuleSet<Snapshot>,
}

impl Default for SnapshotValidator {
    fn default() -> Self {
        Self::new(clock::system_clock(), Duration::from_secs(60))
    }
}

impl SnapshotValidator {
    /// Default rules; timestamps may run ahead of `clock` by at most `max_skew`
    pub fn new(clock: SharedClock, max_skew: Duration) -> Self {
        let mut rules = RuleSet::new();
        rules.add_rule(ValidationRule::error(
            "has-id",
            "snapshot id must not be nil",
            |s: &Snapshot| !s.id().is_nil(),
        ));

        let skew = ChronoDuration::from_std(max_skew).unwrap_or_else(|_| ChronoDuration::zero());
        rules.add_rule(ValidationRule::error(
            "timestamp-not-in-future",
            "snapshot timestamp lies in the future",
            move |s: &Snapshot| s.timestamp() <= clock.now() + skew,
        ));
        rules.add_rule(ValidationRule::error(
            "has-atoms",
            "snapshot holds no atoms",
            |s: &Snapshot| !s.state().is_empty(),
        ));
        rules.add_rule(ValidationRule::error(
            "atom-count-matches",
            "recorded atom count differs from the number of entries",
            |s: &Snapshot| s.metadata().atom_count == s.state().len(),
        ));
        rules.add_rule(ValidationRule::error(
            "entries-well-formed",
            "every entry needs a non-empty name matching its key",
            |s: &Snapshot| {
                s.state().iter().all(|(key, entry)| {
                    !entry.name.is_empty()
                        && (key == &entry.name || key.starts_with(&format!("{}#", entry.name)))
                })
            },
        ));
        rules.add_rule(ValidationRule::warning(
            "no-placeholders",
            "some values could not be serialized and will not be restored",
            |s: &Snapshot| !s.contains_placeholders(),
        ));
        Self { rules }
    }

    pub fn add_rule(&mut self, rule: ValidationRule<Snapshot>) {
        self.rules.add_rule(rule);
    }

    pub fn remove_rule(&mut self, name: &str) -> bool {
        self.rules.remove_rule(name)
    }

    pub fn rules(&self) -> &RuleSet<Snapshot> {
        &self.rules
    }

    pub fn validate(&self, snapshot: &Snapshot) -> ValidationResult {
        self.rules.evaluate(snapshot)
    }
}
