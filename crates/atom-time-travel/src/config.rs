//! Configuration for the tracker, cleanup policy and time-travel facade.
//!
//! Every struct has a `Default` and deserializes with `#[serde(default)]`,
//! so a JSON document only needs the fields it overrides. Durations are
//! expressed in milliseconds.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::atom::AtomRole;
use crate::disposal::DisposalConfig;
use crate::error::{Result, TimeTravelError};
use crate::snapshot::restorer::RestorerConfig;

/// Order in which eligible atoms are evicted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupStrategyKind {
    /// Least recently accessed first
    #[default]
    Lru,
    /// Least frequently accessed first
    Lfu,
    /// Oldest tracked first
    Fifo,
    /// Furthest past its TTL first
    TimeBased,
}

/// What happens to an atom selected for cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnCleanup {
    #[default]
    Delete,
    Archive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub max_archived: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self { max_archived: 1000 }
    }
}

/// TTL and garbage-collection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    #[serde(with = "duration_ms")]
    pub default_ttl: Duration,
    #[serde(with = "duration_ms")]
    pub idle_threshold: Duration,
    #[serde(with = "duration_ms")]
    pub gc_interval: Duration,
    #[serde(with = "duration_ms")]
    pub min_ttl: Duration,
    /// Per-role TTL overrides
    #[serde(with = "role_duration_ms")]
    pub type_ttl: HashMap<AtomRole, Duration>,
    pub batch_size: usize,
    pub cleanup_strategy: CleanupStrategyKind,
    pub on_cleanup: OnCleanup,
    pub enable_ref_counting: bool,
    pub auto_untrack_when_ref_zero: bool,
    pub archive_storage: ArchiveConfig,
    pub detailed_stats: bool,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            idle_threshold: Duration::from_secs(60),
            gc_interval: Duration::from_secs(60),
            min_ttl: Duration::from_secs(1),
            type_ttl: HashMap::new(),
            batch_size: 100,
            cleanup_strategy: CleanupStrategyKind::default(),
            on_cleanup: OnCleanup::default(),
            enable_ref_counting: false,
            auto_untrack_when_ref_zero: false,
            archive_storage: ArchiveConfig::default(),
            detailed_stats: false,
        }
    }
}

impl TtlConfig {
    /// Role override or default, never below `min_ttl`
    pub fn effective_ttl(&self, role: AtomRole) -> Duration {
        let ttl = self.type_ttl.get(&role).copied().unwrap_or(self.default_ttl);
        ttl.max(self.min_ttl)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be greater than 0"));
        }
        if self.gc_interval.is_zero() {
            return Err(invalid("gc_interval", "must be greater than 0"));
        }
        if self.idle_threshold > self.effective_ttl(AtomRole::Primitive) {
            return Err(invalid("idle_threshold", "must not exceed default_ttl"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub max_atoms: usize,
    /// Roles that are never tracked
    pub exclude_roles: HashSet<AtomRole>,
    pub ttl: TtlConfig,
    /// Capacity of the tracker event channel
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_atoms: 10_000,
            exclude_roles: HashSet::new(),
            ttl: TtlConfig::default(),
            event_capacity: 1024,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_atoms == 0 {
            return Err(invalid("max_atoms", "must be greater than 0"));
        }
        if self.event_capacity == 0 {
            return Err(invalid("event_capacity", "must be greater than 0"));
        }
        self.ttl.validate()
    }
}

/// Top-level configuration of a [`TimeTravel`](crate::TimeTravel) instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeTravelConfig {
    pub max_history: usize,
    /// Capture after every tracked store change
    pub auto_capture: bool,
    /// Record automatic captures even when nothing changed
    pub skip_state_check: bool,
    /// Atom names left out of snapshots
    pub exclude_atoms: Vec<String>,
    pub tracker: TrackerConfig,
    pub restorer: RestorerConfig,
    pub disposal: DisposalConfig,
}

impl Default for TimeTravelConfig {
    fn default() -> Self {
        Self {
            max_history: 50,
            auto_capture: false,
            skip_state_check: false,
            exclude_atoms: Vec::new(),
            tracker: TrackerConfig::default(),
            restorer: RestorerConfig::default(),
            disposal: DisposalConfig::default(),
        }
    }
}

impl TimeTravelConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_history == 0 {
            return Err(invalid("max_history", "must be greater than 0"));
        }
        self.tracker.validate()
    }
}

fn invalid(parameter: &str, reason: &str) -> TimeTravelError {
    TimeTravelError::InvalidConfig {
        parameter: parameter.to_string(),
        reason: reason.to_string(),
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

pub(crate) mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

mod role_duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;
    use std::time::Duration;

    use crate::atom::AtomRole;

    pub fn serialize<S: Serializer>(
        value: &HashMap<AtomRole, Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let millis: HashMap<AtomRole, u64> = value
            .iter()
            .map(|(role, d)| (*role, d.as_millis() as u64))
            .collect();
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<AtomRole, Duration>, D::Error> {
        let millis = HashMap::<AtomRole, u64>::deserialize(deserializer)?;
        Ok(millis
            .into_iter()
            .map(|(role, ms)| (role, Duration::from_millis(ms)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TimeTravelConfig::default();
        assert_eq!(config.max_history, 50);
        assert_eq!(config.tracker.ttl.cleanup_strategy, CleanupStrategyKind::Lru);
        assert_eq!(config.tracker.ttl.on_cleanup, OnCleanup::Delete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_effective_ttl_uses_override_and_min() {
        let mut ttl = TtlConfig {
            default_ttl: Duration::from_millis(500),
            min_ttl: Duration::from_millis(200),
            ..Default::default()
        };
        ttl.type_ttl.insert(AtomRole::Computed, Duration::from_millis(50));

        assert_eq!(ttl.effective_ttl(AtomRole::Primitive), Duration::from_millis(500));
        assert_eq!(ttl.effective_ttl(AtomRole::Computed), Duration::from_millis(200));
    }

    #[test]
    fn test_from_json_partial_document() {
        let json = r#"{
            "max_history": 10,
            "auto_capture": true,
            "tracker": {
                "ttl": {
                    "default_ttl": 100,
                    "idle_threshold": 25,
                    "cleanup_strategy": "time-based",
                    "on_cleanup": "archive",
                    "type_ttl": {"computed": 400}
                }
            }
        }"#;

        let config = TimeTravelConfig::from_json(json).unwrap();
        assert_eq!(config.max_history, 10);
        assert!(config.auto_capture);
        assert_eq!(config.tracker.ttl.default_ttl, Duration::from_millis(100));
        assert_eq!(config.tracker.ttl.cleanup_strategy, CleanupStrategyKind::TimeBased);
        assert_eq!(config.tracker.ttl.on_cleanup, OnCleanup::Archive);
        assert_eq!(
            config.tracker.ttl.type_ttl.get(&AtomRole::Computed),
            Some(&Duration::from_millis(400))
        );
        assert_eq!(config.tracker.max_atoms, 10_000);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = TimeTravelConfig {
            max_history: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TimeTravelError::InvalidConfig { .. })
        ));

        let ttl = TtlConfig {
            idle_threshold: Duration::from_secs(600),
            ..Default::default()
        };
        assert!(ttl.validate().is_err());

        assert!(TimeTravelConfig::from_json("{ not json").is_err());
    }
}
