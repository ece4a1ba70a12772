//! Leak detection for components that outlive their expected lifetime.
//!
//! The detector is an ordinary object handed to whatever should be watched.
//! Components register on construction and unregister when disposed; an
//! entry that stays registered past `threshold` is reported as a leak.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::clock::{self, SharedClock};
use crate::disposal::panic_message;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeakDetectorConfig {
    /// Age after which a registered instance counts as leaked
    #[serde(with = "crate::config::duration_ms")]
    pub threshold: Duration,
    #[serde(with = "crate::config::duration_ms")]
    pub check_interval: Duration,
}

impl Default for LeakDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(300),
            check_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakReport {
    pub key: String,
    pub kind: String,
    pub registered_at: DateTime<Utc>,
    #[serde(with = "crate::config::duration_ms")]
    pub age: Duration,
}

pub type LeakCallback = Arc<dyn Fn(&LeakReport) + Send + Sync>;

#[derive(Debug, Clone)]
struct LeakEntry {
    kind: String,
    registered_at: DateTime<Utc>,
    reported: bool,
}

struct LeakRegistry {
    config: LeakDetectorConfig,
    clock: SharedClock,
    entries: DashMap<String, LeakEntry>,
    callbacks: RwLock<Vec<LeakCallback>>,
}

/// Registry of live instances with periodic leak checks
pub struct LeakDetector {
    registry: Arc<LeakRegistry>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeakDetector {
    pub fn new(config: LeakDetectorConfig) -> Self {
        Self::with_clock(config, clock::system_clock())
    }

    pub fn with_clock(config: LeakDetectorConfig, clock: SharedClock) -> Self {
        Self {
            registry: Arc::new(LeakRegistry {
                config,
                clock,
                entries: DashMap::new(),
                callbacks: RwLock::new(Vec::new()),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LeakDetectorConfig {
        &self.registry.config
    }

    pub fn register(&self, key: impl Into<String>, kind: impl Into<String>) {
        let key = key.into();
        let entry = LeakEntry {
            kind: kind.into(),
            registered_at: self.registry.clock.now(),
            reported: false,
        };
        debug!(key = %key, kind = %entry.kind, "registered for leak detection");
        self.registry.entries.insert(key, entry);
    }

    pub fn unregister(&self, key: &str) -> bool {
        self.registry.entries.remove(key).is_some()
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.registry.entries.contains_key(key)
    }

    pub fn tracked_count(&self) -> usize {
        self.registry.entries.len()
    }

    pub fn on_leak(&self, callback: LeakCallback) {
        self.registry.callbacks.write().push(callback);
    }

    /// Every instance registered longer than the threshold.
    ///
    /// Callbacks fire only the first time an instance is reported.
    pub fn check_for_leaks(&self) -> Vec<LeakReport> {
        self.registry.check()
    }

    /// Start periodic checks on the current tokio runtime
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("leak detector started outside a tokio runtime");
            return false;
        };

        let registry: Weak<LeakRegistry> = Arc::downgrade(&self.registry);
        let period = self.registry.config.check_interval;
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.check();
            }
        }));
        true
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    pub fn clear(&self) {
        self.registry.entries.clear();
    }
}

impl LeakRegistry {
    fn check(&self) -> Vec<LeakReport> {
        let now = self.clock.now();
        let mut leaks = Vec::new();
        let mut fresh = Vec::new();

        for mut entry in self.entries.iter_mut() {
            let age = clock::elapsed(entry.registered_at, now);
            if age <= self.config.threshold {
                continue;
            }
            let report = LeakReport {
                key: entry.key().clone(),
                kind: entry.kind.clone(),
                registered_at: entry.registered_at,
                age,
            };
            if !entry.reported {
                entry.reported = true;
                fresh.push(report.clone());
            }
            leaks.push(report);
        }

        // Callbacks run with no shard locks held.
        if !fresh.is_empty() {
            let callbacks = self.callbacks.read().clone();
            for report in &fresh {
                warn!(
                    key = %report.key,
                    kind = %report.kind,
                    age_ms = report.age.as_millis() as u64,
                    "possible leak"
                );
                for callback in &callbacks {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(report)));
                    if let Err(payload) = outcome {
                        warn!(error = %panic_message(&*payload), "leak callback panicked");
                    }
                }
            }
        }

        leaks.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        leaks
    }
}

impl Drop for LeakDetector {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
