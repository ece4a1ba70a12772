//! Lifecycle contract shared by every stateful component.
//!
//! A component embeds a [`DisposableState`] and implements [`Disposable`] by
//! handing its own teardown to [`DisposableState::dispose_with`]. The state
//! object takes care of the rest:
//!
//! 1. Idempotence: the disposed flag is swapped first, so a second call is a
//!    cheap `Ok(())`.
//! 2. Children are disposed, in registration order, before the component's
//!    own work. A failing child never stops its siblings.
//! 3. `on_dispose` callbacks run last. Registering one on an already
//!    disposed component runs it immediately.
//! 4. Errors are collected. With `throw_on_error` they come back as one
//!    [`TimeTravelError::DisposalFailed`]; otherwise they go to the error hook
//!    and the log.
//! 5. With a `timeout`, a disposal that does not finish in time fails with
//!    [`TimeTravelError::DisposalTimeout`]. The deadline needs a tokio
//!    runtime; on any other executor the disposal runs without one.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, TimeTravelError};
use crate::leak::LeakDetector;

/// Disposal behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisposalConfig {
    #[serde(with = "crate::config::option_duration_ms")]
    pub timeout: Option<Duration>,
    /// Return collected errors instead of reporting them to the error hook
    pub throw_on_error: bool,
}

impl Default for DisposalConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(5)),
            throw_on_error: false,
        }
    }
}

pub type DisposeCallback = Box<dyn FnOnce() -> std::result::Result<(), String> + Send>;
pub type DisposeErrorHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// A component with an explicit, idempotent teardown
#[async_trait]
pub trait Disposable: Send + Sync {
    fn lifecycle(&self) -> &DisposableState;

    async fn dispose(&self) -> Result<()>;

    fn is_disposed(&self) -> bool {
        self.lifecycle().is_disposed()
    }

    fn component_name(&self) -> &str {
        self.lifecycle().component()
    }
}

/// Disposal bookkeeping embedded in each component
pub struct DisposableState {
    component: String,
    config: DisposalConfig,
    disposed: AtomicBool,
    children: Mutex<Vec<Arc<dyn Disposable>>>,
    callbacks: Mutex<Vec<DisposeCallback>>,
    error_hook: RwLock<Option<DisposeErrorHook>>,
    leak_registration: Mutex<Option<(Arc<LeakDetector>, String)>>,
}

impl DisposableState {
    pub fn new(component: impl Into<String>, config: DisposalConfig) -> Self {
        Self {
            component: component.into(),
            config,
            disposed: AtomicBool::new(false),
            children: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
            error_hook: RwLock::new(None),
            leak_registration: Mutex::new(None),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn config(&self) -> &DisposalConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(TimeTravelError::Disposed {
                component: self.component.clone(),
            });
        }
        Ok(())
    }

    /// Take exclusive ownership of a child disposed before this component
    pub fn add_child(&self, child: Arc<dyn Disposable>) {
        self.children.lock().push(child);
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    pub fn on_dispose<F>(&self, callback: F)
    where
        F: FnOnce() -> std::result::Result<(), String> + Send + 'static,
    {
        if self.is_disposed() {
            if let Err(error) = run_callback(Box::new(callback)) {
                self.report(&error);
            }
            return;
        }
        self.callbacks.lock().push(Box::new(callback));
    }

    pub fn set_error_hook(&self, hook: DisposeErrorHook) {
        *self.error_hook.write() = Some(hook);
    }

    /// Register this component with a leak detector until it is disposed
    pub fn register_with(&self, detector: &Arc<LeakDetector>) {
        if self.is_disposed() {
            return;
        }
        let key = format!("{}#{}", self.component, Uuid::new_v4());
        detector.register(key.clone(), self.component.clone());
        *self.leak_registration.lock() = Some((Arc::clone(detector), key));
    }

    pub fn leak_key(&self) -> Option<String> {
        self.leak_registration
            .lock()
            .as_ref()
            .map(|(_, key)| key.clone())
    }

    /// Run the disposal protocol around the component's own teardown
    pub async fn dispose_with<Fut>(&self, work: Fut) -> Result<()>
    where
        Fut: Future<Output = std::result::Result<(), String>> + Send,
    {
        if self.disposed.swap(true, Ordering::AcqRel) {
            debug!(component = %self.component, "dispose called on disposed component");
            return Ok(());
        }

        let run = self.run_disposal(work);
        let limit = match self.config.timeout {
            Some(_) if tokio::runtime::Handle::try_current().is_err() => {
                debug!(
                    component = %self.component,
                    "no tokio runtime, disposing without deadline"
                );
                None
            }
            limit => limit,
        };
        let errors = match limit {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(errors) => errors,
                Err(_) => {
                    self.release_leak_registration();
                    warn!(
                        component = %self.component,
                        timeout_ms = limit.as_millis() as u64,
                        "disposal timed out"
                    );
                    return Err(TimeTravelError::DisposalTimeout {
                        component: self.component.clone(),
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => run.await,
        };

        self.release_leak_registration();
        debug!(component = %self.component, errors = errors.len(), "disposed");

        if errors.is_empty() {
            return Ok(());
        }
        if self.config.throw_on_error {
            return Err(TimeTravelError::DisposalFailed {
                component: self.component.clone(),
                errors,
            });
        }
        for error in &errors {
            self.report(error);
        }
        Ok(())
    }

    async fn run_disposal<Fut>(&self, work: Fut) -> Vec<String>
    where
        Fut: Future<Output = std::result::Result<(), String>> + Send,
    {
        let mut errors = Vec::new();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Err(error) = child.dispose().await {
                errors.push(format!("{}: {}", child.component_name(), error));
            }
        }

        if let Err(error) = work.await {
            errors.push(error);
        }

        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        for callback in callbacks {
            if let Err(error) = run_callback(callback) {
                errors.push(error);
            }
        }

        errors
    }

    fn report(&self, error: &str) {
        warn!(component = %self.component, error, "disposal error");
        let hook = self.error_hook.read().clone();
        if let Some(hook) = hook {
            hook(&self.component, error);
        }
    }

    fn release_leak_registration(&self) {
        if let Some((detector, key)) = self.leak_registration.lock().take() {
            detector.unregister(&key);
        }
    }
}

fn run_callback(callback: DisposeCallback) -> std::result::Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(result) => result,
        Err(payload) => Err(format!("dispose callback panicked: {}", panic_message(&*payload))),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
