//! Boundary with the host store.
//!
//! The engine never owns atom values. It reads and writes them through
//! [`AtomStore`] and learns about changes through a subscription hook.
//! [`InMemoryStore`] is a small reference implementation for embedding and
//! tests.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::atom::{Atom, AtomId, AtomRole};
use crate::value::AtomValue;

/// Errors reported by a store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Atom {name} has no value")]
    Missing { name: String },

    #[error("Atom {name} is read-only")]
    ReadOnly { name: String },

    #[error("Read of {name} failed: {reason}")]
    ReadFailed { name: String, reason: String },

    #[error("Write to {name} rejected: {reason}")]
    WriteRejected { name: String, reason: String },
}

/// A value change observed in the store
#[derive(Debug, Clone)]
pub struct StoreChange {
    pub atom: Atom,
    pub old_value: AtomValue,
    pub new_value: AtomValue,
}

pub type StoreListener = Arc<dyn Fn(&StoreChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Operations the engine consumes from the host store
pub trait AtomStore: Send + Sync {
    fn get(&self, atom: &Atom) -> Result<AtomValue, StoreError>;

    /// Plain assignment
    fn set(&self, atom: &Atom, value: AtomValue) -> Result<(), StoreError>;

    /// Write through the atom's custom write path
    fn write(&self, atom: &Atom, value: AtomValue) -> Result<(), StoreError> {
        self.set(atom, value)
    }

    /// Register a listener invoked synchronously after every change
    fn subscribe(&self, listener: StoreListener) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId) -> bool;
}

pub type CustomWriter =
    Arc<dyn Fn(&InMemoryStore, &Atom, AtomValue) -> Result<(), StoreError> + Send + Sync>;
pub type ComputedReader = Arc<dyn Fn(&InMemoryStore) -> AtomValue + Send + Sync>;

/// In-memory store with custom writers, computed readers and failure injection
#[derive(Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<AtomId, AtomValue>>,
    writers: RwLock<HashMap<AtomId, CustomWriter>>,
    readers: RwLock<HashMap<AtomId, ComputedReader>>,
    failing_reads: RwLock<HashSet<AtomId>>,
    failing_writes: RwLock<HashSet<AtomId>>,
    listeners: RwLock<Vec<(ListenerId, StoreListener)>>,
    next_listener_id: AtomicU64,
    write_count: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a custom write path for a writable atom
    pub fn define_writer(&self, atom: &Atom, writer: CustomWriter) {
        self.writers.write().insert(atom.id(), writer);
    }

    /// Install the derivation of a computed atom
    pub fn define_computed(&self, atom: &Atom, reader: ComputedReader) {
        self.readers.write().insert(atom.id(), reader);
    }

    /// Assign a value without role checks or custom writers, then notify
    pub fn set_raw(&self, atom: &Atom, value: AtomValue) -> Result<(), StoreError> {
        if self.failing_writes.read().contains(&atom.id()) {
            return Err(StoreError::WriteRejected {
                name: atom.display_name(),
                reason: "injected failure".to_string(),
            });
        }

        let old_value = self
            .values
            .write()
            .insert(atom.id(), value.clone())
            .unwrap_or_default();
        self.write_count.fetch_add(1, Ordering::Relaxed);

        if old_value.serialize() != value.serialize() {
            self.notify(StoreChange {
                atom: atom.clone(),
                old_value,
                new_value: value,
            });
        }
        Ok(())
    }

    pub fn fail_reads(&self, atom: &Atom) {
        self.failing_reads.write().insert(atom.id());
    }

    pub fn fail_writes(&self, atom: &Atom) {
        self.failing_writes.write().insert(atom.id());
    }

    pub fn clear_failures(&self) {
        self.failing_reads.write().clear();
        self.failing_writes.write().clear();
    }

    /// Number of successful raw assignments so far
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn notify(&self, change: StoreChange) {
        // Listeners may call back into the store.
        let listeners: Vec<StoreListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&change);
        }
    }
}

impl AtomStore for InMemoryStore {
    fn get(&self, atom: &Atom) -> Result<AtomValue, StoreError> {
        if self.failing_reads.read().contains(&atom.id()) {
            return Err(StoreError::ReadFailed {
                name: atom.display_name(),
                reason: "injected failure".to_string(),
            });
        }

        let reader = self.readers.read().get(&atom.id()).cloned();
        if let Some(reader) = reader {
            return Ok(reader(self));
        }

        self.values
            .read()
            .get(&atom.id())
            .cloned()
            .ok_or_else(|| StoreError::Missing {
                name: atom.display_name(),
            })
    }

    fn set(&self, atom: &Atom, value: AtomValue) -> Result<(), StoreError> {
        if atom.role() == AtomRole::Computed {
            return Err(StoreError::ReadOnly {
                name: atom.display_name(),
            });
        }
        self.set_raw(atom, value)
    }

    fn write(&self, atom: &Atom, value: AtomValue) -> Result<(), StoreError> {
        let writer = self.writers.read().get(&atom.id()).cloned();
        match writer {
            Some(writer) => writer(self, atom, value),
            None => self.set(atom, value),
        }
    }

    fn subscribe(&self, listener: StoreListener) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }
}
