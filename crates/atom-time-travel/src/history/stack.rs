use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictReason {
    /// Pushed past capacity
    SizeLimit,
    /// Capacity reduced below the current length
    Resize,
}

pub type EvictListener<T> = Arc<dyn Fn(&T, EvictReason) + Send + Sync>;

/// Saved contents of a [`HistoryStack`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState<T> {
    pub items: Vec<T>,
    pub max_size: usize,
    pub version: u64,
}

/// Bounded sequence, oldest at the bottom, evicting from the bottom on overflow
pub struct HistoryStack<T> {
    items: VecDeque<T>,
    max_size: usize,
    version: u64,
    evicted_total: u64,
    evict_listeners: Vec<EvictListener<T>>,
}

impl<T: Clone> HistoryStack<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size: max_size.max(1),
            version: 0,
            evicted_total: 0,
            evict_listeners: Vec::new(),
        }
    }

    /// Push onto the top, returning the bottom item if it was evicted
    pub fn push(&mut self, item: T) -> Option<T> {
        self.items.push_back(item);
        self.version += 1;
        if self.items.len() > self.max_size {
            let evicted = self.items.pop_front()?;
            self.notify_evicted(&evicted, EvictReason::SizeLimit);
            return Some(evicted);
        }
        None
    }

    pub fn pop(&mut self) -> Option<T> {
        let item = self.items.pop_back()?;
        self.version += 1;
        Some(item)
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.back()
    }

    /// Item `offset` places below the top; 0 is the top
    pub fn from_top(&self, offset: usize) -> Option<&T> {
        let index = self.items.len().checked_sub(offset + 1)?;
        self.items.get(index)
    }

    /// Item `offset` places above the bottom; 0 is the oldest
    pub fn from_bottom(&self, offset: usize) -> Option<&T> {
        self.items.get(offset)
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Keep the bottom `len` items
    pub fn truncate(&mut self, len: usize) {
        if len < self.items.len() {
            self.items.truncate(len);
            self.version += 1;
        }
    }

    /// Change capacity, evicting from the bottom if needed
    pub fn resize(&mut self, max_size: usize) -> Vec<T> {
        self.max_size = max_size.max(1);
        let mut evicted = Vec::new();
        while self.items.len() > self.max_size {
            if let Some(item) = self.items.pop_front() {
                self.notify_evicted(&item, EvictReason::Resize);
                evicted.push(item);
            }
        }
        self.version += 1;
        evicted
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            self.items.clear();
            self.version += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.max_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Incremented on every mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn evicted_total(&self) -> u64 {
        self.evicted_total
    }

    /// Bottom to top
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn on_evict(&mut self, listener: EvictListener<T>) {
        self.evict_listeners.push(listener);
    }

    pub fn snapshot(&self) -> StackState<T> {
        StackState {
            items: self.to_vec(),
            max_size: self.max_size,
            version: self.version,
        }
    }

    /// Reinstate saved contents. The version keeps moving forward.
    pub fn restore(&mut self, state: StackState<T>) {
        self.max_size = state.max_size.max(1);
        self.items = state.items.into_iter().collect();
        while self.items.len() > self.max_size {
            self.items.pop_front();
        }
        self.version = self.version.max(state.version) + 1;
    }

    fn notify_evicted(&mut self, item: &T, reason: EvictReason) {
        self.evicted_total += 1;
        for listener in &self.evict_listeners {
            listener(item, reason);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for HistoryStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryStack")
            .field("items", &self.items)
            .field("max_size", &self.max_size)
            .field("version", &self.version)
            .finish()
    }
}
