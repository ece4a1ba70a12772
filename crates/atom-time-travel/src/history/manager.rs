use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::navigator::{HistoryNavigator, NavigationInfo};
use super::stack::{EvictListener, HistoryStack};
use crate::error::Result;
use crate::snapshot::Snapshot;

/// Snapshot of the history's shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStatistics {
    pub length: usize,
    pub capacity: usize,
    pub current_index: Option<usize>,
    pub total_captured: u64,
    pub evicted: u64,
    /// Future entries discarded by captures made after an undo
    pub truncated: u64,
    pub version: u64,
}

/// Snapshot history with a cursor
#[derive(Debug)]
pub struct HistoryManager {
    stack: HistoryStack<Arc<Snapshot>>,
    current: Option<usize>,
    total_captured: u64,
    truncated: u64,
}

impl HistoryManager {
    pub fn new(max_size: usize) -> Self {
        Self {
            stack: HistoryStack::new(max_size),
            current: None,
            total_captured: 0,
            truncated: 0,
        }
    }

    /// Append after the cursor, discarding any redo tail.
    ///
    /// Returns the oldest snapshot if capacity forced it out.
    pub fn push(&mut self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        // Remove forward history if we're not at the end
        if let Some(current) = self.current {
            let keep = current + 1;
            if keep < self.stack.len() {
                self.truncated += (self.stack.len() - keep) as u64;
                self.stack.truncate(keep);
            }
        }

        let evicted = self.stack.push(snapshot);
        self.total_captured += 1;
        self.current = Some(self.stack.len() - 1);
        evicted
    }

    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.and_then(|index| self.get(index))
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn get(&self, index: usize) -> Option<Arc<Snapshot>> {
        self.stack.get(index).cloned()
    }

    pub fn set_current(&mut self, index: usize) -> Result<()> {
        let index = HistoryNavigator::validate_jump(index, self.stack.len())?;
        self.current = Some(index);
        Ok(())
    }

    /// Oldest first
    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.stack.to_vec()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.stack.max_size()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
        self.current = None;
    }

    /// Change capacity; the cursor follows its snapshot or clamps to the oldest
    pub fn resize(&mut self, max_size: usize) -> Vec<Arc<Snapshot>> {
        let evicted = self.stack.resize(max_size);
        self.current = match self.current {
            _ if self.stack.is_empty() => None,
            Some(index) => Some(index.saturating_sub(evicted.len())),
            None => None,
        };
        evicted
    }

    pub fn navigation_info(&self) -> NavigationInfo {
        HistoryNavigator::info(self.current, self.stack.len())
    }

    pub fn can_undo(&self) -> bool {
        self.navigation_info().can_undo
    }

    pub fn can_redo(&self) -> bool {
        self.navigation_info().can_redo
    }

    pub fn undo_target(&self) -> Option<usize> {
        HistoryNavigator::undo_target(self.current, self.stack.len())
    }

    pub fn redo_target(&self) -> Option<usize> {
        HistoryNavigator::redo_target(self.current, self.stack.len())
    }

    pub fn find_by_id(&self, id: Uuid) -> Option<(usize, Arc<Snapshot>)> {
        self.stack
            .iter()
            .enumerate()
            .find(|(_, snapshot)| snapshot.id() == id)
            .map(|(index, snapshot)| (index, Arc::clone(snapshot)))
    }

    pub fn on_evict(&mut self, listener: EvictListener<Arc<Snapshot>>) {
        self.stack.on_evict(listener);
    }

    pub fn version(&self) -> u64 {
        self.stack.version()
    }

    pub fn statistics(&self) -> HistoryStatistics {
        HistoryStatistics {
            length: self.stack.len(),
            capacity: self.stack.max_size(),
            current_index: self.current,
            total_captured: self.total_captured,
            evicted: self.stack.evicted_total(),
            truncated: self.truncated,
            version: self.stack.version(),
        }
    }
}
