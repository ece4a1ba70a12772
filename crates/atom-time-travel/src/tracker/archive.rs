use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::tracked::TrackedAtom;
use crate::atom::AtomId;

/// A cleaned-up atom kept for possible restoration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedAtom {
    pub tracked: TrackedAtom,
    pub archived_at: DateTime<Utc>,
}

/// Bounded archive; overflow drops the oldest archived atom
#[derive(Debug)]
pub struct AtomArchive {
    entries: VecDeque<ArchivedAtom>,
    max_archived: usize,
    total_evicted: u64,
}

impl AtomArchive {
    pub fn new(max_archived: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_archived,
            total_evicted: 0,
        }
    }

    /// Archive an atom, returning whatever fell off the front
    pub fn insert(&mut self, tracked: TrackedAtom, now: DateTime<Utc>) -> Vec<ArchivedAtom> {
        self.entries.retain(|entry| entry.tracked.id() != tracked.id());
        self.entries.push_back(ArchivedAtom {
            tracked,
            archived_at: now,
        });

        let mut evicted = Vec::new();
        while self.entries.len() > self.max_archived {
            if let Some(oldest) = self.entries.pop_front() {
                evicted.push(oldest);
            }
        }
        self.total_evicted += evicted.len() as u64;
        evicted
    }

    pub fn take(&mut self, id: AtomId) -> Option<ArchivedAtom> {
        let position = self.entries.iter().position(|entry| entry.tracked.id() == id)?;
        self.entries.remove(position)
    }

    pub fn contains(&self, id: AtomId) -> bool {
        self.entries.iter().any(|entry| entry.tracked.id() == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArchivedAtom> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted
    }
}
