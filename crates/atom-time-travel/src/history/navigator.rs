use serde::{Deserialize, Serialize};

use crate::error::{Result, TimeTravelError};

/// Navigation direction for stepping through history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationDirection {
    Forward,
    Backward,
}

/// Where the cursor stands and where it can go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationInfo {
    pub can_undo: bool,
    pub can_redo: bool,
    pub remaining_undo: usize,
    pub remaining_redo: usize,
    pub current_index: Option<usize>,
    pub length: usize,
}

/// Pure cursor arithmetic over a history of `len` entries
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryNavigator;

impl HistoryNavigator {
    pub fn info(current: Option<usize>, len: usize) -> NavigationInfo {
        let current = current.filter(|&index| index < len);
        let (remaining_undo, remaining_redo) = match current {
            Some(index) => (index, len - 1 - index),
            None => (0, 0),
        };
        NavigationInfo {
            can_undo: remaining_undo > 0,
            can_redo: remaining_redo > 0,
            remaining_undo,
            remaining_redo,
            current_index: current,
            length: len,
        }
    }

    pub fn undo_target(current: Option<usize>, len: usize) -> Option<usize> {
        Self::step_target(current, len, NavigationDirection::Backward, 1)
    }

    pub fn redo_target(current: Option<usize>, len: usize) -> Option<usize> {
        Self::step_target(current, len, NavigationDirection::Forward, 1)
    }

    /// Index `steps` away in `direction`, if it exists
    pub fn step_target(
        current: Option<usize>,
        len: usize,
        direction: NavigationDirection,
        steps: usize,
    ) -> Option<usize> {
        let current = current.filter(|&index| index < len)?;
        let target = match direction {
            NavigationDirection::Backward => current.checked_sub(steps)?,
            NavigationDirection::Forward => current.checked_add(steps)?,
        };
        (target < len && target != current).then_some(target)
    }

    pub fn validate_jump(index: usize, len: usize) -> Result<usize> {
        if index < len {
            Ok(index)
        } else {
            Err(TimeTravelError::NavigationOutOfBounds { index, len })
        }
    }
}
