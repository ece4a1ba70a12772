//! Bounded snapshot history with a navigation cursor.

pub mod manager;
pub mod navigator;
pub mod stack;
pub mod validator;

pub use manager::{HistoryManager, HistoryStatistics};
pub use navigator::{HistoryNavigator, NavigationDirection, NavigationInfo};
pub use stack::{EvictListener, EvictReason, HistoryStack, StackState};
pub use validator::{HistoryQuery, HistoryValidator};
