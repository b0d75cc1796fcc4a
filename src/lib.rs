//! Kanban task board with versioned local persistence.
//!
//! The board keeps an in-memory list of tasks in three columns and mirrors
//! it into a [`storage::StorageBackend`] after every change. Moving tasks
//! between columns goes through the [`drag::DragMachine`].

pub mod config;
pub mod drag;
pub mod error;
pub mod kanban_board;
pub mod logging;
pub mod persistence;
pub mod storage;
pub mod task;
pub mod ui;

pub use drag::{DragMachine, DragState, StatusChange};
pub use error::StorageError;
pub use kanban_board::KanbanBoard;
pub use persistence::{ImportResult, LoadOutcome, StorageStats, TaskStore};
pub use storage::{FileStorage, MemoryStorage, StorageBackend};
pub use task::{Task, TaskStatus};
