use tracing::{debug, info, warn};

use crate::drag::StatusChange;
use crate::error::{Result, StorageError};
use crate::persistence::{merge_backup, ImportResult, StorageStats, TaskStore};
use crate::storage::StorageBackend;
use crate::task::{Task, TaskStatus};

/// The board for one session: the in-memory task list is the source of
/// truth, storage is a best-effort mirror written after every mutation.
pub struct KanbanBoard<S> {
    tasks: Vec<Task>,
    store: TaskStore<S>,
    storage_available: bool,
    last_warning: Option<String>,
    pub selected_status: usize,
    pub selected_task: usize,
}

impl<S: StorageBackend> KanbanBoard<S> {
    /// Probes the store once and loads whatever it holds.
    pub fn open(mut store: TaskStore<S>) -> Self {
        let storage_available = store.is_storage_available();
        let mut last_warning = None;
        let tasks = if storage_available {
            let outcome = store.load_tasks();
            if outcome.dropped > 0 {
                last_warning = Some(format!(
                    "{} invalid task(s) were removed from storage",
                    outcome.dropped
                ));
            }
            outcome.tasks
        } else {
            last_warning = Some("Storage is not available, changes will not be saved".into());
            Vec::new()
        };
        info!(count = tasks.len(), storage_available, "board opened");

        Self {
            tasks,
            store,
            storage_available,
            last_warning,
            selected_status: 0,
            selected_task: 0,
        }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn storage_available(&self) -> bool {
        self.storage_available
    }

    pub fn last_warning(&self) -> Option<&str> {
        self.last_warning.as_deref()
    }

    pub fn take_warning(&mut self) -> Option<String> {
        self.last_warning.take()
    }

    pub fn store(&self) -> &TaskStore<S> {
        &self.store
    }

    pub fn get_tasks_by_status(&self, status: TaskStatus) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.status == status).collect()
    }

    /// Appends a new `todo` task. Blank titles are rejected.
    pub fn add_task(&mut self, title: &str, description: &str) -> Option<&Task> {
        let title = title.trim();
        if title.is_empty() {
            debug!("ignoring task with empty title");
            return None;
        }
        let task = Task::new(title, description);
        info!(task_id = %task.id, "task added");
        self.tasks.push(task);
        self.persist();
        self.tasks.last()
    }

    /// Returns whether a task actually changed column.
    pub fn update_status(&mut self, task_id: &str, status: TaskStatus) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|t| t.id == task_id) else {
            debug!(task_id, "status update for unknown task");
            return false;
        };
        if task.status == status {
            return false;
        }
        info!(task_id, from = %task.status, to = %status, "task moved");
        task.status = status;
        self.persist();
        self.clamp_selection();
        true
    }

    pub fn apply(&mut self, change: StatusChange) -> bool {
        self.update_status(&change.task_id, change.status)
    }

    pub fn selected(&self) -> Option<&Task> {
        let status = TaskStatus::from_index(self.selected_status)?;
        self.get_tasks_by_status(status)
            .get(self.selected_task)
            .copied()
    }

    /// Moves the selected task one column left (`-1`) or right (`1`).
    pub fn move_task(&mut self, direction: isize) -> bool {
        let Some(task) = self.selected() else {
            return false;
        };
        let id = task.id.clone();
        let target = task.status.shifted(direction);
        self.update_status(&id, target)
    }

    pub fn delete_task(&mut self, task_id: &str) -> bool {
        let Some(index) = self.tasks.iter().position(|t| t.id == task_id) else {
            debug!(task_id, "delete for unknown task");
            return false;
        };
        self.tasks.remove(index);
        info!(task_id, "task deleted");
        self.persist();
        self.clamp_selection();
        true
    }

    /// Empties the board and its storage. Callers confirm first.
    pub fn clear_all(&mut self) {
        let count = self.tasks.len();
        self.tasks.clear();
        if self.storage_available {
            self.store.clear_tasks();
        }
        self.selected_task = 0;
        info!(count, "board cleared");
    }

    pub fn export(&mut self) -> Result<String> {
        if !self.storage_available {
            return Err(StorageError::Unavailable("cannot export without storage".into()));
        }
        self.store.export_tasks()
    }

    /// Merges a backup into the in-memory list, then mirrors it to storage.
    pub fn import(&mut self, json: &str) -> ImportResult {
        let result = merge_backup(&mut self.tasks, json);
        if result.success && result.tasks_imported > 0 {
            self.persist();
            self.clamp_selection();
        }
        result
    }

    pub fn stats(&self) -> StorageStats {
        self.store.storage_stats()
    }

    fn persist(&mut self) {
        if !self.storage_available {
            return;
        }
        if let Err(err) = self.store.save_tasks(&self.tasks) {
            warn!(error = %err, "board changes not persisted");
            self.last_warning = Some(if err.is_quota() {
                "Storage is full, recent changes are not saved".to_string()
            } else {
                format!("Failed to save tasks: {err}")
            });
        }
    }

    fn clamp_selection(&mut self) {
        let count = TaskStatus::from_index(self.selected_status)
            .map_or(0, |status| self.get_tasks_by_status(status).len());
        if self.selected_task >= count {
            self.selected_task = count.saturating_sub(1);
        }
    }
}
