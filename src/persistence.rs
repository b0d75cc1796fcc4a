//! Versioned task persistence on top of a [`StorageBackend`].
//!
//! Layout inside the backend:
//!
//! - `kanban-tasks`: JSON array of task records.
//! - `kanban-version`: the format version that wrote them (`1.0`).
//!
//! Reads are self-healing: unreadable, mis-shaped or version-mismatched data
//! is discarded and an empty board is returned. Records that fail the
//! validity check are dropped and counted rather than failing the load.

use std::collections::HashSet;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::storage::{StorageBackend, DEFAULT_CAPACITY};
use crate::task::{partition_valid, Task};

pub const STORAGE_KEY: &str = "kanban-tasks";
pub const VERSION_KEY: &str = "kanban-version";
pub const CURRENT_VERSION: &str = "1.0";
/// Capacity assumed by [`TaskStore::storage_stats`]; advisory only.
pub const STORAGE_CAPACITY: usize = DEFAULT_CAPACITY;

const PROBE_KEY: &str = "__storage_test__";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub tasks: Vec<Task>,
    /// Records discarded by the validity check.
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub success: bool,
    pub message: String,
    pub tasks_imported: usize,
}

impl ImportResult {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            tasks_imported: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StorageStats {
    pub used: usize,
    pub available: usize,
    pub percentage: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackupFile<'a> {
    version: &'a str,
    export_date: String,
    tasks: &'a [Task],
}

pub struct TaskStore<S> {
    backend: S,
}

impl<S: StorageBackend> TaskStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn into_backend(self) -> S {
        self.backend
    }

    /// Loads the stored tasks. Never fails: anything unreadable is cleared.
    pub fn load_tasks(&mut self) -> LoadOutcome {
        match self.try_load() {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "stored tasks are unreadable, clearing storage");
                self.clear_tasks();
                LoadOutcome::default()
            }
        }
    }

    fn try_load(&mut self) -> Result<LoadOutcome> {
        if let Some(version) = self.backend.get_item(VERSION_KEY)? {
            if version != CURRENT_VERSION {
                warn!(
                    stored = %version,
                    current = CURRENT_VERSION,
                    "stored task format is incompatible, clearing storage"
                );
                self.clear_tasks();
                return Ok(LoadOutcome::default());
            }
        }

        let Some(data) = self.backend.get_item(STORAGE_KEY)? else {
            debug!("no stored tasks");
            return Ok(LoadOutcome::default());
        };

        let Value::Array(records) = serde_json::from_str::<Value>(&data)? else {
            warn!("stored tasks are not an array, clearing storage");
            self.clear_tasks();
            return Ok(LoadOutcome::default());
        };

        let (tasks, dropped) = partition_valid(records);
        if dropped > 0 {
            warn!(dropped, kept = tasks.len(), "dropped invalid stored tasks");
            if let Err(err) = self.save_tasks(&tasks) {
                warn!(error = %err, "failed to re-persist cleaned tasks");
            }
        }
        debug!(count = tasks.len(), "loaded tasks");
        Ok(LoadOutcome { tasks, dropped })
    }

    /// Writes the valid subset of `tasks` and stamps the format version.
    ///
    /// Errors (quota, I/O) are logged and returned; the caller's list is
    /// never touched.
    pub fn save_tasks(&mut self, tasks: &[Task]) -> Result<SaveReport> {
        let valid: Vec<&Task> = tasks.iter().filter(|t| t.is_valid()).collect();
        let dropped = tasks.len() - valid.len();
        if dropped > 0 {
            warn!(dropped, "skipping invalid tasks on save");
        }

        let data = serde_json::to_string(&valid)?;
        let written = self
            .backend
            .set_item(STORAGE_KEY, &data)
            .and_then(|()| self.backend.set_item(VERSION_KEY, CURRENT_VERSION));
        if let Err(err) = written {
            if err.is_quota() {
                warn!(error = %err, "storage quota exceeded, tasks kept in memory only");
            } else {
                warn!(error = %err, "failed to save tasks");
            }
            return Err(err);
        }

        debug!(saved = valid.len(), "saved tasks");
        Ok(SaveReport {
            saved: valid.len(),
            dropped,
        })
    }

    /// Removes the stored tasks and the version marker. Idempotent.
    pub fn clear_tasks(&mut self) {
        for key in [STORAGE_KEY, VERSION_KEY] {
            if let Err(err) = self.backend.remove_item(key) {
                debug!(key, error = %err, "failed to remove storage entry");
            }
        }
    }

    /// Probes the backend with a throwaway write.
    pub fn is_storage_available(&mut self) -> bool {
        let probe = self
            .backend
            .set_item(PROBE_KEY, PROBE_KEY)
            .and_then(|()| self.backend.remove_item(PROBE_KEY));
        match probe {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "storage is not available");
                false
            }
        }
    }

    /// Pretty-printed backup document of the currently stored tasks.
    pub fn export_tasks(&mut self) -> Result<String> {
        let tasks = self.load_tasks().tasks;
        let backup = BackupFile {
            version: CURRENT_VERSION,
            export_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            tasks: &tasks,
        };
        Ok(serde_json::to_string_pretty(&backup)?)
    }

    /// Merges a backup into the stored tasks. Existing ids always win.
    pub fn import_tasks(&mut self, json: &str) -> ImportResult {
        let mut merged = self.load_tasks().tasks;
        let result = merge_backup(&mut merged, json);
        if !result.success {
            return result;
        }
        if let Err(err) = self.save_tasks(&merged) {
            return ImportResult::failure(format!("Failed to save imported tasks: {err}"));
        }
        result
    }

    /// Approximate size of the stored collection against [`STORAGE_CAPACITY`].
    pub fn storage_stats(&self) -> StorageStats {
        let used = match self.backend.get_item(STORAGE_KEY) {
            Ok(data) => data.map_or(0, |d| d.len()),
            Err(err) => {
                debug!(error = %err, "cannot read storage for stats");
                0
            }
        };
        StorageStats {
            used,
            available: STORAGE_CAPACITY,
            percentage: used as f64 / STORAGE_CAPACITY as f64 * 100.0,
        }
    }
}

/// Appends the valid backup records whose ids are not already in `tasks`.
///
/// `tasks` is left untouched unless the backup is usable.
pub fn merge_backup(tasks: &mut Vec<Task>, json: &str) -> ImportResult {
    let backup: Value = match serde_json::from_str(json) {
        Ok(value) => value,
        Err(err) => {
            warn!(error = %err, "failed to parse backup");
            return ImportResult::failure("Failed to parse backup file");
        }
    };

    let Some(records) = backup.get("tasks").and_then(Value::as_array) else {
        return ImportResult::failure("Invalid backup format");
    };

    if let Some(version) = backup.get("version").and_then(Value::as_str) {
        if version != CURRENT_VERSION {
            warn!(
                backup = version,
                current = CURRENT_VERSION,
                "importing backup written by a different version"
            );
        }
    }

    let (imported, dropped) = partition_valid(records.clone());
    if dropped > 0 {
        warn!(dropped, "skipping invalid tasks in backup");
    }
    if imported.is_empty() {
        return ImportResult::failure("No valid tasks found in backup");
    }

    let mut known: HashSet<String> = tasks.iter().map(|t| t.id.clone()).collect();
    let before = tasks.len();
    tasks.extend(imported.into_iter().filter(|t| known.insert(t.id.clone())));
    let added = tasks.len() - before;

    info!(added, "imported tasks from backup");
    ImportResult {
        success: true,
        message: format!("Successfully imported {added} tasks"),
        tasks_imported: added,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use crate::task::TaskStatus;
    use serde_json::json;

    fn task(id: &str, status: TaskStatus) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {id}"),
            description: String::new(),
            status,
            created_at: "2024-03-01T10:00:00.000Z".to_string(),
        }
    }

    fn store() -> TaskStore<MemoryStorage> {
        TaskStore::new(MemoryStorage::new())
    }

    #[test]
    fn test_save_then_load_keeps_valid_tasks_in_order() {
        let mut store = store();
        let mut broken = task("2", TaskStatus::Done);
        broken.created_at = "not a date".to_string();
        let tasks = vec![task("1", TaskStatus::Todo), broken, task("3", TaskStatus::Done)];

        let report = store.save_tasks(&tasks).unwrap();
        assert_eq!(report, SaveReport { saved: 2, dropped: 1 });

        let loaded = store.load_tasks();
        assert_eq!(loaded.dropped, 0);
        assert_eq!(
            loaded.tasks,
            vec![task("1", TaskStatus::Todo), task("3", TaskStatus::Done)]
        );
        assert_eq!(
            store.backend().get_item(VERSION_KEY).unwrap().as_deref(),
            Some(CURRENT_VERSION)
        );
    }

    #[test]
    fn test_load_from_empty_storage() {
        let mut store = store();
        assert_eq!(store.load_tasks(), LoadOutcome::default());
    }

    #[test]
    fn test_version_mismatch_clears_storage() {
        let mut store = store();
        store.save_tasks(&[task("1", TaskStatus::Todo)]).unwrap();
        let mut backend = store.into_backend();
        backend.set_item(VERSION_KEY, "0.9").unwrap();

        let mut store = TaskStore::new(backend);
        assert!(store.load_tasks().tasks.is_empty());
        assert_eq!(store.backend().get_item(STORAGE_KEY).unwrap(), None);
        assert_eq!(store.backend().get_item(VERSION_KEY).unwrap(), None);
    }

    #[test]
    fn test_missing_version_marker_still_loads() {
        let mut backend = MemoryStorage::new();
        let data = serde_json::to_string(&[task("1", TaskStatus::Todo)]).unwrap();
        backend.set_item(STORAGE_KEY, &data).unwrap();

        let mut store = TaskStore::new(backend);
        assert_eq!(store.load_tasks().tasks.len(), 1);
    }

    #[test]
    fn test_corrupt_json_clears_storage() {
        let mut backend = MemoryStorage::new();
        backend.set_item(STORAGE_KEY, "[{not json").unwrap();
        backend.set_item(VERSION_KEY, CURRENT_VERSION).unwrap();

        let mut store = TaskStore::new(backend);
        assert_eq!(store.load_tasks(), LoadOutcome::default());
        assert_eq!(store.backend().get_item(STORAGE_KEY).unwrap(), None);
        assert_eq!(store.backend().get_item(VERSION_KEY).unwrap(), None);
    }

    #[test]
    fn test_non_array_clears_storage() {
        let mut backend = MemoryStorage::new();
        backend.set_item(STORAGE_KEY, r#"{"tasks": []}"#).unwrap();

        let mut store = TaskStore::new(backend);
        assert!(store.load_tasks().tasks.is_empty());
        assert_eq!(store.backend().get_item(STORAGE_KEY).unwrap(), None);
    }

    #[test]
    fn test_invalid_records_are_dropped_and_repersisted() {
        let mut backend = MemoryStorage::new();
        let data = json!([
            task("1", TaskStatus::Todo),
            { "id": "2", "title": "no status" },
            task("3", TaskStatus::InProgress),
        ]);
        backend.set_item(STORAGE_KEY, &data.to_string()).unwrap();

        let mut store = TaskStore::new(backend);
        let loaded = store.load_tasks();
        assert_eq!(loaded.dropped, 1);
        assert_eq!(loaded.tasks.len(), 2);

        let stored: Value =
            serde_json::from_str(&store.backend().get_item(STORAGE_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored.as_array().unwrap().len(), 2);

        // Second load sees a clean collection.
        assert_eq!(store.load_tasks().dropped, 0);
    }

    #[test]
    fn test_inaccessible_storage_loads_empty() {
        let mut store = TaskStore::new(MemoryStorage::disabled());
        assert_eq!(store.load_tasks(), LoadOutcome::default());
        assert!(!store.is_storage_available());
    }

    #[test]
    fn test_quota_error_leaves_previous_data() {
        let mut store = TaskStore::new(MemoryStorage::with_capacity(400));
        store.save_tasks(&[task("1", TaskStatus::Todo)]).unwrap();

        let many: Vec<Task> = (0..20)
            .map(|i| task(&i.to_string(), TaskStatus::Todo))
            .collect();
        let err = store.save_tasks(&many).unwrap_err();
        assert!(err.is_quota());
        assert_eq!(many.len(), 20);
        assert_eq!(store.load_tasks().tasks, vec![task("1", TaskStatus::Todo)]);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut store = store();
        store.save_tasks(&[task("1", TaskStatus::Todo)]).unwrap();
        store.clear_tasks();
        store.clear_tasks();
        assert!(store.load_tasks().tasks.is_empty());

        let mut disabled = TaskStore::new(MemoryStorage::disabled());
        disabled.clear_tasks();
    }

    #[test]
    fn test_storage_probe_leaves_no_trace() {
        let mut store = store();
        assert!(store.is_storage_available());
        assert_eq!(store.backend().get_item(PROBE_KEY).unwrap(), None);
    }

    #[test]
    fn test_export_document_shape() {
        let mut store = store();
        store.save_tasks(&[task("1", TaskStatus::Done)]).unwrap();

        let exported = store.export_tasks().unwrap();
        assert!(exported.contains('\n'));
        let doc: Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(doc["version"], CURRENT_VERSION);
        assert!(crate::task::is_valid_date(doc["exportDate"].as_str().unwrap()));
        assert_eq!(doc["tasks"][0]["id"], "1");
        assert_eq!(doc["tasks"][0]["status"], "done");
    }

    #[test]
    fn test_import_missing_fields() {
        let mut store = store();
        let result = store.import_tasks(r#"{"tasks":[{"id":"x"}]}"#);
        assert_eq!(
            result,
            ImportResult {
                success: false,
                message: "No valid tasks found in backup".to_string(),
                tasks_imported: 0,
            }
        );
    }

    #[test]
    fn test_import_rejects_bad_documents() {
        let mut store = store();
        let result = store.import_tasks("not json");
        assert!(!result.success);
        assert_eq!(result.message, "Failed to parse backup file");

        let result = store.import_tasks(r#"{"version":"1.0"}"#);
        assert_eq!(result.message, "Invalid backup format");
        assert_eq!(result.tasks_imported, 0);

        let result = store.import_tasks(r#"{"tasks":{}}"#);
        assert_eq!(result.message, "Invalid backup format");
    }

    #[test]
    fn test_import_merges_without_duplicates() {
        let mut store = store();
        store
            .save_tasks(&[task("1", TaskStatus::Done), task("2", TaskStatus::Todo)])
            .unwrap();

        let mut replacement = task("1", TaskStatus::Todo);
        replacement.title = "Imported copy".to_string();
        let backup = json!({
            "version": "1.0",
            "exportDate": "2024-03-02T00:00:00.000Z",
            "tasks": [replacement, task("3", TaskStatus::InProgress), task("3", TaskStatus::Done)],
        });

        let result = store.import_tasks(&backup.to_string());
        assert!(result.success);
        assert_eq!(result.tasks_imported, 1);
        assert_eq!(result.message, "Successfully imported 1 tasks");

        let tasks = store.load_tasks().tasks;
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "3"]);
        assert_eq!(tasks[0].title, "Task 1");
        assert_eq!(tasks[0].status, TaskStatus::Done);
        assert_eq!(tasks[2].status, TaskStatus::InProgress);
    }

    #[test]
    fn test_import_ignores_backup_version() {
        let mut store = store();
        let backup = json!({ "version": "0.1", "tasks": [task("9", TaskStatus::Todo)] });
        let result = store.import_tasks(&backup.to_string());
        assert!(result.success);
        assert_eq!(result.tasks_imported, 1);
    }

    #[test]
    fn test_merge_backup_leaves_list_alone_on_failure() {
        let mut tasks = vec![task("1", TaskStatus::Todo)];
        let result = merge_backup(&mut tasks, r#"{"tasks":[{"id":"2"}]}"#);
        assert!(!result.success);
        assert_eq!(tasks, vec![task("1", TaskStatus::Todo)]);

        let backup = json!({ "tasks": [task("1", TaskStatus::Done), task("2", TaskStatus::Done)] });
        let result = merge_backup(&mut tasks, &backup.to_string());
        assert_eq!(result.tasks_imported, 1);
        assert_eq!(tasks[0].status, TaskStatus::Todo);
        assert_eq!(tasks[1].id, "2");
    }

    #[test]
    fn test_import_result_wire_names() {
        let value = serde_json::to_value(ImportResult::failure("nope")).unwrap();
        assert_eq!(
            value,
            json!({ "success": false, "message": "nope", "tasksImported": 0 })
        );
    }

    #[test]
    fn test_storage_stats() {
        let mut store = store();
        assert_eq!(store.storage_stats().used, 0);

        store.save_tasks(&[task("1", TaskStatus::Todo)]).unwrap();
        let stats = store.storage_stats();
        let stored = store.backend().get_item(STORAGE_KEY).unwrap().unwrap();
        assert_eq!(stats.used, stored.len());
        assert_eq!(stats.available, 5 * 1024 * 1024);
        assert!(stats.percentage > 0.0 && stats.percentage < 1.0);
    }
}
