use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    /// Column order on the board.
    pub const ALL: [TaskStatus; 3] = [TaskStatus::Todo, TaskStatus::InProgress, TaskStatus::Done];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TaskStatus::Todo => "To Do",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
        }
    }

    pub fn index(self) -> usize {
        match self {
            TaskStatus::Todo => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Done => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<TaskStatus> {
        Self::ALL.get(index).copied()
    }

    /// Neighbouring column, clamped at both ends of the board.
    pub fn shifted(self, direction: isize) -> TaskStatus {
        let index = (self.index() as isize + direction).clamp(0, Self::ALL.len() as isize - 1);
        Self::ALL[index as usize]
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for TaskStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in-progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: String,
}

impl Task {
    /// A fresh task in the `todo` column, stamped with the current time.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_id(now),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Todo,
            created_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn is_valid(&self) -> bool {
        is_valid_date(&self.created_at)
    }
}

fn generate_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.timestamp_millis(), &suffix[..9])
}

/// Accepts RFC 3339 timestamps, bare local date-times and plain dates.
pub fn is_valid_date(value: &str) -> bool {
    DateTime::parse_from_rfc3339(value).is_ok()
        || NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

/// Shape check for a record coming out of storage or a backup file.
pub fn is_valid_task(value: &Value) -> bool {
    let Some(record) = value.as_object() else {
        return false;
    };
    let is_string = |key: &str| record.get(key).is_some_and(Value::is_string);

    is_string("id")
        && is_string("title")
        && is_string("description")
        && record
            .get("status")
            .and_then(Value::as_str)
            .is_some_and(|s| s.parse::<TaskStatus>().is_ok())
        && record
            .get("createdAt")
            .and_then(Value::as_str)
            .is_some_and(is_valid_date)
}

/// Splits raw records into typed tasks, returning how many were rejected.
pub fn partition_valid(values: Vec<Value>) -> (Vec<Task>, usize) {
    let total = values.len();
    let tasks: Vec<Task> = values
        .into_iter()
        .filter(is_valid_task)
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect();
    let dropped = total - tasks.len();
    (tasks, dropped)
}
