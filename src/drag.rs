//! Drag-and-drop state machine.
//!
//! ```text
//! Idle --start--> Dragging --enter(c)--> DraggingOverColumn(c, 1)
//!                    ^                       | enter(c)  -> count + 1
//!                    |                       | enter(c') -> (c', 1)
//!                    +------ leave, count==0 +
//! DraggingOverColumn --drop--> Idle  (emits StatusChange if c != origin)
//! any --end--> Idle
//! ```
//!
//! One visible column can be made of nested regions that each report their
//! own enter/leave, so the highlight only clears once every enter has been
//! matched by a leave.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraggedTask {
    pub id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Dragging(DraggedTask),
    DraggingOverColumn {
        task: DraggedTask,
        column: TaskStatus,
        enter_count: u32,
    },
}

/// Request for the board to move a task into another column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Data carried alongside a drag, for drops the machine did not see start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragPayload {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Default)]
pub struct DragMachine {
    state: DragState,
}

impl DragMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        !matches!(self.state, DragState::Idle)
    }

    pub fn dragged_task_id(&self) -> Option<&str> {
        match &self.state {
            DragState::Idle => None,
            DragState::Dragging(task) | DragState::DraggingOverColumn { task, .. } => {
                Some(task.id.as_str())
            }
        }
    }

    pub fn highlighted_column(&self) -> Option<TaskStatus> {
        match self.state {
            DragState::DraggingOverColumn { column, .. } => Some(column),
            _ => None,
        }
    }

    /// Starts dragging `task` and returns the transfer payload for it.
    pub fn drag_start(&mut self, task: &Task) -> String {
        if let Some(previous) = self.dragged_task_id() {
            warn!(previous, next = %task.id, "drag started while another was in flight");
        }
        debug!(task_id = %task.id, "drag start");
        let dragged = DraggedTask {
            id: task.id.clone(),
            status: task.status,
        };
        let payload = DragPayload {
            task_id: dragged.id.clone(),
            status: dragged.status,
        };
        self.state = DragState::Dragging(dragged);
        serde_json::to_string(&payload).unwrap_or_else(|_| task.id.clone())
    }

    pub fn drag_enter(&mut self, target: TaskStatus) {
        self.state = match std::mem::take(&mut self.state) {
            DragState::Idle => DragState::Idle,
            DragState::Dragging(task) => DragState::DraggingOverColumn {
                task,
                column: target,
                enter_count: 1,
            },
            DragState::DraggingOverColumn {
                task,
                column,
                enter_count,
            } if column == target => DragState::DraggingOverColumn {
                task,
                column,
                enter_count: enter_count + 1,
            },
            DragState::DraggingOverColumn { task, .. } => DragState::DraggingOverColumn {
                task,
                column: target,
                enter_count: 1,
            },
        };
    }

    /// Leave events for a column other than the highlighted one are ignored.
    pub fn drag_leave(&mut self, target: TaskStatus) {
        self.state = match std::mem::take(&mut self.state) {
            DragState::DraggingOverColumn {
                task,
                column,
                enter_count,
            } if column == target => {
                if enter_count <= 1 {
                    DragState::Dragging(task)
                } else {
                    DragState::DraggingOverColumn {
                        task,
                        column,
                        enter_count: enter_count - 1,
                    }
                }
            }
            other => other,
        };
    }

    /// Ends the drag over `target`.
    ///
    /// The task tracked since `drag_start` is authoritative. Without one the
    /// payload is used: a JSON [`DragPayload`] if it parses, otherwise the raw
    /// text as a task id with unknown origin.
    pub fn drop(&mut self, target: TaskStatus, payload: Option<&str>) -> Option<StatusChange> {
        let state = std::mem::take(&mut self.state);
        let (task_id, origin) = match state {
            DragState::Dragging(task) | DragState::DraggingOverColumn { task, .. } => {
                (task.id, Some(task.status))
            }
            DragState::Idle => match payload.map(parse_payload) {
                Some(Some(parsed)) => parsed,
                _ => {
                    warn!(column = %target, "drop without a dragged task or usable payload");
                    return None;
                }
            },
        };

        if origin == Some(target) {
            debug!(%task_id, column = %target, "dropped onto origin column");
            return None;
        }
        debug!(%task_id, column = %target, "drop");
        Some(StatusChange {
            task_id,
            status: target,
        })
    }

    /// Cancels any drag in flight.
    pub fn drag_end(&mut self) {
        if self.is_dragging() {
            debug!("drag end");
        }
        self.state = DragState::Idle;
    }
}

fn parse_payload(raw: &str) -> Option<(String, Option<TaskStatus>)> {
    match serde_json::from_str::<DragPayload>(raw) {
        Ok(payload) => Some((payload.task_id, Some(payload.status))),
        Err(err) => {
            let id = raw.trim();
            if id.is_empty() {
                return None;
            }
            warn!(error = %err, "malformed drag payload, using it as a task id");
            Some((id.to_string(), None))
        }
    }
}
