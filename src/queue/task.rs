//! # Task records.
//!
//! Tasks are plain serializable records; the queue owns every status
//! transition. Timestamps are wall-clock ([`chrono`]) because tasks cross
//! process boundaries in serialized form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a worker should do with a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    /// Run an automation script by name.
    RunScript { script: String },
    /// Install an application package from a local path.
    InstallApp { path: String },
    /// Capture a screenshot to the given output path.
    Screenshot { output: String },
    /// Run a raw bridge shell command.
    Shell { command: String },
}

impl TaskKind {
    /// Short label for logs and events.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskKind::RunScript { .. } => "run_script",
            TaskKind::InstallApp { .. } => "install_app",
            TaskKind::Screenshot { .. } => "screenshot",
            TaskKind::Shell { .. } => "shell",
        }
    }
}

/// Lifecycle of one task.
///
/// ```text
/// Pending ──► Processing ──► Completed
///                   └───────► Failed
/// ```
///
/// Terminal statuses never transition again; the queue warns and ignores
/// any attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// True for [`TaskStatus::Completed`] and [`TaskStatus::Failed`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// One unit of device work tracked by the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: Uuid,
    /// Logical device the task targets.
    pub device: String,
    /// What to do.
    pub kind: TaskKind,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Monotonic enqueue order, used for deterministic FIFO dispatch.
    pub ordinal: u64,
    /// When the task was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
    /// Structured result payload, set on completion.
    pub result: Option<serde_json::Value>,
    /// Failure description, set on failure.
    pub error: Option<String>,
}

impl Task {
    pub(super) fn new(device: &str, kind: TaskKind, ordinal: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            device: device.to_string(),
            kind,
            status: TaskStatus::Pending,
            ordinal,
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        }
    }
}
