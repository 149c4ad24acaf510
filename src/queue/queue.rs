//! # TaskQueue implementation.
//!
//! In-memory, per-device FIFO task store. Every status transition goes
//! through the queue under one write lock, which is what makes claiming
//! exclusive: two workers polling the same device can never both receive
//! the same task.
//!
//! ## Rules
//! - Dispatch order per device is enqueue order (by ordinal).
//! - Terminal tasks never transition again; late or duplicate completion
//!   reports are warned about and dropped, not errors.
//! - Cleanup removes only terminal tasks past the retention age; pending
//!   and processing tasks are always preserved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::time;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::task::{Task, TaskKind, TaskStatus};
use crate::config::QueueConfig;
use crate::events::{Bus, Event, EventKind};

/// Counters over the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// In-memory task store with exclusive claiming and terminal retention.
pub struct TaskQueue {
    tasks: RwLock<HashMap<Uuid, Task>>,
    ordinal: AtomicU64,
    bus: Bus,
}

impl TaskQueue {
    pub fn new(bus: Bus) -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            ordinal: AtomicU64::new(0),
            bus,
        }
    }

    /// Enqueues a task for `device` and returns the stored record.
    pub async fn add_task(&self, device: &str, kind: TaskKind) -> Task {
        let ordinal = self.ordinal.fetch_add(1, Ordering::Relaxed);
        let task = Task::new(device, kind, ordinal);

        self.tasks.write().await.insert(task.id, task.clone());
        self.bus.publish(
            Event::now(EventKind::TaskEnqueued)
                .with_device(task.device.clone())
                .with_task(task.id)
                .with_reason(task.kind.as_label()),
        );
        task
    }

    /// Claims the oldest pending task for `device`, flipping it to
    /// processing before returning it.
    ///
    /// Selection and the flip happen under one write lock, so a task is
    /// handed to at most one caller.
    pub async fn next_task(&self, device: &str) -> Option<Task> {
        let mut tasks = self.tasks.write().await;
        let id = tasks
            .values()
            .filter(|t| t.device == device && t.status == TaskStatus::Pending)
            .min_by_key(|t| t.ordinal)
            .map(|t| t.id)?;

        let task = tasks.get_mut(&id)?;
        task.status = TaskStatus::Processing;
        task.updated_at = Utc::now();
        let claimed = task.clone();
        drop(tasks);

        self.bus.publish(
            Event::now(EventKind::TaskDispatched)
                .with_device(claimed.device.clone())
                .with_task(claimed.id),
        );
        Some(claimed)
    }

    /// Marks a task completed with a structured result.
    ///
    /// Unknown ids and already-terminal tasks are warned about and ignored:
    /// completion reports can legitimately arrive late or twice.
    pub async fn complete_task(&self, id: Uuid, result: serde_json::Value) {
        let completed = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&id) {
                Some(task) if !task.status.is_terminal() => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result);
                    task.updated_at = Utc::now();
                    Some(task.device.clone())
                }
                Some(task) => {
                    tracing::warn!(
                        task = %id,
                        status = task.status.as_label(),
                        "ignoring completion of terminal task"
                    );
                    None
                }
                None => {
                    tracing::warn!(task = %id, "ignoring completion of unknown task");
                    None
                }
            }
        };

        if let Some(device) = completed {
            self.bus.publish(
                Event::now(EventKind::TaskCompleted)
                    .with_device(device)
                    .with_task(id),
            );
        }
    }

    /// Marks a task failed with an error description; same idempotency
    /// rules as [`TaskQueue::complete_task`].
    pub async fn fail_task(&self, id: Uuid, error: impl Into<String>) {
        let error = error.into();
        let failed = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&id) {
                Some(task) if !task.status.is_terminal() => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(error.clone());
                    task.updated_at = Utc::now();
                    Some(task.device.clone())
                }
                Some(task) => {
                    tracing::warn!(
                        task = %id,
                        status = task.status.as_label(),
                        "ignoring failure of terminal task"
                    );
                    None
                }
                None => {
                    tracing::warn!(task = %id, "ignoring failure of unknown task");
                    None
                }
            }
        };

        if let Some(device) = failed {
            self.bus.publish(
                Event::now(EventKind::TaskFailed)
                    .with_device(device)
                    .with_task(id)
                    .with_reason(error),
            );
        }
    }

    /// Looks up one task by id.
    pub async fn task(&self, id: Uuid) -> Option<Task> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// All tasks for `device`, in enqueue order.
    pub async fn tasks_for(&self, device: &str) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut out: Vec<Task> = tasks
            .values()
            .filter(|t| t.device == device)
            .cloned()
            .collect();
        out.sort_by_key(|t| t.ordinal);
        out
    }

    /// Pending tasks still queued for `device`.
    pub async fn pending_depth(&self, device: &str) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.device == device && t.status == TaskStatus::Pending)
            .count()
    }

    /// Store-wide counters.
    pub async fn stats(&self) -> QueueStats {
        let tasks = self.tasks.read().await;
        let mut stats = QueueStats {
            total: tasks.len(),
            ..QueueStats::default()
        };
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Removes terminal tasks whose last update is older than `max_age`.
    /// Returns how many were removed. Pending and processing tasks are
    /// never touched, regardless of age.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        // An unrepresentable age means nothing is old enough to drop.
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, t| !(t.status.is_terminal() && t.updated_at < cutoff));
        before - tasks.len()
    }

    /// Spawns the periodic retention sweep, running until the token is
    /// cancelled.
    ///
    /// Bounds the store in a long-running coordinator: terminal tasks older
    /// than `cfg.terminal_retention` are dropped every
    /// `cfg.cleanup_interval`.
    pub fn spawn_cleanup(self: &Arc<Self>, cfg: &QueueConfig, token: CancellationToken) {
        let me = Arc::clone(self);
        let retention = cfg.terminal_retention;
        let mut tick = time::interval(cfg.cleanup_interval);
        tokio::spawn(async move {
            tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = me.cleanup(retention).await;
                        if removed > 0 {
                            tracing::debug!(removed, "dropped expired terminal tasks");
                        }
                    }
                }
            }
        });
    }
}
