//! # The two seams between a worker and the rest of the runtime.
//!
//! A worker runtime never holds the task store or the pool directly; it
//! talks through [`TaskSource`] (where work comes from) and
//! [`AutomationService`] (how work is performed). Both are object-safe so
//! tests substitute scripted fakes.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AutomationError;
use crate::gate::GateSet;
use crate::pool::{ConnectionPool, DeviceRef, ExecOptions};
use crate::queue::{Task, TaskKind, TaskQueue};

/// Where a worker's tasks come from.
///
/// [`TaskQueue`] is the in-process implementation; a remote worker would
/// implement this over its control channel instead.
#[async_trait]
pub trait TaskSource: Send + Sync + 'static {
    /// Claims the next pending task for `device`, if any.
    async fn next_task(&self, device: &str) -> Option<Task>;

    /// Reports successful completion with a structured result.
    async fn complete(&self, id: Uuid, result: serde_json::Value);

    /// Reports failure with a description.
    async fn fail(&self, id: Uuid, error: String);

    /// Pending tasks still queued for `device` (heartbeat reporting).
    async fn depth(&self, device: &str) -> usize;
}

#[async_trait]
impl TaskSource for TaskQueue {
    async fn next_task(&self, device: &str) -> Option<Task> {
        TaskQueue::next_task(self, device).await
    }

    async fn complete(&self, id: Uuid, result: serde_json::Value) {
        self.complete_task(id, result).await;
    }

    async fn fail(&self, id: Uuid, error: String) {
        self.fail_task(id, error).await;
    }

    async fn depth(&self, device: &str) -> usize {
        self.pending_depth(device).await
    }
}

/// How a worker performs one task against one device.
#[async_trait]
pub trait AutomationService: Send + Sync + 'static {
    /// Executes `kind` against `device` and returns a structured result.
    async fn run(
        &self,
        device: &DeviceRef,
        kind: &TaskKind,
    ) -> Result<serde_json::Value, AutomationError>;
}

/// Production automation: task kinds mapped onto bridge commands, with
/// script execution admitted through the script gate.
pub struct BridgeAutomation {
    pool: Arc<ConnectionPool>,
    gates: Arc<GateSet>,
}

impl BridgeAutomation {
    pub fn new(pool: Arc<ConnectionPool>, gates: Arc<GateSet>) -> Self {
        Self { pool, gates }
    }

    async fn exec(
        &self,
        device: &DeviceRef,
        command: &str,
    ) -> Result<String, AutomationError> {
        let out = self
            .pool
            .execute(device, command, ExecOptions::default())
            .await?;
        Ok(out)
    }
}

#[async_trait]
impl AutomationService for BridgeAutomation {
    async fn run(
        &self,
        device: &DeviceRef,
        kind: &TaskKind,
    ) -> Result<serde_json::Value, AutomationError> {
        match kind {
            TaskKind::RunScript { script } => {
                let command = format!("shell sh /data/local/tmp/{script}");
                let id = format!("{device}:{script}");
                let out = self
                    .gates
                    .script()
                    .run(&id, self.exec(device, &command))
                    .await??;
                Ok(serde_json::json!({ "script": script, "output": out }))
            }
            TaskKind::InstallApp { path } => {
                let out = self.exec(device, &format!("install -r {path}")).await?;
                Ok(serde_json::json!({ "installed": path, "output": out }))
            }
            TaskKind::Screenshot { output } => {
                self.exec(device, &format!("shell screencap -p {output}"))
                    .await?;
                Ok(serde_json::json!({ "screenshot": output }))
            }
            TaskKind::Shell { command } => {
                let out = self.exec(device, command).await?;
                Ok(serde_json::json!({ "output": out }))
            }
        }
    }
}
