//! # WorkerRunner implementation.
//!
//! The poll loop a worker process runs for its device: claim the next task,
//! perform it through the automation seam, report the outcome, repeat.
//!
//! ## Rules
//! - One task at a time per runner; order is whatever the source hands out.
//! - A stop request never cancels the in-flight task outright: the task may
//!   finish within the drain bound, after which it is force-failed so the
//!   store does not keep a phantom "processing" entry.
//! - Heartbeats (with queue depth) are emitted every N idle polls.

use std::sync::Arc;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::automation::{AutomationService, TaskSource};
use crate::config::RunnerConfig;
use crate::events::{Bus, Event, EventKind};
use crate::pool::DeviceRef;
use crate::queue::Task;

/// Drives one device's task loop until stopped.
pub struct WorkerRunner {
    device: DeviceRef,
    key: String,
    source: Arc<dyn TaskSource>,
    automation: Arc<dyn AutomationService>,
    cfg: RunnerConfig,
    bus: Bus,
}

impl WorkerRunner {
    pub fn new(
        device: DeviceRef,
        source: Arc<dyn TaskSource>,
        automation: Arc<dyn AutomationService>,
        cfg: RunnerConfig,
        bus: Bus,
    ) -> Self {
        let key = device.to_string();
        Self {
            device,
            key,
            source,
            automation,
            cfg,
            bus,
        }
    }

    /// Runs the poll loop until `token` is cancelled.
    ///
    /// Returns once the loop has drained: any in-flight task has either
    /// finished or been force-failed at the drain bound.
    pub async fn run(&self, token: CancellationToken) {
        let mut polls: u32 = 0;
        loop {
            if token.is_cancelled() {
                return;
            }

            match self.source.next_task(&self.key).await {
                Some(task) => {
                    self.process(task, &token).await;
                }
                None => {
                    polls = polls.wrapping_add(1);
                    if self.cfg.heartbeat_every > 0 && polls % self.cfg.heartbeat_every == 0 {
                        let depth = self.source.depth(&self.key).await;
                        self.bus.publish(
                            Event::now(EventKind::WorkerHeartbeat)
                                .with_device(self.key.clone())
                                .with_depth(depth),
                        );
                    }
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = time::sleep(self.cfg.poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Performs one task and reports the outcome to the source.
    async fn process(&self, task: Task, token: &CancellationToken) {
        let fut = self.automation.run(&self.device, &task.kind);
        tokio::pin!(fut);

        let outcome = tokio::select! {
            res = &mut fut => res,
            _ = Self::drain_expired(token, self.cfg.drain_timeout) => {
                tracing::warn!(
                    device = %self.key,
                    task = %task.id,
                    "task exceeded drain bound during stop, force-failing"
                );
                self.source
                    .fail(task.id, "worker stopping: drain timeout exceeded".to_string())
                    .await;
                return;
            }
        };

        match outcome {
            Ok(result) => self.source.complete(task.id, result).await,
            Err(err) => {
                tracing::warn!(
                    device = %self.key,
                    task = %task.id,
                    error = %err,
                    label = err.as_label(),
                    "task failed"
                );
                self.source.fail(task.id, err.to_string()).await;
            }
        }
    }

    /// Resolves only when a stop was requested *and* the drain bound has
    /// passed since then.
    async fn drain_expired(token: &CancellationToken, bound: std::time::Duration) {
        token.cancelled().await;
        time::sleep(bound).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AutomationError, PoolError};
    use crate::queue::{TaskKind, TaskQueue, TaskStatus};
    use async_trait::async_trait;
    use std::time::Duration;

    /// Automation fake: scripted per-command outcome, optional delay.
    struct FakeAutomation {
        delay: Duration,
        fail_commands: Vec<String>,
    }

    impl FakeAutomation {
        fn instant() -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::ZERO,
                fail_commands: Vec::new(),
            })
        }
    }

    #[async_trait]
    impl AutomationService for FakeAutomation {
        async fn run(
            &self,
            _device: &DeviceRef,
            kind: &TaskKind,
        ) -> Result<serde_json::Value, AutomationError> {
            if self.delay > Duration::ZERO {
                time::sleep(self.delay).await;
            }
            if let TaskKind::Shell { command } = kind {
                if self.fail_commands.contains(command) {
                    return Err(AutomationError::Pool(PoolError::Unresolved {
                        device: "gone".to_string(),
                    }));
                }
                return Ok(serde_json::json!({ "output": format!("ran:{command}") }));
            }
            Ok(serde_json::Value::Null)
        }
    }

    fn runner_cfg() -> RunnerConfig {
        RunnerConfig {
            poll_interval: Duration::from_millis(10),
            heartbeat_every: 2,
            drain_timeout: Duration::from_millis(50),
        }
    }

    fn shell(cmd: &str) -> TaskKind {
        TaskKind::Shell {
            command: cmd.to_string(),
        }
    }

    #[tokio::test]
    async fn completes_and_fails_tasks_through_the_source() {
        let bus = Bus::new(64);
        let queue = Arc::new(TaskQueue::new(bus.clone()));
        let device = DeviceRef::Port(5554);
        let key = device.to_string();

        let ok = queue.add_task(&key, shell("good")).await;
        let bad = queue.add_task(&key, shell("bad")).await;

        let automation = Arc::new(FakeAutomation {
            delay: Duration::ZERO,
            fail_commands: vec!["bad".to_string()],
        });
        let runner = WorkerRunner::new(
            device,
            Arc::clone(&queue) as Arc<dyn TaskSource>,
            automation,
            runner_cfg(),
            bus,
        );

        let token = CancellationToken::new();
        let handle = {
            let token = token.clone();
            tokio::spawn(async move { runner.run(token).await })
        };

        let done = async {
            loop {
                let stats = queue.stats().await;
                if stats.completed == 1 && stats.failed == 1 {
                    break;
                }
                time::sleep(Duration::from_millis(5)).await;
            }
        };
        time::timeout(Duration::from_secs(5), done).await.unwrap();

        token.cancel();
        handle.await.unwrap();

        assert_eq!(queue.task(ok.id).await.unwrap().status, TaskStatus::Completed);
        let failed = queue.task(bad.id).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed.error.unwrap().contains("cannot resolve"));
    }

    #[tokio::test]
    async fn stop_lets_a_quick_task_finish() {
        let bus = Bus::new(64);
        let queue = Arc::new(TaskQueue::new(bus.clone()));
        let device = DeviceRef::Port(5554);
        let key = device.to_string();

        let task = queue.add_task(&key, shell("quick")).await;
        let automation = Arc::new(FakeAutomation {
            delay: Duration::from_millis(20),
            fail_commands: Vec::new(),
        });
        let runner = WorkerRunner::new(
            device,
            Arc::clone(&queue) as Arc<dyn TaskSource>,
            automation,
            runner_cfg(),
            bus,
        );

        let token = CancellationToken::new();
        let handle = {
            let token = token.clone();
            tokio::spawn(async move { runner.run(token).await })
        };

        // Let the runner claim the task, then request a stop mid-flight.
        time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        // 20ms task vs 50ms drain bound: it finishes.
        assert_eq!(
            queue.task(task.id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn stop_force_fails_a_task_past_the_drain_bound() {
        let bus = Bus::new(64);
        let queue = Arc::new(TaskQueue::new(bus.clone()));
        let device = DeviceRef::Port(5554);
        let key = device.to_string();

        let task = queue.add_task(&key, shell("slow")).await;
        let automation = Arc::new(FakeAutomation {
            delay: Duration::from_secs(10),
            fail_commands: Vec::new(),
        });
        let runner = WorkerRunner::new(
            device,
            Arc::clone(&queue) as Arc<dyn TaskSource>,
            automation,
            runner_cfg(),
            bus,
        );

        let token = CancellationToken::new();
        let handle = {
            let token = token.clone();
            tokio::spawn(async move { runner.run(token).await })
        };

        time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let stored = queue.task(task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.error.unwrap().contains("drain timeout"));
    }

    #[tokio::test]
    async fn idle_runner_emits_heartbeats_with_depth() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let queue = Arc::new(TaskQueue::new(bus.clone()));
        let device = DeviceRef::Port(5554);

        let runner = WorkerRunner::new(
            device,
            Arc::clone(&queue) as Arc<dyn TaskSource>,
            FakeAutomation::instant(),
            runner_cfg(),
            bus,
        );

        let token = CancellationToken::new();
        let handle = {
            let token = token.clone();
            tokio::spawn(async move { runner.run(token).await })
        };

        let heartbeat = async {
            loop {
                if let Ok(ev) = rx.recv().await {
                    if ev.kind == EventKind::WorkerHeartbeat {
                        return ev;
                    }
                }
            }
        };
        let ev = time::timeout(Duration::from_secs(2), heartbeat)
            .await
            .unwrap();
        assert_eq!(ev.device.as_deref(), Some("port:5554"));
        assert_eq!(ev.depth, Some(0));

        token.cancel();
        handle.await.unwrap();
    }
}
