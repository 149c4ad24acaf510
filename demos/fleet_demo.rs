//! End-to-end demo: one emulated device, a few queued tasks, and an
//! in-process worker loop draining them through the pool and gates.
//!
//! Expects a bridge tool (`adb`) on PATH and a device attached as
//! `emulator-5554`. Run with:
//!
//! ```sh
//! cargo run --example fleet_demo
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use fleetvisor::{
    BridgeAutomation, Bus, Config, ConnectionPool, DeviceRef, GateSet, LogWriter, ShellBridge,
    Subscribe, SubscriberSet, TaskKind, TaskQueue, TaskSource, WorkerRunner,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut cfg = Config::default();
    cfg.runner.poll_interval = std::time::Duration::from_millis(500);

    let bus = Bus::new(cfg.bus_capacity_clamped());
    let token = CancellationToken::new();

    // Event fan-out: everything the runtime does lands in the log.
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::default())];
    let set = Arc::new(SubscriberSet::new(subs, bus.clone()));
    let listener = set.spawn_listener(token.clone());

    let pool = ConnectionPool::new(
        Arc::new(ShellBridge::new("adb")),
        cfg.pool.clone(),
        bus.clone(),
    );
    pool.spawn_sweeper(token.clone());
    let gates = Arc::new(GateSet::new(&cfg.gates, bus.clone()));
    let queue = Arc::new(TaskQueue::new(bus.clone()));
    queue.spawn_cleanup(&cfg.queue, token.clone());

    let device = DeviceRef::Port(5554);
    let key = device.to_string();

    queue
        .add_task(
            &key,
            TaskKind::Shell {
                command: "shell getprop ro.build.version.release".into(),
            },
        )
        .await;
    queue
        .add_task(
            &key,
            TaskKind::Screenshot {
                output: "/sdcard/demo.png".into(),
            },
        )
        .await;

    let automation = Arc::new(BridgeAutomation::new(Arc::clone(&pool), gates));
    let runner = WorkerRunner::new(
        device,
        Arc::clone(&queue) as Arc<dyn TaskSource>,
        automation,
        cfg.runner.clone(),
        bus.clone(),
    );

    let runner_token = token.clone();
    let runner_handle = tokio::spawn(async move { runner.run(runner_token).await });

    tracing::info!("draining tasks for {key}; press Ctrl-C to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("stop requested"),
        _ = wait_for_drain(&queue) => tracing::info!("all tasks terminal"),
    }

    token.cancel();
    runner_handle.await?;

    let stats = queue.stats().await;
    tracing::info!(
        completed = stats.completed,
        failed = stats.failed,
        "demo finished"
    );

    // The listener holds the last clone of the set; join it before
    // reclaiming sole ownership for shutdown.
    listener.await?;
    if let Ok(set) = Arc::try_unwrap(set) {
        set.shutdown().await;
    }
    Ok(())
}

async fn wait_for_drain(queue: &TaskQueue) {
    loop {
        let stats = queue.stats().await;
        if stats.pending == 0 && stats.processing == 0 && stats.total > 0 {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }
}
