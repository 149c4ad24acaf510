//! # ConnectionPool implementation.
//!
//! Turns a [`DeviceRef`] into a working bridge session and dispatches
//! commands over it, with four overlapping protections:
//!
//! - **TTL serial cache**: discovery results are memoized; a resolution
//!   failure invalidates the entry and forces fresh discovery.
//! - **Health records with a freshness window**: a session used recently
//!   skips the explicit probe; an unhealthy record always re-probes.
//! - **In-flight de-duplication**: concurrent identical `(serial, command)`
//!   pairs share one underlying dispatch and one result.
//! - **Single offline retry**: an offline/unresolvable failure invalidates
//!   the cache and retries resolution + execution exactly once.
//!
//! ## Rules
//! - All map state is private to one pool instance; mutation happens only
//!   between suspension points (single-writer, read-after-write consistent).
//! - A timed-out command raises [`PoolError::CommandTimeout`] and leaves the
//!   bridge process running (orphaned side effects are the caller's risk).
//! - Recovery of an unhealthy device is the caller's responsibility; the
//!   pool only reports [`PoolError::Unhealthy`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{RwLock, broadcast};
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::DeviceRef;
use super::record::{ConnectionRecord, SerialCacheEntry};
use crate::bridge::Bridge;
use crate::config::PoolConfig;
use crate::error::{BridgeError, PoolError};
use crate::events::{Bus, Event, EventKind};

/// Lightweight probe confirming a session answers at all.
const PROBE_COMMAND: &str = "shell echo ok";

/// Probe deadline when no default command timeout is configured.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

type DispatchKey = (String, String);
type DispatchOutcome = Result<String, PoolError>;
type InflightMap = Arc<StdMutex<HashMap<DispatchKey, broadcast::Sender<DispatchOutcome>>>>;

/// Per-call options for [`ConnectionPool::execute`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecOptions {
    /// Deadline for this command; falls back to the pool's configured
    /// default when `None`.
    pub timeout: Option<Duration>,
    /// Bypass the serial cache and force fresh discovery.
    pub skip_cache: bool,
}

/// Introspection snapshot of the pool's internal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Tracked connection records.
    pub active_connections: usize,
    /// Unexpired serial cache entries.
    pub cached_serials: usize,
    /// Commands currently in flight (after de-duplication).
    pub inflight_commands: usize,
}

/// Resolves device references to healthy bridge sessions and dispatches
/// commands over them.
pub struct ConnectionPool {
    bridge: Arc<dyn Bridge>,
    cfg: PoolConfig,
    bus: Bus,
    connections: RwLock<HashMap<String, ConnectionRecord>>,
    serials: RwLock<HashMap<DeviceRef, SerialCacheEntry>>,
    inflight: InflightMap,
}

/// Removes the in-flight entry when the leader finishes or is cancelled,
/// so coalesced followers never wait on a dispatch that will not settle.
struct InflightGuard {
    map: InflightMap,
    key: DispatchKey,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut map = self
            .map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.remove(&self.key);
    }
}

impl ConnectionPool {
    /// Creates a new pool over the given bridge.
    pub fn new(bridge: Arc<dyn Bridge>, cfg: PoolConfig, bus: Bus) -> Arc<Self> {
        Arc::new(Self {
            bridge,
            cfg,
            bus,
            connections: RwLock::new(HashMap::new()),
            serials: RwLock::new(HashMap::new()),
            inflight: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    /// Executes one command against the referenced device and returns its
    /// stdout.
    ///
    /// Resolution goes through the TTL cache unless `opts.skip_cache` is
    /// set; health is confirmed (probe skipped inside the freshness window);
    /// identical in-flight `(serial, command)` pairs share one dispatch.
    ///
    /// On an offline/unresolvable-class failure the cache entry for `device`
    /// is invalidated and resolution + execution retried exactly once before
    /// the error propagates.
    pub async fn execute(
        &self,
        device: &DeviceRef,
        command: &str,
        opts: ExecOptions,
    ) -> Result<String, PoolError> {
        let timeout = opts.timeout.or_else(|| self.cfg.default_timeout());

        match self
            .execute_once(device, command, timeout, opts.skip_cache)
            .await
        {
            Err(err) if Self::is_offline_class(&err) => {
                self.invalidate(device).await;
                self.execute_once(device, command, timeout, true).await
            }
            other => other,
        }
    }

    /// Resolves once, then dispatches all commands concurrently over the
    /// same session (the bridge supports concurrent dispatch per session).
    ///
    /// Outputs are returned in command order.
    pub async fn execute_batch(
        &self,
        device: &DeviceRef,
        commands: &[String],
    ) -> Result<Vec<String>, PoolError> {
        let timeout = self.cfg.default_timeout();
        let serial = self.resolve(device, false).await?;
        self.confirm_health(&serial).await?;

        let futs = commands
            .iter()
            .map(|command| self.dispatch(&serial, command, timeout));
        let outputs = futures::future::try_join_all(futs).await?;

        self.touch(&serial).await;
        Ok(outputs)
    }

    /// Issues the lightweight probe against `serial`, unconditionally.
    ///
    /// On failure the record is marked unhealthy and
    /// [`PoolError::Unhealthy`] is raised; recovery is **not** automatic
    /// here — relaunching the device is the supervisor's call.
    pub async fn ensure_healthy(&self, serial: &str) -> Result<(), PoolError> {
        let deadline = self.cfg.default_timeout().unwrap_or(PROBE_TIMEOUT);
        match self.dispatch(serial, PROBE_COMMAND, Some(deadline)).await {
            Ok(_) => {
                self.touch(serial).await;
                Ok(())
            }
            Err(err) => {
                let mut conns = self.connections.write().await;
                conns
                    .entry(serial.to_string())
                    .and_modify(|rec| rec.healthy = false)
                    .or_insert_with(|| {
                        let mut rec = ConnectionRecord::touched_now();
                        rec.healthy = false;
                        rec
                    });
                drop(conns);

                self.bus.publish(
                    Event::now(EventKind::ProbeFailed)
                        .with_serial(serial)
                        .with_reason(err.to_string()),
                );
                Err(PoolError::Unhealthy {
                    serial: serial.to_string(),
                })
            }
        }
    }

    /// Evicts idle connection records and expired serial cache entries.
    ///
    /// Bounds memory as devices come and go; normally driven by
    /// [`ConnectionPool::spawn_sweeper`], exposed for direct use in tests
    /// and shutdown paths.
    pub async fn sweep_once(&self) {
        {
            let mut conns = self.connections.write().await;
            let stale: Vec<String> = conns
                .iter()
                .filter(|(_, rec)| rec.is_stale(self.cfg.idle_eviction))
                .map(|(serial, _)| serial.clone())
                .collect();
            for serial in stale {
                conns.remove(&serial);
                self.bus
                    .publish(Event::now(EventKind::ConnectionEvicted).with_serial(serial));
            }
        }

        self.serials.write().await.retain(|_, e| !e.is_expired());
    }

    /// Spawns the periodic staleness sweep, running until the token is
    /// cancelled.
    pub fn spawn_sweeper(self: &Arc<Self>, token: CancellationToken) {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = time::interval(me.cfg.sweep_interval);
            tick.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // The first interval tick fires immediately; skip it.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => me.sweep_once().await,
                }
            }
        });
    }

    /// Returns a snapshot of the pool's internal counters.
    pub async fn stats(&self) -> PoolStats {
        let inflight = self
            .inflight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len();
        PoolStats {
            active_connections: self.connections.read().await.len(),
            cached_serials: self.serials.read().await.len(),
            inflight_commands: inflight,
        }
    }

    /// Drops every serial cache entry, forcing fresh discovery on the next
    /// resolution of any reference.
    pub async fn clear_cache(&self) {
        self.serials.write().await.clear();
    }

    // ---------------------------
    // Internals
    // ---------------------------

    fn is_offline_class(err: &PoolError) -> bool {
        match err {
            PoolError::Bridge(e) => e.is_offline(),
            PoolError::Unresolved { .. } => true,
            _ => false,
        }
    }

    async fn execute_once(
        &self,
        device: &DeviceRef,
        command: &str,
        timeout: Option<Duration>,
        skip_cache: bool,
    ) -> Result<String, PoolError> {
        let serial = self.resolve(device, skip_cache).await?;
        self.confirm_health(&serial).await?;
        let output = self.dispatch(&serial, command, timeout).await?;
        self.touch(&serial).await;
        Ok(output)
    }

    /// Resolves a device reference to a confirmed-attached serial, through
    /// the TTL cache unless bypassed.
    async fn resolve(&self, device: &DeviceRef, skip_cache: bool) -> Result<String, PoolError> {
        if !skip_cache {
            let cache = self.serials.read().await;
            if let Some(entry) = cache.get(device) {
                if !entry.is_expired() {
                    return Ok(entry.serial.clone());
                }
            }
        }

        let expected = device.expected_serial();
        let entries = self.bridge.devices().await.map_err(PoolError::from)?;
        let attached = entries
            .iter()
            .any(|e| e.serial == expected && e.online);
        if !attached {
            return Err(PoolError::Unresolved {
                device: device.to_string(),
            });
        }

        self.serials.write().await.insert(
            device.clone(),
            SerialCacheEntry::new(expected.clone(), self.cfg.serial_ttl),
        );
        Ok(expected)
    }

    /// Probes unless the session was used within the freshness window.
    async fn confirm_health(&self, serial: &str) -> Result<(), PoolError> {
        {
            let conns = self.connections.read().await;
            if let Some(rec) = conns.get(serial) {
                if rec.is_fresh(self.cfg.health_freshness) {
                    return Ok(());
                }
            }
        }
        self.ensure_healthy(serial).await
    }

    /// Coalesced, deadline-raced dispatch of one command.
    async fn dispatch(
        &self,
        serial: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, PoolError> {
        let key = (serial.to_string(), command.to_string());

        enum Role {
            Leader(broadcast::Sender<DispatchOutcome>),
            Follower(broadcast::Receiver<DispatchOutcome>),
        }

        let role = {
            let mut map = self
                .inflight
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match map.get(&key) {
                // Subscribing under the lock guarantees the receiver exists
                // before the leader removes the entry and sends the outcome.
                Some(tx) => Role::Follower(tx.subscribe()),
                None => {
                    let (tx, _rx) = broadcast::channel(1);
                    map.insert(key.clone(), tx.clone());
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(outcome) => outcome,
                Err(_) => Err(PoolError::Bridge(BridgeError::Io {
                    message: "coalesced dispatch was cancelled".to_string(),
                })),
            },
            Role::Leader(tx) => {
                let _guard = InflightGuard {
                    map: Arc::clone(&self.inflight),
                    key,
                };
                let result = self.dispatch_raw(serial, command, timeout).await;
                drop(_guard);
                let _ = tx.send(result.clone());
                result
            }
        }
    }

    async fn dispatch_raw(
        &self,
        serial: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, PoolError> {
        let fut = self.bridge.execute(serial, command);
        let output = match timeout {
            Some(dur) => match time::timeout(dur, fut).await {
                Ok(res) => res,
                Err(_elapsed) => return Err(PoolError::CommandTimeout { timeout: dur }),
            },
            None => fut.await,
        };
        output.map(|o| o.stdout).map_err(PoolError::from)
    }

    /// Records a successful use of the session.
    async fn touch(&self, serial: &str) {
        self.connections
            .write()
            .await
            .insert(serial.to_string(), ConnectionRecord::touched_now());
    }

    /// Drops the cache entry for `device` after an offline-class failure.
    async fn invalidate(&self, device: &DeviceRef) {
        let removed = self.serials.write().await.remove(device);
        let mut ev = Event::now(EventKind::SerialInvalidated).with_device(device.to_string());
        if let Some(entry) = removed {
            ev = ev.with_serial(entry.serial);
        }
        self.bus.publish(ev);
    }
}
