/// Health checking for registered backends
///
/// Each backend gets its own cancellable probe task. Probe results are
/// written into the shared [`BackendPool`]; selection only ever reads the
/// last recorded state and never waits on a probe.
pub mod http;

pub use self::http::HttpHealthProbe;

use crate::core::BackendPool;
use crate::error::{LoadScaleError, LoadScaleResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of a single health probe
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy,
    Unhealthy { reason: String },
    Timeout,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Healthy => write!(f, "Healthy"),
            ProbeOutcome::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            ProbeOutcome::Timeout => write!(f, "Timeout"),
        }
    }
}

impl ProbeOutcome {
    /// Check if the outcome represents a healthy backend
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Healthy)
    }

    /// The failed outcome as an error, `None` when healthy
    pub fn failure(&self) -> Option<LoadScaleError> {
        match self {
            ProbeOutcome::Healthy => None,
            other => Some(LoadScaleError::health_check(other.to_string())),
        }
    }
}

/// Address of the backend being probed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub backend_id: String,
    pub host: String,
    pub port: u16,
}

impl ProbeTarget {
    pub fn address(&self) -> String {
        crate::utils::format_address(&self.host, self.port)
    }
}

/// Health probe trait
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe a backend once. Timeouts are applied by the caller.
    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome;
}

/// Timing for the per-backend probe loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

struct MonitorSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Manages the probe tasks of every registered backend
pub struct HealthMonitor {
    pool: BackendPool,
    probe: Arc<dyn HealthProbe>,
    settings: HealthSettings,
    monitors: Arc<RwLock<HashMap<String, MonitorSlot>>>,
}

impl HealthMonitor {
    pub fn new(pool: BackendPool, probe: Arc<dyn HealthProbe>, settings: HealthSettings) -> Self {
        Self {
            pool,
            probe,
            settings,
            monitors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> HealthSettings {
        self.settings
    }

    /// Start probing a backend: once immediately, then every interval
    pub async fn start_monitor(&self, target: ProbeTarget) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let backend_id = target.backend_id.clone();

        let handle = tokio::spawn(run_health_loop(
            self.pool.clone(),
            Arc::clone(&self.probe),
            target,
            self.settings,
            shutdown_rx,
        ));

        let previous = {
            let mut monitors = self.monitors.write().await;
            monitors.insert(
                backend_id.clone(),
                MonitorSlot {
                    handle,
                    shutdown_tx,
                },
            )
        };
        if let Some(old) = previous {
            stop_slot(old).await;
        }

        debug!(
            backend = %backend_id,
            interval_secs = self.settings.interval.as_secs(),
            "health monitor started"
        );
    }

    /// Stop probing a backend.
    ///
    /// Waits for the task to finish, so no probe result for this backend is
    /// recorded after this returns.
    pub async fn stop_monitor(&self, backend_id: &str) -> bool {
        let slot = self.monitors.write().await.remove(backend_id);
        match slot {
            Some(slot) => {
                stop_slot(slot).await;
                debug!(backend = %backend_id, "health monitor stopped");
                true
            }
            None => false,
        }
    }

    /// Stop all monitors (for graceful shutdown)
    pub async fn stop_all(&self) {
        let slots: Vec<MonitorSlot> = {
            let mut monitors = self.monitors.write().await;
            monitors.drain().map(|(_, slot)| slot).collect()
        };
        let count = slots.len();
        for slot in slots {
            stop_slot(slot).await;
        }
        if count > 0 {
            info!(count, "all health monitors stopped");
        }
    }

    pub async fn monitored_count(&self) -> usize {
        self.monitors.read().await.len()
    }

    /// Run one probe outside the schedule, through the same recording path
    pub async fn check_now(&self, target: &ProbeTarget) -> LoadScaleResult<ProbeOutcome> {
        check_backend(&self.pool, self.probe.as_ref(), target, self.settings.timeout)
            .await
            .ok_or_else(|| LoadScaleError::not_found("backend", target.backend_id.clone()))
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Ok(mut monitors) = self.monitors.try_write() {
            for (_, slot) in monitors.drain() {
                slot.handle.abort();
            }
        }
    }
}

async fn stop_slot(slot: MonitorSlot) {
    let _ = slot.shutdown_tx.send(true);
    slot.handle.abort();
    let _ = slot.handle.await;
}

/// Probe a backend with a bounded timeout and record the result.
///
/// Returns `None` when the backend was deregistered in the meantime.
pub async fn check_backend(
    pool: &BackendPool,
    probe: &dyn HealthProbe,
    target: &ProbeTarget,
    check_timeout: Duration,
) -> Option<ProbeOutcome> {
    let started = Instant::now();
    let outcome = match timeout(check_timeout, probe.probe(target)).await {
        Ok(outcome) => outcome,
        Err(_) => ProbeOutcome::Timeout,
    };
    let latency = started.elapsed();

    let transition = pool
        .record_health(&target.backend_id, outcome.is_healthy(), Some(latency))
        .await?;

    match &outcome {
        ProbeOutcome::Healthy => {
            debug!(
                backend = %target.backend_id,
                latency_ms = latency.as_millis() as u64,
                "backend is healthy"
            );
        }
        ProbeOutcome::Unhealthy { reason } => {
            debug!(backend = %target.backend_id, %reason, "backend probe failed");
        }
        ProbeOutcome::Timeout => {
            debug!(
                backend = %target.backend_id,
                timeout_ms = check_timeout.as_millis() as u64,
                "backend probe timed out"
            );
        }
    }

    if transition.changed() {
        if outcome.is_healthy() {
            info!(
                backend = %target.backend_id,
                address = %target.address(),
                from = %transition.previous,
                "backend became healthy"
            );
        } else if let Some(failure) = outcome.failure() {
            warn!(
                backend = %target.backend_id,
                address = %target.address(),
                from = %transition.previous,
                error = %failure,
                severity = %failure.severity(),
                "backend became unhealthy"
            );
        }
    }

    Some(outcome)
}

async fn run_health_loop(
    pool: BackendPool,
    probe: Arc<dyn HealthProbe>,
    target: ProbeTarget,
    settings: HealthSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(settings.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let outcome =
                    check_backend(&pool, probe.as_ref(), &target, settings.timeout).await;
                if outcome.is_none() {
                    debug!(backend = %target.backend_id, "backend gone, ending health loop");
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}
