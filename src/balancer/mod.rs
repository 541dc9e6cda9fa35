/// Traffic distribution across the registered backend pool
///
/// The [`TrafficDistributor`] owns the pool, one health monitor task per
/// backend and the optional sticky session table. Request handling code calls
/// [`TrafficDistributor::select_backend`] for every inbound request and
/// [`TrafficDistributor::release_connection`] once the request completes.
pub mod strategy;

pub use strategy::{SelectionAlgorithm, Strategy};

use crate::core::{Backend, BackendPool, SessionManager};
use crate::error::{LoadScaleError, LoadScaleResult};
use crate::health::{HealthMonitor, HealthProbe, HealthSettings, ProbeOutcome, ProbeTarget};
use crate::metrics::{BackendStats, PoolStats};
use crate::utils::generate_id;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default per-backend connection cap
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1000;

/// Registration request for a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub max_connections: u32,
}

impl BackendSpec {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 1,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    fn validate(&self) -> LoadScaleResult<()> {
        if self.host.trim().is_empty() {
            return Err(LoadScaleError::invalid_backend("host is required"));
        }
        if self.port == 0 {
            return Err(LoadScaleError::invalid_backend("port is required"));
        }
        if self.weight == 0 {
            return Err(LoadScaleError::invalid_backend("weight must be at least 1"));
        }
        if self.max_connections == 0 {
            return Err(LoadScaleError::invalid_backend(
                "max_connections must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Distributor settings
#[derive(Debug, Clone)]
pub struct DistributorSettings {
    pub default_strategy: Strategy,
    pub health: HealthSettings,
    /// Sweep interval for expired sticky sessions
    pub session_cleanup_interval: Duration,
}

impl Default for DistributorSettings {
    fn default() -> Self {
        Self {
            default_strategy: Strategy::RoundRobin,
            health: HealthSettings::default(),
            session_cleanup_interval: Duration::from_secs(300),
        }
    }
}

struct StickySessions {
    manager: SessionManager,
    cleanup: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl Drop for StickySessions {
    fn drop(&mut self) {
        self.cleanup.abort();
    }
}

/// Backend registry, health checking and per-request selection
///
/// Dropping the distributor aborts its health loops and session sweep.
/// [`TrafficDistributor::shutdown`] stops them and waits for them to finish.
pub struct TrafficDistributor {
    pool: BackendPool,
    monitor: HealthMonitor,
    sticky: RwLock<Option<StickySessions>>,
    settings: DistributorSettings,
    // Serializes register/deregister so monitor start/stop pairs stay ordered.
    registration: Mutex<()>,
}

impl TrafficDistributor {
    pub fn new(probe: Arc<dyn HealthProbe>, settings: DistributorSettings) -> Self {
        let pool = BackendPool::new();
        let monitor = HealthMonitor::new(pool.clone(), probe, settings.health);
        Self {
            pool,
            monitor,
            sticky: RwLock::new(None),
            settings,
            registration: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &DistributorSettings {
        &self.settings
    }

    /// Shared handle to the backend pool
    pub fn pool(&self) -> BackendPool {
        self.pool.clone()
    }

    /// Register a backend and start probing it right away
    pub async fn register_backend(&self, spec: BackendSpec) -> LoadScaleResult<Backend> {
        spec.validate()?;
        let _guard = self.registration.lock().await;

        let backend = Backend::new(
            generate_id("backend"),
            spec.host,
            spec.port,
            spec.weight,
            spec.max_connections,
        );
        self.pool.insert(backend.clone()).await;
        self.monitor.start_monitor(probe_target(&backend)).await;

        info!(
            backend = %backend.id,
            address = %backend.address(),
            weight = backend.weight,
            max_connections = backend.max_connections,
            "backend registered"
        );
        Ok(backend)
    }

    /// Stop the backend's health checks and remove it from the pool
    pub async fn deregister_backend(&self, backend_id: &str) -> LoadScaleResult<Backend> {
        let _guard = self.registration.lock().await;
        if !self.pool.contains(backend_id).await {
            return Err(LoadScaleError::not_found("backend", backend_id));
        }

        self.monitor.stop_monitor(backend_id).await;
        let backend = self
            .pool
            .remove(backend_id)
            .await
            .ok_or_else(|| LoadScaleError::not_found("backend", backend_id))?;

        if let Some(sticky) = self.sticky.read().await.as_ref() {
            let dropped = sticky.manager.remove_backend(backend_id).await;
            if dropped > 0 {
                debug!(
                    backend = %backend_id,
                    dropped,
                    "dropped sticky sessions of removed backend"
                );
            }
        }

        info!(backend = %backend_id, address = %backend.address(), "backend deregistered");
        Ok(backend)
    }

    /// Pick a backend for one request and count the new connection.
    ///
    /// A live sticky binding for `session_id` wins over `strategy` as long as
    /// its backend is still healthy and under capacity. `session_id` doubles
    /// as the hash key for [`Strategy::IpHash`].
    pub async fn select_backend(
        &self,
        strategy: Strategy,
        session_id: Option<&str>,
    ) -> LoadScaleResult<Backend> {
        let sessions = self.session_manager().await;

        let bound = match (&sessions, session_id) {
            (Some(manager), Some(session)) => manager
                .lookup(session)
                .await
                .map(|binding| binding.backend_id),
            _ => None,
        };

        let (backend, reused) = self
            .pool
            .acquire(bound.as_deref(), |candidates| {
                strategy.select(candidates, session_id)
            })
            .await?;

        if let (Some(manager), Some(session)) = (&sessions, session_id) {
            if !reused {
                manager.bind(session, &backend.id).await;
            }
        }

        debug!(
            backend = %backend.id,
            %strategy,
            sticky = reused,
            connections = backend.current_connections,
            "backend selected"
        );
        Ok(backend)
    }

    /// Select with the configured default strategy
    pub async fn select_default_backend(
        &self,
        session_id: Option<&str>,
    ) -> LoadScaleResult<Backend> {
        self.select_backend(self.settings.default_strategy, session_id)
            .await
    }

    /// Select by strategy name; unknown names fall back to round-robin
    pub async fn select_backend_by_name(
        &self,
        strategy: &str,
        session_id: Option<&str>,
    ) -> LoadScaleResult<Backend> {
        self.select_backend(Strategy::parse_or_default(strategy), session_id)
            .await
    }

    /// Mark one connection of the backend as finished
    pub async fn release_connection(&self, backend_id: &str) -> LoadScaleResult<u32> {
        self.adjust_connections(backend_id, -1).await
    }

    /// Adjust the connection count by `delta`, clamped at zero
    pub async fn adjust_connections(&self, backend_id: &str, delta: i64) -> LoadScaleResult<u32> {
        self.pool.adjust_connections(backend_id, delta).await
    }

    pub async fn get_backend(&self, backend_id: &str) -> LoadScaleResult<Backend> {
        self.pool
            .get(backend_id)
            .await
            .ok_or_else(|| LoadScaleError::not_found("backend", backend_id))
    }

    /// All backends, sorted by ID
    pub async fn list_backends(&self) -> Vec<Backend> {
        self.pool.list().await
    }

    pub async fn set_backend_weight(
        &self,
        backend_id: &str,
        weight: u32,
    ) -> LoadScaleResult<Backend> {
        self.pool.set_weight(backend_id, weight).await
    }

    pub async fn get_backend_stats(&self, backend_id: &str) -> LoadScaleResult<BackendStats> {
        self.get_backend(backend_id)
            .await
            .map(|backend| BackendStats::from(&backend))
    }

    pub async fn get_pool_stats(&self) -> PoolStats {
        PoolStats::from_backends(&self.pool.list().await)
    }

    /// Probe a backend immediately, outside its schedule
    pub async fn check_backend_now(&self, backend_id: &str) -> LoadScaleResult<ProbeOutcome> {
        let backend = self.get_backend(backend_id).await?;
        self.monitor.check_now(&probe_target(&backend)).await
    }

    pub async fn monitored_backends(&self) -> usize {
        self.monitor.monitored_count().await
    }

    /// Enable sticky sessions with the given binding lifetime.
    ///
    /// Re-enabling replaces the session table, dropping existing bindings.
    pub async fn enable_sticky_sessions(&self, ttl: Duration) {
        let manager = SessionManager::new(ttl);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cleanup = tokio::spawn(
            manager
                .clone()
                .run_cleanup(self.settings.session_cleanup_interval, shutdown_rx),
        );

        let previous = self.sticky.write().await.replace(StickySessions {
            manager,
            cleanup,
            shutdown_tx,
        });
        if let Some(previous) = previous {
            stop_sticky(previous).await;
        }

        info!(ttl_secs = ttl.as_secs(), "sticky sessions enabled");
    }

    /// Disable sticky sessions and drop every binding
    pub async fn disable_sticky_sessions(&self) {
        let previous = self.sticky.write().await.take();
        if let Some(previous) = previous {
            stop_sticky(previous).await;
            info!("sticky sessions disabled");
        }
    }

    pub async fn sticky_sessions_enabled(&self) -> bool {
        self.sticky.read().await.is_some()
    }

    /// Backend currently bound to a session, if the binding is live
    pub async fn get_sticky_session_backend(&self, session_id: &str) -> Option<Backend> {
        let manager = self.session_manager().await?;
        let binding = manager.lookup(session_id).await?;
        self.pool.get(&binding.backend_id).await
    }

    /// Sweep expired bindings now; returns how many were removed
    pub async fn cleanup_expired_sessions(&self) -> usize {
        match self.session_manager().await {
            Some(manager) => manager.cleanup_expired_sessions().await,
            None => 0,
        }
    }

    pub async fn session_count(&self) -> usize {
        match self.session_manager().await {
            Some(manager) => manager.session_count().await,
            None => 0,
        }
    }

    /// Cancel every health monitor and the session sweep
    pub async fn shutdown(&self) {
        self.monitor.stop_all().await;
        self.disable_sticky_sessions().await;
        info!("traffic distributor stopped");
    }

    async fn session_manager(&self) -> Option<SessionManager> {
        self.sticky
            .read()
            .await
            .as_ref()
            .map(|sticky| sticky.manager.clone())
    }
}

fn probe_target(backend: &Backend) -> ProbeTarget {
    ProbeTarget {
        backend_id: backend.id.clone(),
        host: backend.host.clone(),
        port: backend.port,
    }
}

async fn stop_sticky(mut sticky: StickySessions) {
    let _ = sticky.shutdown_tx.send(true);
    sticky.cleanup.abort();
    let _ = (&mut sticky.cleanup).await;
}
