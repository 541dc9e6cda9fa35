/// loadscale - traffic distribution and metric-driven capacity control
///
/// Two independent components share the idea of an instance pool:
/// 1. [`TrafficDistributor`]: backend registry, health checking, strategy-based
///    selection with connection accounting and optional sticky sessions
/// 2. [`CapacityController`]: scaling policies evaluated on a timer, with
///    cooldowns, bounded steps and a scaling history
///
/// [`LoadScale`] wires both from a [`Config`].
pub mod balancer;
pub mod config;
pub mod core;
pub mod error;
pub mod health;
pub mod metrics;
pub mod scaling;
pub mod utils;

pub use balancer::{BackendSpec, DistributorSettings, Strategy, TrafficDistributor};
pub use config::Config;
pub use error::{LoadScaleError, LoadScaleResult};
pub use health::{HealthProbe, HealthSettings, HttpHealthProbe, ProbeOutcome, ProbeTarget};
pub use metrics::{BackendStats, PoolMetricsSource, PoolStats, POOL_METRICS};
pub use scaling::{
    CapacityController, ControllerSettings, FleetController, MetricsSource, ScaleDirection,
    ScalingEvent, ScalingPolicy,
};

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Both components built from one configuration
pub struct LoadScale {
    config: Config,
    distributor: Arc<TrafficDistributor>,
    controller: Arc<CapacityController>,
}

impl LoadScale {
    /// Validate `config`, build both components and register the configured
    /// backends and policies.
    ///
    /// When `metrics` is `None` the controller reads the distributor's own
    /// pool statistics through [`PoolMetricsSource`].
    pub async fn new(
        config: Config,
        probe: Arc<dyn HealthProbe>,
        fleet: Arc<dyn FleetController>,
        metrics: Option<Arc<dyn MetricsSource>>,
    ) -> LoadScaleResult<Self> {
        config.validate()?;

        let distributor = Arc::new(TrafficDistributor::new(
            probe,
            DistributorSettings {
                default_strategy: config.default_strategy(),
                health: HealthSettings {
                    interval: config.health.interval(),
                    timeout: config.health.timeout(),
                },
                session_cleanup_interval: Duration::from_secs(config.sessions.cleanup_interval_sec),
            },
        ));

        for backend in &config.backends {
            let spec = BackendSpec::new(backend.host.clone(), backend.port)
                .with_weight(backend.weight)
                .with_max_connections(
                    backend
                        .max_connections
                        .unwrap_or(config.balancer.max_connections_per_backend),
                );
            distributor.register_backend(spec).await?;
        }

        if config.sessions.sticky {
            distributor
                .enable_sticky_sessions(Duration::from_secs(config.sessions.ttl_sec))
                .await;
        }

        let uses_pool_metrics = metrics.is_none();
        let metrics = metrics.unwrap_or_else(|| {
            Arc::new(PoolMetricsSource::new(Arc::clone(&distributor))) as Arc<dyn MetricsSource>
        });

        let controller = Arc::new(CapacityController::new(
            fleet,
            metrics,
            ControllerSettings {
                evaluation_interval: Duration::from_secs(config.scaling.evaluation_interval_sec),
                evaluation_timeout: Duration::from_secs(config.scaling.evaluation_timeout_sec),
                execution_timeout: Duration::from_secs(config.scaling.execution_timeout_sec),
                history_limit: config.scaling.history_limit,
            },
        ));

        for policy in &config.scaling.policies {
            if uses_pool_metrics && !POOL_METRICS.contains(&policy.metric.as_str()) {
                warn!(
                    policy = %policy.name,
                    metric = %policy.metric,
                    "Policy metric is not a pool metric and will fail to evaluate"
                );
            }
            controller.add_policy(policy.to_policy()).await?;
        }

        info!(
            backends = config.backends.len(),
            policies = config.scaling.policies.len(),
            strategy = %config.default_strategy(),
            "loadscale initialized"
        );

        Ok(Self {
            config,
            distributor,
            controller,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn distributor(&self) -> Arc<TrafficDistributor> {
        Arc::clone(&self.distributor)
    }

    pub fn controller(&self) -> Arc<CapacityController> {
        Arc::clone(&self.controller)
    }

    /// Start the capacity controller loop when scaling is enabled.
    ///
    /// Health monitors run from registration onwards and need no start.
    pub async fn start(&self) -> bool {
        if !self.config.scaling.enabled {
            info!("Scaling disabled, capacity controller not started");
            return false;
        }
        self.controller.start().await
    }

    /// Stop the controller loop, every health monitor and the session sweep
    pub async fn shutdown(&self) {
        self.controller.stop().await;
        self.distributor.shutdown().await;
        info!("loadscale shut down");
    }
}
