/// Statistics over the backend pool
///
/// Per-backend and aggregate views returned by the distributor, the small
/// numeric helpers behind them, and [`PoolMetricsSource`], which exposes
/// pool statistics to the capacity controller as named metrics.
use crate::balancer::TrafficDistributor;
use crate::core::{Backend, HealthState};
use crate::scaling::MetricsSource;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Fraction of successful samples, 0 when there are none
pub fn success_rate(successes: u64, errors: u64) -> f64 {
    let total = successes + errors;
    if total == 0 {
        0.0
    } else {
        successes as f64 / total as f64
    }
}

/// Arithmetic mean, `None` for an empty input
pub fn mean<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// `used / capacity` as a percentage, 0 for zero capacity
pub fn utilization_percent(used: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        used as f64 * 100.0 / capacity as f64
    }
}

/// Statistics of a single backend
#[derive(Debug, Clone, Serialize)]
pub struct BackendStats {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub current_connections: u32,
    pub max_connections: u32,
    pub health: HealthState,
    pub response_time: Option<Duration>,
    pub last_health_check: Option<SystemTime>,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub uptime: Duration,
}

impl From<&Backend> for BackendStats {
    fn from(backend: &Backend) -> Self {
        Self {
            id: backend.id.clone(),
            host: backend.host.clone(),
            port: backend.port,
            weight: backend.weight,
            current_connections: backend.current_connections,
            max_connections: backend.max_connections,
            health: backend.health,
            response_time: backend.last_response_time,
            last_health_check: backend.last_health_check,
            success_count: backend.success_count,
            error_count: backend.error_count,
            success_rate: success_rate(backend.success_count, backend.error_count),
            uptime: backend.uptime(),
        }
    }
}

/// Aggregate statistics of the whole pool
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub total_backends: usize,
    pub healthy_backends: usize,
    pub total_connections: u64,
    /// Summed connection caps of healthy backends
    pub healthy_capacity: u64,
    pub total_successes: u64,
    pub total_errors: u64,
    pub success_rate: f64,
    /// Mean last probe latency over backends that have one, in milliseconds
    pub avg_response_time_ms: f64,
}

impl PoolStats {
    pub fn from_backends(backends: &[Backend]) -> Self {
        let healthy: Vec<&Backend> = backends
            .iter()
            .filter(|b| b.health == HealthState::Healthy)
            .collect();
        let total_successes = backends.iter().map(|b| b.success_count).sum();
        let total_errors = backends.iter().map(|b| b.error_count).sum();

        Self {
            total_backends: backends.len(),
            healthy_backends: healthy.len(),
            total_connections: backends.iter().map(|b| b.current_connections as u64).sum(),
            healthy_capacity: healthy.iter().map(|b| b.max_connections as u64).sum(),
            total_successes,
            total_errors,
            success_rate: success_rate(total_successes, total_errors),
            avg_response_time_ms: mean(
                backends
                    .iter()
                    .filter_map(|b| b.last_response_time)
                    .map(|latency| latency.as_micros() as f64 / 1000.0),
            )
            .unwrap_or(0.0),
        }
    }

    /// Open connections as a percentage of healthy capacity
    pub fn connection_utilization(&self) -> f64 {
        utilization_percent(self.total_connections, self.healthy_capacity)
    }

    /// Failed probes as a percentage of all probes
    pub fn error_rate_percent(&self) -> f64 {
        utilization_percent(self.total_errors, self.total_successes + self.total_errors)
    }
}

/// Metric names served by [`PoolMetricsSource`]
pub const POOL_METRICS: [&str; 5] = [
    "connection_utilization",
    "error_rate",
    "avg_response_time_ms",
    "healthy_backends",
    "total_connections",
];

/// Serves pool statistics of a distributor as scaling metrics
pub struct PoolMetricsSource {
    distributor: Arc<TrafficDistributor>,
}

impl PoolMetricsSource {
    pub fn new(distributor: Arc<TrafficDistributor>) -> Self {
        Self { distributor }
    }
}

#[async_trait]
impl MetricsSource for PoolMetricsSource {
    async fn metric_value(&self, metric: &str) -> anyhow::Result<f64> {
        let stats = self.distributor.get_pool_stats().await;
        let value = match metric {
            "connection_utilization" => stats.connection_utilization(),
            "error_rate" => stats.error_rate_percent(),
            "avg_response_time_ms" => stats.avg_response_time_ms,
            "healthy_backends" => stats.healthy_backends as f64,
            "total_connections" => stats.total_connections as f64,
            other => anyhow::bail!("unknown pool metric '{}'", other),
        };
        Ok(value)
    }
}
