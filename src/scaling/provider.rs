/// External collaborators of the capacity controller
///
/// The controller never talks to an orchestrator or a metrics backend
/// directly; it goes through these traits. Errors are `anyhow` because the
/// implementations wrap arbitrary foreign clients.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// Fleet or orchestration API that owns the instance count
#[async_trait]
pub trait FleetController: Send + Sync {
    async fn current_instance_count(&self) -> anyhow::Result<u32>;

    async fn apply_scale(&self, target_instances: u32) -> anyhow::Result<()>;
}

/// Source of current metric readings
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn metric_value(&self, metric: &str) -> anyhow::Result<f64>;
}

/// In-memory fleet whose instance count changes when scaled.
pub struct SimulatedFleet {
    instances: AtomicU32,
    apply_delay: Duration,
}

impl SimulatedFleet {
    pub fn new(initial_instances: u32) -> Self {
        Self {
            instances: AtomicU32::new(initial_instances),
            apply_delay: Duration::ZERO,
        }
    }

    /// Wait this long before each scaling call completes
    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    pub fn instances(&self) -> u32 {
        self.instances.load(Ordering::SeqCst)
    }

    pub fn set_instances(&self, instances: u32) {
        self.instances.store(instances, Ordering::SeqCst);
    }
}

#[async_trait]
impl FleetController for SimulatedFleet {
    async fn current_instance_count(&self) -> anyhow::Result<u32> {
        Ok(self.instances())
    }

    async fn apply_scale(&self, target_instances: u32) -> anyhow::Result<()> {
        if !self.apply_delay.is_zero() {
            tokio::time::sleep(self.apply_delay).await;
        }
        let previous = self.instances.swap(target_instances, Ordering::SeqCst);
        debug!(from = previous, to = target_instances, "simulated fleet scaled");
        Ok(())
    }
}

/// Metric readings set by hand
#[derive(Default)]
pub struct StaticMetrics {
    values: RwLock<HashMap<String, f64>>,
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, metric: &str, value: f64) {
        self.values.write().await.insert(metric.to_string(), value);
    }

    pub async fn remove(&self, metric: &str) {
        self.values.write().await.remove(metric);
    }
}

#[async_trait]
impl MetricsSource for StaticMetrics {
    async fn metric_value(&self, metric: &str) -> anyhow::Result<f64> {
        self.values
            .read()
            .await
            .get(metric)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no value for metric '{}'", metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_simulated_fleet() {
        let fleet = SimulatedFleet::new(3);
        assert_eq!(fleet.current_instance_count().await.unwrap(), 3);

        assert_ok!(fleet.apply_scale(5).await);
        assert_eq!(fleet.instances(), 5);

        fleet.set_instances(1);
        assert_eq!(fleet.current_instance_count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_fleet_delay() {
        let fleet = SimulatedFleet::new(1).with_apply_delay(Duration::from_secs(2));
        let started = tokio::time::Instant::now();
        fleet.apply_scale(2).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(fleet.instances(), 2);
    }

    #[tokio::test]
    async fn test_static_metrics() {
        let metrics = StaticMetrics::new();
        assert_err!(metrics.metric_value("cpu").await);

        metrics.set("cpu", 42.0).await;
        assert_eq!(metrics.metric_value("cpu").await.unwrap(), 42.0);

        metrics.remove("cpu").await;
        assert_err!(metrics.metric_value("cpu").await);
    }
}
