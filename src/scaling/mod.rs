/// Metric-driven capacity control
///
/// The [`CapacityController`] owns a registry of [`ScalingPolicy`] values and
/// evaluates every enabled policy on each tick. Metric readings and the
/// instance count come from injected [`MetricsSource`] and [`FleetController`]
/// implementations; scaling actions go back through the fleet controller and
/// are recorded in a bounded [`ScalingHistory`].
pub mod cooldown;
pub mod history;
pub mod policy;
pub mod provider;

pub use cooldown::CooldownTracker;
pub use history::{EventStatus, ScalingEvent, ScalingHistory, MANUAL_POLICY};
pub use policy::{PolicyUpdate, ScaleDecision, ScaleDirection, ScalingPolicy};
pub use provider::{FleetController, MetricsSource, SimulatedFleet, StaticMetrics};

use crate::error::{ErrorSeverity, LoadScaleError, LoadScaleResult};
use crate::utils::format_duration;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Window used for the recent action count in [`ControllerStatus`]
const RECENT_ACTIONS_WINDOW: Duration = Duration::from_secs(3600);

/// Controller timing and retention settings
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// Delay between ticks
    pub evaluation_interval: Duration,
    /// Bound on reading the metric and instance count for one policy
    pub evaluation_timeout: Duration,
    /// Bound on a single fleet scaling call
    pub execution_timeout: Duration,
    pub history_limit: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(30),
            evaluation_timeout: Duration::from_secs(10),
            execution_timeout: Duration::from_secs(60),
            history_limit: 1000,
        }
    }
}

/// A cooldown that is still running
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CooldownStatus {
    pub policy: String,
    pub direction: ScaleDirection,
    pub remaining: Duration,
}

/// Snapshot of controller state
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub running: bool,
    pub total_policies: usize,
    pub enabled_policies: usize,
    /// Scaling events recorded in the last hour
    pub recent_actions: usize,
    pub active_cooldowns: Vec<CooldownStatus>,
}

struct ControllerState {
    policies: RwLock<BTreeMap<String, ScalingPolicy>>,
    cooldowns: Mutex<CooldownTracker>,
    history: Mutex<ScalingHistory>,
    fleet: Arc<dyn FleetController>,
    metrics: Arc<dyn MetricsSource>,
    settings: ControllerSettings,
}

struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Policy registry plus the periodic evaluation loop
pub struct CapacityController {
    state: Arc<ControllerState>,
    task: Mutex<Option<LoopHandle>>,
}

impl CapacityController {
    pub fn new(
        fleet: Arc<dyn FleetController>,
        metrics: Arc<dyn MetricsSource>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            state: Arc::new(ControllerState {
                policies: RwLock::new(BTreeMap::new()),
                cooldowns: Mutex::new(CooldownTracker::new()),
                history: Mutex::new(ScalingHistory::new(settings.history_limit)),
                fleet,
                metrics,
                settings,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.state.settings
    }

    /// Register a new policy; names must be unique
    pub async fn add_policy(&self, policy: ScalingPolicy) -> LoadScaleResult<()> {
        policy.validate()?;
        let mut policies = self.state.policies.write().await;
        if policies.contains_key(&policy.name) {
            return Err(LoadScaleError::invalid_policy(format!(
                "policy '{}' already exists",
                policy.name
            )));
        }
        info!(policy = %policy.name, metric = %policy.metric, "Added scaling policy");
        policies.insert(policy.name.clone(), policy);
        Ok(())
    }

    /// Apply a partial update; the policy is left unchanged if the result is invalid
    pub async fn update_policy(
        &self,
        name: &str,
        update: PolicyUpdate,
    ) -> LoadScaleResult<ScalingPolicy> {
        let mut policies = self.state.policies.write().await;
        let current = policies
            .get(name)
            .ok_or_else(|| LoadScaleError::not_found("policy", name))?;
        let updated = update.apply_to(current)?;
        policies.insert(name.to_string(), updated.clone());
        info!(policy = %name, "Updated scaling policy");
        Ok(updated)
    }

    /// Remove a policy together with its cooldown state
    pub async fn delete_policy(&self, name: &str) -> LoadScaleResult<ScalingPolicy> {
        let removed = self
            .state
            .policies
            .write()
            .await
            .remove(name)
            .ok_or_else(|| LoadScaleError::not_found("policy", name))?;
        self.state.cooldowns.lock().await.forget(name);
        info!(policy = %name, "Deleted scaling policy");
        Ok(removed)
    }

    /// All policies, ordered by name
    pub async fn get_policies(&self) -> Vec<ScalingPolicy> {
        self.state.policies.read().await.values().cloned().collect()
    }

    pub async fn get_policy(&self, name: &str) -> LoadScaleResult<ScalingPolicy> {
        self.state
            .policies
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| LoadScaleError::not_found("policy", name))
    }

    /// Up to `limit` events, most recent first
    pub async fn get_scaling_history(&self, limit: usize) -> Vec<ScalingEvent> {
        self.state.history.lock().await.recent(limit)
    }

    pub async fn get_status(&self) -> ControllerStatus {
        let running = self.is_running().await;
        let policies = self.state.policies.read().await;
        let now = Instant::now();

        let active_cooldowns = {
            let cooldowns = self.state.cooldowns.lock().await;
            policies
                .values()
                .flat_map(|policy| {
                    [ScaleDirection::ScaleUp, ScaleDirection::ScaleDown]
                        .into_iter()
                        .filter_map(|direction| {
                            cooldowns
                                .remaining(&policy.name, direction, policy.cooldown(direction), now)
                                .map(|remaining| CooldownStatus {
                                    policy: policy.name.clone(),
                                    direction,
                                    remaining,
                                })
                        })
                        .collect::<Vec<_>>()
                })
                .collect()
        };

        ControllerStatus {
            running,
            total_policies: policies.len(),
            enabled_policies: policies.values().filter(|p| p.enabled).count(),
            recent_actions: self
                .state
                .history
                .lock()
                .await
                .count_within(RECENT_ACTIONS_WINDOW),
            active_cooldowns,
        }
    }

    /// Scale to `target_instances` without consulting any policy.
    ///
    /// The event is attributed to [`MANUAL_POLICY`] and every registered
    /// policy enters its cooldown for `direction`. A failed fleet call is
    /// reported through the returned event, not as an error.
    pub async fn force_scale(
        &self,
        direction: ScaleDirection,
        target_instances: u32,
        reason: impl Into<String>,
    ) -> LoadScaleResult<ScalingEvent> {
        let state = &self.state;
        let current = match timeout(
            state.settings.evaluation_timeout,
            state.fleet.current_instance_count(),
        )
        .await
        {
            Ok(Ok(current)) => current,
            Ok(Err(e)) => return Err(LoadScaleError::scaling_execution(e.to_string())),
            Err(_) => return Err(LoadScaleError::timeout("current_instance_count")),
        };

        {
            let policies = state.policies.read().await;
            let mut cooldowns = state.cooldowns.lock().await;
            let now = Instant::now();
            for name in policies.keys() {
                cooldowns.record(name, direction, now);
            }
        }

        let reason = reason.into();
        info!(
            %direction,
            from = current,
            to = target_instances,
            %reason,
            "Manual scaling requested"
        );
        let event = ScalingEvent::pending(
            direction,
            current,
            target_instances,
            MANUAL_POLICY,
            Some(reason),
        );
        Ok(state.execute(event).await)
    }

    /// Run one evaluation tick now and return the events it produced
    pub async fn evaluate_now(&self) -> Vec<ScalingEvent> {
        self.state.tick().await
    }

    /// Start the periodic evaluation loop; `false` if it is already running
    pub async fn start(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let handle = tokio::spawn(async move { state.run(shutdown_rx).await });
        *task = Some(LoopHandle {
            shutdown_tx,
            handle,
        });
        true
    }

    /// Stop the evaluation loop; `false` if it was not running.
    ///
    /// An in-flight tick gets the evaluation and execution timeouts to finish
    /// before the task is aborted. Nothing runs after this returns.
    pub async fn stop(&self) -> bool {
        let Some(LoopHandle {
            shutdown_tx,
            mut handle,
        }) = self.task.lock().await.take()
        else {
            return false;
        };

        let _ = shutdown_tx.send(true);
        let grace = self.state.settings.evaluation_timeout + self.state.settings.execution_timeout;
        if timeout(grace, &mut handle).await.is_err() {
            warn!("Capacity controller did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }
        info!("Capacity controller stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }
}

impl ControllerState {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let interval = self.settings.evaluation_interval;
        info!(interval_secs = interval.as_secs(), "Capacity controller started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let events = self.tick().await;
                    debug!(events = events.len(), "Controller tick finished");
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
    }

    /// Evaluate every enabled policy concurrently and execute their decisions
    async fn tick(&self) -> Vec<ScalingEvent> {
        let policies: Vec<ScalingPolicy> = self
            .policies
            .read()
            .await
            .values()
            .filter(|p| p.enabled)
            .cloned()
            .collect();

        let results = join_all(policies.iter().map(|policy| self.run_policy(policy))).await;

        let mut events = Vec::new();
        for (policy, result) in policies.iter().zip(results) {
            match result {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => log_policy_error(&policy.name, &e),
            }
        }
        events
    }

    async fn run_policy(&self, policy: &ScalingPolicy) -> LoadScaleResult<Option<ScalingEvent>> {
        let (value, current) = timeout(self.settings.evaluation_timeout, self.read_inputs(policy))
            .await
            .map_err(|_| LoadScaleError::policy_evaluation(&policy.name, "evaluation timed out"))??;

        let decision = {
            let mut cooldowns = self.cooldowns.lock().await;
            let now = Instant::now();
            let decision = policy.decide(value, current, |direction| {
                let remaining =
                    cooldowns.remaining(&policy.name, direction, policy.cooldown(direction), now);
                if let Some(remaining) = remaining {
                    debug!(
                        policy = %policy.name,
                        %direction,
                        remaining = %format_duration(remaining),
                        "Threshold crossed during cooldown"
                    );
                }
                remaining.is_some()
            });
            if let ScaleDecision::Scale { direction, .. } = decision {
                // Claimed here so an overlapping evaluation sees the cooldown.
                cooldowns.record(&policy.name, direction, now);
            }
            decision
        };

        match decision {
            ScaleDecision::Scale { direction, target } => {
                let threshold = match direction {
                    ScaleDirection::ScaleUp => policy.scale_up_threshold,
                    ScaleDirection::ScaleDown => policy.scale_down_threshold,
                };
                let reason = format!(
                    "{} = {} crossed threshold {}",
                    policy.metric, value, threshold
                );
                let event =
                    ScalingEvent::pending(direction, current, target, &policy.name, Some(reason));
                Ok(Some(self.execute(event).await))
            }
            ScaleDecision::NoChange => {
                debug!(policy = %policy.name, value, current, "No scaling needed");
                Ok(None)
            }
        }
    }

    async fn read_inputs(&self, policy: &ScalingPolicy) -> LoadScaleResult<(f64, u32)> {
        let value = self
            .metrics
            .metric_value(&policy.metric)
            .await
            .map_err(|e| LoadScaleError::policy_evaluation(&policy.name, e.to_string()))?;
        let current = self
            .fleet
            .current_instance_count()
            .await
            .map_err(|e| LoadScaleError::policy_evaluation(&policy.name, e.to_string()))?;
        Ok((value, current))
    }

    /// Record the event as pending, call the fleet and settle the event
    async fn execute(&self, event: ScalingEvent) -> ScalingEvent {
        self.history.lock().await.push(event.clone());
        info!(
            policy = %event.policy,
            action = %event.action,
            from = event.from_instances,
            to = event.target_instances,
            "Executing scaling action"
        );

        let outcome = match timeout(
            self.settings.execution_timeout,
            self.fleet.apply_scale(event.target_instances),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(LoadScaleError::scaling_execution(e.to_string())),
            Err(_) => Err(LoadScaleError::timeout("apply_scale")),
        };

        let (status, failure) = match outcome {
            Ok(()) => {
                info!(
                    policy = %event.policy,
                    to = event.target_instances,
                    "Scaling action completed"
                );
                (EventStatus::Completed, None)
            }
            Err(e) => {
                log_policy_error(&event.policy, &e);
                (EventStatus::Failed, Some(e.to_string()))
            }
        };

        let mut history = self.history.lock().await;
        match history.settle(&event.id, status, failure.clone()) {
            Some(settled) => settled,
            // Already evicted by newer events.
            None => ScalingEvent {
                status,
                error: failure,
                ..event
            },
        }
    }
}

/// Log a per-policy failure at the level its severity calls for
fn log_policy_error(policy: &str, e: &LoadScaleError) {
    let recoverable = e.is_recoverable();
    match e.severity() {
        ErrorSeverity::Critical | ErrorSeverity::Error => {
            error!(%policy, error = %e, recoverable, "Scaling policy failed")
        }
        ErrorSeverity::Warning => warn!(%policy, error = %e, recoverable, "Scaling policy failed"),
        ErrorSeverity::Info => info!(%policy, error = %e, recoverable, "Scaling policy failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingFleet {
        instances: u32,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FleetController for FailingFleet {
        async fn current_instance_count(&self) -> anyhow::Result<u32> {
            Ok(self.instances)
        }

        async fn apply_scale(&self, _target_instances: u32) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("orchestrator unavailable")
        }
    }

    /// Never answers for `stuck`, delegates everything else
    struct StuckMetrics {
        inner: StaticMetrics,
    }

    #[async_trait]
    impl MetricsSource for StuckMetrics {
        async fn metric_value(&self, metric: &str) -> anyhow::Result<f64> {
            if metric == "stuck" {
                futures::future::pending::<()>().await;
            }
            self.inner.metric_value(metric).await
        }
    }

    fn cpu_policy() -> ScalingPolicy {
        ScalingPolicy::new("cpu", "cpu")
            .with_thresholds(80.0, 20.0)
            .with_instances(1, 10)
            .with_steps(2, 1)
            .with_cooldowns(Duration::from_secs(300), Duration::from_secs(600))
    }

    async fn controller_with(
        instances: u32,
        readings: &[(&str, f64)],
    ) -> (CapacityController, Arc<SimulatedFleet>, Arc<StaticMetrics>) {
        let fleet = Arc::new(SimulatedFleet::new(instances));
        let metrics = Arc::new(StaticMetrics::new());
        for (metric, value) in readings {
            metrics.set(metric, *value).await;
        }
        let controller = CapacityController::new(
            fleet.clone(),
            metrics.clone(),
            ControllerSettings::default(),
        );
        (controller, fleet, metrics)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_up_then_cooldown() {
        let (controller, fleet, metrics) = controller_with(3, &[("cpu", 85.0)]).await;
        controller.add_policy(cpu_policy()).await.unwrap();

        let events = controller.evaluate_now().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, ScaleDirection::ScaleUp);
        assert_eq!(events[0].from_instances, 3);
        assert_eq!(events[0].target_instances, 5);
        assert_eq!(events[0].status, EventStatus::Completed);
        assert_eq!(fleet.instances(), 5);

        metrics.set("cpu", 90.0).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(controller.evaluate_now().await.is_empty());
        assert_eq!(controller.get_scaling_history(10).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let (controller, fleet, _metrics) = controller_with(3, &[("cpu", 85.0)]).await;
        controller.add_policy(cpu_policy()).await.unwrap();

        assert_eq!(controller.evaluate_now().await.len(), 1);
        tokio::time::advance(Duration::from_secs(301)).await;

        let events = controller.evaluate_now().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].target_instances, 7);
        assert_eq!(fleet.instances(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldowns_are_per_direction() {
        let (controller, fleet, metrics) = controller_with(3, &[("cpu", 85.0)]).await;
        controller.add_policy(cpu_policy()).await.unwrap();
        controller.evaluate_now().await;

        metrics.set("cpu", 10.0).await;
        let events = controller.evaluate_now().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, ScaleDirection::ScaleDown);
        assert_eq!(fleet.instances(), 4);
    }

    #[tokio::test]
    async fn test_dead_zone_and_bounds() {
        let (controller, fleet, metrics) = controller_with(10, &[("cpu", 50.0)]).await;
        controller.add_policy(cpu_policy()).await.unwrap();
        assert!(controller.evaluate_now().await.is_empty());

        metrics.set("cpu", 95.0).await;
        assert!(controller.evaluate_now().await.is_empty());

        fleet.set_instances(1);
        metrics.set("cpu", 5.0).await;
        assert!(controller.evaluate_now().await.is_empty());
        assert!(controller.get_scaling_history(10).await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_execution_still_cools_down() {
        let fleet = Arc::new(FailingFleet {
            instances: 3,
            calls: AtomicUsize::new(0),
        });
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 85.0).await;
        let controller =
            CapacityController::new(fleet.clone(), metrics, ControllerSettings::default());
        controller.add_policy(cpu_policy()).await.unwrap();

        let events = controller.evaluate_now().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Failed);
        assert!(events[0]
            .error
            .as_deref()
            .unwrap()
            .contains("orchestrator unavailable"));

        assert!(controller.evaluate_now().await.is_empty());
        assert_eq!(fleet.calls.load(Ordering::SeqCst), 1);

        let history = controller.get_scaling_history(10).await;
        assert_eq!(history[0].status, EventStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_execution_times_out() {
        let fleet = Arc::new(SimulatedFleet::new(3).with_apply_delay(Duration::from_secs(120)));
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 85.0).await;
        let controller = CapacityController::new(fleet, metrics, ControllerSettings::default());
        controller.add_policy(cpu_policy()).await.unwrap();

        let events = controller.evaluate_now().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Failed);
    }

    #[tokio::test]
    async fn test_policy_errors_are_isolated() {
        let (controller, fleet, _metrics) = controller_with(3, &[("cpu", 85.0)]).await;
        controller.add_policy(cpu_policy()).await.unwrap();
        controller
            .add_policy(ScalingPolicy::new("memory", "memory_percent"))
            .await
            .unwrap();

        let events = controller.evaluate_now().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].policy, "cpu");
        assert_eq!(fleet.instances(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_evaluation_times_out() {
        let fleet = Arc::new(SimulatedFleet::new(3));
        let inner = StaticMetrics::new();
        inner.set("cpu", 85.0).await;
        let controller = CapacityController::new(
            fleet.clone(),
            Arc::new(StuckMetrics { inner }),
            ControllerSettings::default(),
        );
        controller.add_policy(cpu_policy()).await.unwrap();
        controller
            .add_policy(ScalingPolicy::new("stuck", "stuck"))
            .await
            .unwrap();

        let events = controller.evaluate_now().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].policy, "cpu");
        assert_eq!(fleet.instances(), 5);
    }

    #[tokio::test]
    async fn test_disabled_policy_is_skipped() {
        let (controller, fleet, _metrics) = controller_with(3, &[("cpu", 85.0)]).await;
        let mut policy = cpu_policy();
        policy.enabled = false;
        controller.add_policy(policy).await.unwrap();

        assert!(controller.evaluate_now().await.is_empty());
        assert_eq!(fleet.instances(), 3);
    }

    #[tokio::test]
    async fn test_policy_crud() {
        let (controller, _fleet, _metrics) = controller_with(3, &[]).await;
        controller.add_policy(cpu_policy()).await.unwrap();
        controller
            .add_policy(ScalingPolicy::new("aaa", "latency"))
            .await
            .unwrap();

        assert!(matches!(
            controller.add_policy(cpu_policy()).await,
            Err(LoadScaleError::InvalidPolicy { .. })
        ));
        assert!(controller
            .add_policy(cpu_policy().with_instances(5, 2))
            .await
            .is_err());

        let names: Vec<String> = controller
            .get_policies()
            .await
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["aaa".to_string(), "cpu".to_string()]);

        let updated = controller
            .update_policy(
                "cpu",
                PolicyUpdate {
                    max_instances: Some(20),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.max_instances, 20);
        assert_eq!(controller.get_policy("cpu").await.unwrap().max_instances, 20);

        let invalid = PolicyUpdate {
            min_instances: Some(50),
            ..Default::default()
        };
        assert!(controller.update_policy("cpu", invalid).await.is_err());
        assert_eq!(controller.get_policy("cpu").await.unwrap().min_instances, 1);

        assert!(matches!(
            controller.update_policy("missing", PolicyUpdate::default()).await,
            Err(LoadScaleError::NotFound { .. })
        ));
        assert!(controller.delete_policy("cpu").await.is_ok());
        assert!(matches!(
            controller.delete_policy("cpu").await,
            Err(LoadScaleError::NotFound { .. })
        ));
        assert_eq!(controller.get_policies().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_scale_engages_cooldowns() {
        let (controller, fleet, _metrics) = controller_with(3, &[("cpu", 85.0)]).await;
        controller.add_policy(cpu_policy()).await.unwrap();

        let event = controller
            .force_scale(ScaleDirection::ScaleUp, 8, "traffic spike expected")
            .await
            .unwrap();
        assert_eq!(event.policy, MANUAL_POLICY);
        assert_eq!(event.from_instances, 3);
        assert_eq!(event.target_instances, 8);
        assert_eq!(event.status, EventStatus::Completed);
        assert_eq!(event.reason.as_deref(), Some("traffic spike expected"));
        assert_eq!(fleet.instances(), 8);

        assert!(controller.evaluate_now().await.is_empty());

        let status = controller.get_status().await;
        assert_eq!(
            status.active_cooldowns,
            vec![CooldownStatus {
                policy: "cpu".to_string(),
                direction: ScaleDirection::ScaleUp,
                remaining: Duration::from_secs(300),
            }]
        );
    }

    #[tokio::test]
    async fn test_force_scale_accepts_any_target() {
        let (controller, fleet, _metrics) = controller_with(3, &[]).await;
        controller.add_policy(cpu_policy()).await.unwrap();

        let event = controller
            .force_scale(ScaleDirection::ScaleUp, 50, "load test")
            .await
            .unwrap();
        assert_eq!(event.target_instances, 50);
        assert_eq!(fleet.instances(), 50);
    }

    #[tokio::test]
    async fn test_history_limit_and_order() {
        let fleet = Arc::new(SimulatedFleet::new(1));
        let metrics = Arc::new(StaticMetrics::new());
        let controller = CapacityController::new(
            fleet,
            metrics,
            ControllerSettings {
                history_limit: 3,
                ..Default::default()
            },
        );

        for target in 2..=6 {
            controller
                .force_scale(ScaleDirection::ScaleUp, target, "step")
                .await
                .unwrap();
        }

        let history = controller.get_scaling_history(10).await;
        assert_eq!(history.len(), 3);
        let targets: Vec<u32> = history.iter().map(|e| e.target_instances).collect();
        assert_eq!(targets, vec![6, 5, 4]);
        assert_eq!(controller.get_scaling_history(2).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status() {
        let (controller, _fleet, _metrics) = controller_with(3, &[("cpu", 85.0)]).await;
        controller.add_policy(cpu_policy()).await.unwrap();
        let mut disabled = ScalingPolicy::new("memory", "memory");
        disabled.enabled = false;
        controller.add_policy(disabled).await.unwrap();

        controller.evaluate_now().await;
        tokio::time::advance(Duration::from_secs(100)).await;

        let status = controller.get_status().await;
        assert!(!status.running);
        assert_eq!(status.total_policies, 2);
        assert_eq!(status.enabled_policies, 1);
        assert_eq!(status.recent_actions, 1);
        assert_eq!(status.active_cooldowns.len(), 1);
        assert_eq!(status.active_cooldowns[0].remaining, Duration::from_secs(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_loop() {
        let (controller, fleet, _metrics) = controller_with(3, &[("cpu", 85.0)]).await;
        controller.add_policy(cpu_policy()).await.unwrap();

        assert!(controller.start().await);
        assert!(!controller.start().await);
        assert!(controller.is_running().await);

        // First tick fires after one interval.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fleet.instances(), 3);
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(fleet.instances(), 5);

        assert!(controller.stop().await);
        assert!(!controller.stop().await);
        assert!(!controller.get_status().await.running);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(fleet.instances(), 5);
        assert_eq!(controller.get_scaling_history(10).await.len(), 1);
    }
}
