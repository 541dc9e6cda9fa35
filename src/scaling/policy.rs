/// Scaling policies and the per-tick scaling decision
use crate::error::{LoadScaleError, LoadScaleResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Direction of a scaling action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    ScaleUp,
    ScaleDown,
}

impl fmt::Display for ScaleDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleDirection::ScaleUp => write!(f, "scale_up"),
            ScaleDirection::ScaleDown => write!(f, "scale_down"),
        }
    }
}

/// Outcome of evaluating one policy against one metric reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Move the fleet to `target` instances.
    Scale {
        direction: ScaleDirection,
        target: u32,
    },
    /// No change needed.
    NoChange,
}

/// A named rule tying one metric to thresholds, steps and instance bounds.
///
/// The band between `scale_down_threshold` and `scale_up_threshold` is a dead
/// zone: readings inside it never trigger an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub name: String,
    pub metric: String,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
    pub min_instances: u32,
    pub max_instances: u32,
    pub scale_up_step: u32,
    pub scale_down_step: u32,
    pub enabled: bool,
}

impl ScalingPolicy {
    /// Policy with default thresholds (80/20), five minute cooldowns,
    /// 1..=10 instances and single-instance steps.
    pub fn new(name: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            scale_up_threshold: 80.0,
            scale_down_threshold: 20.0,
            scale_up_cooldown: Duration::from_secs(300),
            scale_down_cooldown: Duration::from_secs(300),
            min_instances: 1,
            max_instances: 10,
            scale_up_step: 1,
            scale_down_step: 1,
            enabled: true,
        }
    }

    pub fn with_thresholds(mut self, scale_up: f64, scale_down: f64) -> Self {
        self.scale_up_threshold = scale_up;
        self.scale_down_threshold = scale_down;
        self
    }

    pub fn with_instances(mut self, min: u32, max: u32) -> Self {
        self.min_instances = min;
        self.max_instances = max;
        self
    }

    pub fn with_steps(mut self, scale_up: u32, scale_down: u32) -> Self {
        self.scale_up_step = scale_up;
        self.scale_down_step = scale_down;
        self
    }

    pub fn with_cooldowns(mut self, scale_up: Duration, scale_down: Duration) -> Self {
        self.scale_up_cooldown = scale_up;
        self.scale_down_cooldown = scale_down;
        self
    }

    pub fn cooldown(&self, direction: ScaleDirection) -> Duration {
        match direction {
            ScaleDirection::ScaleUp => self.scale_up_cooldown,
            ScaleDirection::ScaleDown => self.scale_down_cooldown,
        }
    }

    pub fn validate(&self) -> LoadScaleResult<()> {
        if self.name.trim().is_empty() {
            return Err(LoadScaleError::invalid_policy("name cannot be empty"));
        }
        if self.metric.trim().is_empty() {
            return Err(LoadScaleError::invalid_policy(format!(
                "policy '{}' has no metric",
                self.name
            )));
        }
        if !self.scale_up_threshold.is_finite() || !self.scale_down_threshold.is_finite() {
            return Err(LoadScaleError::invalid_policy(format!(
                "policy '{}' thresholds must be finite",
                self.name
            )));
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(LoadScaleError::invalid_policy(format!(
                "policy '{}' scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.name, self.scale_down_threshold, self.scale_up_threshold
            )));
        }
        if self.min_instances > self.max_instances {
            return Err(LoadScaleError::invalid_policy(format!(
                "policy '{}' min_instances ({}) exceeds max_instances ({})",
                self.name, self.min_instances, self.max_instances
            )));
        }
        if self.scale_up_step == 0 || self.scale_down_step == 0 {
            return Err(LoadScaleError::invalid_policy(format!(
                "policy '{}' steps must be at least 1",
                self.name
            )));
        }
        Ok(())
    }

    /// Decide what to do for one metric reading.
    ///
    /// `in_cooldown` reports whether the given direction is still cooling
    /// down for this policy.
    pub fn decide<F>(&self, value: f64, current_instances: u32, in_cooldown: F) -> ScaleDecision
    where
        F: Fn(ScaleDirection) -> bool,
    {
        if value > self.scale_up_threshold
            && current_instances < self.max_instances
            && !in_cooldown(ScaleDirection::ScaleUp)
        {
            let target = current_instances
                .saturating_add(self.scale_up_step)
                .min(self.max_instances);
            if target > current_instances {
                return ScaleDecision::Scale {
                    direction: ScaleDirection::ScaleUp,
                    target,
                };
            }
        } else if value < self.scale_down_threshold
            && current_instances > self.min_instances
            && !in_cooldown(ScaleDirection::ScaleDown)
        {
            let target = current_instances
                .saturating_sub(self.scale_down_step)
                .max(self.min_instances);
            if target < current_instances {
                return ScaleDecision::Scale {
                    direction: ScaleDirection::ScaleDown,
                    target,
                };
            }
        }

        ScaleDecision::NoChange
    }
}

/// Partial update of an existing policy; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub metric: Option<String>,
    pub scale_up_threshold: Option<f64>,
    pub scale_down_threshold: Option<f64>,
    pub scale_up_cooldown: Option<Duration>,
    pub scale_down_cooldown: Option<Duration>,
    pub min_instances: Option<u32>,
    pub max_instances: Option<u32>,
    pub scale_up_step: Option<u32>,
    pub scale_down_step: Option<u32>,
    pub enabled: Option<bool>,
}

impl PolicyUpdate {
    /// Apply to a copy of `policy` and validate the result
    pub fn apply_to(&self, policy: &ScalingPolicy) -> LoadScaleResult<ScalingPolicy> {
        let mut updated = policy.clone();
        if let Some(metric) = &self.metric {
            updated.metric = metric.clone();
        }
        if let Some(value) = self.scale_up_threshold {
            updated.scale_up_threshold = value;
        }
        if let Some(value) = self.scale_down_threshold {
            updated.scale_down_threshold = value;
        }
        if let Some(value) = self.scale_up_cooldown {
            updated.scale_up_cooldown = value;
        }
        if let Some(value) = self.scale_down_cooldown {
            updated.scale_down_cooldown = value;
        }
        if let Some(value) = self.min_instances {
            updated.min_instances = value;
        }
        if let Some(value) = self.max_instances {
            updated.max_instances = value;
        }
        if let Some(value) = self.scale_up_step {
            updated.scale_up_step = value;
        }
        if let Some(value) = self.scale_down_step {
            updated.scale_down_step = value;
        }
        if let Some(value) = self.enabled {
            updated.enabled = value;
        }
        updated.validate()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ScalingPolicy {
        ScalingPolicy::new("cpu", "cpu_percent")
            .with_thresholds(80.0, 20.0)
            .with_instances(1, 10)
            .with_steps(2, 1)
    }

    fn no_cooldown(_: ScaleDirection) -> bool {
        false
    }

    #[test]
    fn test_validate() {
        assert!(policy().validate().is_ok());
        assert!(policy().with_thresholds(20.0, 20.0).validate().is_err());
        assert!(policy().with_thresholds(f64::NAN, 20.0).validate().is_err());
        assert!(policy().with_instances(5, 4).validate().is_err());
        assert!(policy().with_steps(0, 1).validate().is_err());
        assert!(ScalingPolicy::new("", "cpu").validate().is_err());
        assert!(ScalingPolicy::new("cpu", " ").validate().is_err());
    }

    #[test]
    fn test_scale_up_above_threshold() {
        assert_eq!(
            policy().decide(85.0, 3, no_cooldown),
            ScaleDecision::Scale {
                direction: ScaleDirection::ScaleUp,
                target: 5
            }
        );
    }

    #[test]
    fn test_scale_up_clamped_to_max() {
        assert_eq!(
            policy().decide(95.0, 9, no_cooldown),
            ScaleDecision::Scale {
                direction: ScaleDirection::ScaleUp,
                target: 10
            }
        );
        assert_eq!(policy().decide(95.0, 10, no_cooldown), ScaleDecision::NoChange);
    }

    #[test]
    fn test_scale_down_below_threshold() {
        assert_eq!(
            policy().decide(10.0, 4, no_cooldown),
            ScaleDecision::Scale {
                direction: ScaleDirection::ScaleDown,
                target: 3
            }
        );
        assert_eq!(policy().decide(10.0, 1, no_cooldown), ScaleDecision::NoChange);
    }

    #[test]
    fn test_scale_down_clamped_to_min() {
        let policy = policy().with_instances(2, 10).with_steps(1, 5);
        assert_eq!(
            policy.decide(5.0, 4, no_cooldown),
            ScaleDecision::Scale {
                direction: ScaleDirection::ScaleDown,
                target: 2
            }
        );
    }

    #[test]
    fn test_dead_zone() {
        for value in [20.0, 50.0, 80.0] {
            assert_eq!(policy().decide(value, 5, no_cooldown), ScaleDecision::NoChange);
        }
    }

    #[test]
    fn test_cooldown_blocks_direction() {
        let up_cooling = |direction: ScaleDirection| direction == ScaleDirection::ScaleUp;
        assert_eq!(policy().decide(90.0, 3, up_cooling), ScaleDecision::NoChange);
        assert!(matches!(
            policy().decide(10.0, 3, up_cooling),
            ScaleDecision::Scale {
                direction: ScaleDirection::ScaleDown,
                ..
            }
        ));
    }

    #[test]
    fn test_policy_update() {
        let original = policy();
        let update = PolicyUpdate {
            scale_up_threshold: Some(90.0),
            enabled: Some(false),
            ..Default::default()
        };

        let updated = update.apply_to(&original).unwrap();
        assert_eq!(updated.scale_up_threshold, 90.0);
        assert!(!updated.enabled);
        assert_eq!(updated.scale_down_threshold, original.scale_down_threshold);

        let invalid = PolicyUpdate {
            scale_down_threshold: Some(95.0),
            ..Default::default()
        };
        assert!(invalid.apply_to(&original).is_err());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(ScaleDirection::ScaleUp.to_string(), "scale_up");
        assert_eq!(ScaleDirection::ScaleDown.to_string(), "scale_down");
    }
}
