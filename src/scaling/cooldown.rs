/// Cooldown bookkeeping per (policy, direction)
use super::policy::ScaleDirection;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Last trigger time of each direction of one policy.
#[derive(Debug, Clone, Copy, Default)]
struct PolicyCooldowns {
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
}

impl PolicyCooldowns {
    fn slot(&self, direction: ScaleDirection) -> Option<Instant> {
        match direction {
            ScaleDirection::ScaleUp => self.last_scale_up,
            ScaleDirection::ScaleDown => self.last_scale_down,
        }
    }

    fn slot_mut(&mut self, direction: ScaleDirection) -> &mut Option<Instant> {
        match direction {
            ScaleDirection::ScaleUp => &mut self.last_scale_up,
            ScaleDirection::ScaleDown => &mut self.last_scale_down,
        }
    }
}

/// Tracks when each (policy, direction) pair last triggered.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    policies: HashMap<String, PolicyCooldowns>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a trigger, overwriting the previous one for this pair
    pub fn record(&mut self, policy: &str, direction: ScaleDirection, at: Instant) {
        *self
            .policies
            .entry(policy.to_string())
            .or_default()
            .slot_mut(direction) = Some(at);
    }

    pub fn last_triggered(&self, policy: &str, direction: ScaleDirection) -> Option<Instant> {
        self.policies.get(policy)?.slot(direction)
    }

    /// Time left in the cooldown window, `None` once it has elapsed
    pub fn remaining(
        &self,
        policy: &str,
        direction: ScaleDirection,
        cooldown: Duration,
        now: Instant,
    ) -> Option<Duration> {
        let last = self.last_triggered(policy, direction)?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < cooldown {
            Some(cooldown - elapsed)
        } else {
            None
        }
    }

    /// Drop all entries of a deleted policy
    pub fn forget(&mut self, policy: &str) {
        self.policies.remove(policy);
    }
}
