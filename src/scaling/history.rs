/// Bounded in-memory record of scaling decisions
use super::policy::ScaleDirection;
use crate::utils::generate_id;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// Policy name recorded for manually forced actions
pub const MANUAL_POLICY: &str = "manual";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventStatus::Pending => write!(f, "pending"),
            EventStatus::Completed => write!(f, "completed"),
            EventStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One scaling decision and its execution outcome
#[derive(Debug, Clone, Serialize)]
pub struct ScalingEvent {
    pub id: String,
    pub action: ScaleDirection,
    pub from_instances: u32,
    pub target_instances: u32,
    pub policy: String,
    pub timestamp: SystemTime,
    #[serde(skip)]
    pub recorded_at: Instant,
    pub status: EventStatus,
    pub reason: Option<String>,
    pub error: Option<String>,
}

impl ScalingEvent {
    pub fn pending(
        action: ScaleDirection,
        from_instances: u32,
        target_instances: u32,
        policy: &str,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: generate_id("scale"),
            action,
            from_instances,
            target_instances,
            policy: policy.to_string(),
            timestamp: SystemTime::now(),
            recorded_at: Instant::now(),
            status: EventStatus::Pending,
            reason,
            error: None,
        }
    }
}

/// Scaling history, oldest first, capped at `limit` events
#[derive(Debug)]
pub struct ScalingHistory {
    events: VecDeque<ScalingEvent>,
    limit: usize,
}

impl ScalingHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            events: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, event: ScalingEvent) {
        if self.events.len() == self.limit {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Move a pending event to its final status.
    ///
    /// Settled events are left untouched; returns the event as stored.
    pub fn settle(
        &mut self,
        event_id: &str,
        status: EventStatus,
        error: Option<String>,
    ) -> Option<ScalingEvent> {
        let event = self.events.iter_mut().rev().find(|e| e.id == event_id)?;
        if event.status == EventStatus::Pending {
            event.status = status;
            event.error = error;
        }
        Some(event.clone())
    }

    /// Up to `limit` events, most recent first
    pub fn recent(&self, limit: usize) -> Vec<ScalingEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    /// Number of events recorded within `window` of now
    pub fn count_within(&self, window: Duration) -> usize {
        self.events
            .iter()
            .rev()
            .take_while(|e| e.recorded_at.elapsed() <= window)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(target: u32) -> ScalingEvent {
        ScalingEvent::pending(ScaleDirection::ScaleUp, target - 1, target, "cpu", None)
    }

    #[test]
    fn test_recent_is_most_recent_first() {
        let mut history = ScalingHistory::new(10);
        for target in 2..=5 {
            history.push(event(target));
        }

        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].target_instances, 5);
        assert_eq!(recent[1].target_instances, 4);
        assert_eq!(history.recent(100).len(), 4);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = ScalingHistory::new(3);
        for target in 2..=6 {
            history.push(event(target));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.recent(10).last().unwrap().target_instances, 4);
    }

    #[test]
    fn test_settle_only_once() {
        let mut history = ScalingHistory::new(10);
        let pending = event(3);
        let id = pending.id.clone();
        history.push(pending);

        let settled = history.settle(&id, EventStatus::Failed, Some("boom".to_string())).unwrap();
        assert_eq!(settled.status, EventStatus::Failed);
        assert_eq!(settled.error.as_deref(), Some("boom"));

        let again = history.settle(&id, EventStatus::Completed, None).unwrap();
        assert_eq!(again.status, EventStatus::Failed);
        assert!(history.settle("missing", EventStatus::Completed, None).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_within_window() {
        let mut history = ScalingHistory::new(10);
        history.push(event(2));
        tokio::time::advance(Duration::from_secs(3000)).await;
        history.push(event(3));
        history.push(event(4));

        assert_eq!(history.count_within(Duration::from_secs(3600)), 3);
        tokio::time::advance(Duration::from_secs(1000)).await;
        assert_eq!(history.count_within(Duration::from_secs(3600)), 2);
    }
}
