/// Core abstractions shared by the traffic distributor and its health checks
pub mod backend;
pub mod session;

pub use backend::BackendPool;
pub use session::{SessionManager, StickySessionBinding};

use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime};

/// Last known health of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Registered but not yet probed
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Unknown => write!(f, "unknown"),
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Represents a registered upstream server
#[derive(Debug, Clone, Serialize)]
pub struct Backend {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub max_connections: u32,
    pub current_connections: u32,
    pub health: HealthState,
    pub last_health_check: Option<SystemTime>,
    pub last_response_time: Option<Duration>,
    pub success_count: u64,
    pub error_count: u64,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Backend {
    pub fn new(id: String, host: String, port: u16, weight: u32, max_connections: u32) -> Self {
        let now = SystemTime::now();
        Self {
            id,
            host,
            port,
            weight,
            max_connections,
            current_connections: 0,
            health: HealthState::Unknown,
            last_health_check: None,
            last_response_time: None,
            success_count: 0,
            error_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// `host:port` form used by probes and logs
    pub fn address(&self) -> String {
        crate::utils::format_address(&self.host, self.port)
    }

    /// Eligible for new traffic: healthy with spare capacity
    pub fn is_available(&self) -> bool {
        self.health == HealthState::Healthy && self.current_connections < self.max_connections
    }

    /// Time since registration
    pub fn uptime(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.created_at)
            .unwrap_or_default()
    }
}
