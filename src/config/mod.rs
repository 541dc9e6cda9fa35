/// Configuration management for loadscale
use crate::balancer::Strategy;
pub use crate::error::ConfigError;
use crate::scaling::ScalingPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main loadscale configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Traffic distribution configuration
    pub balancer: BalancerConfig,
    /// Sticky session configuration
    pub sessions: SessionConfig,
    /// Health check configuration
    pub health: HealthConfig,
    /// Capacity controller configuration
    pub scaling: ScalingConfig,
    /// Backends registered at startup
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Traffic distribution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Strategy used when the caller does not name one
    pub default_strategy: String,
    /// Connection cap applied to backends that do not set their own
    pub max_connections_per_backend: u32,
}

/// Sticky session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bind sessions to the backend first chosen for them
    pub sticky: bool,
    /// Binding lifetime in seconds
    pub ttl_sec: u64,
    /// Expired binding sweep interval in seconds
    pub cleanup_interval_sec: u64,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Health check interval in seconds
    pub interval_sec: u64,
    /// Health check timeout in seconds
    pub timeout_sec: u64,
    /// HTTP path probed on every backend
    pub path: String,
    /// Status code that counts as healthy
    pub expected_status: u16,
}

/// Capacity controller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    /// Start the evaluation loop on startup
    pub enabled: bool,
    /// Controller tick interval in seconds
    pub evaluation_interval_sec: u64,
    /// Upper bound on a single policy evaluation in seconds
    pub evaluation_timeout_sec: u64,
    /// Upper bound on a single fleet scaling call in seconds
    pub execution_timeout_sec: u64,
    /// Number of scaling events retained in history
    pub history_limit: usize,
    /// Instance count of the simulated fleet used by `loadscale run`
    pub initial_instances: u32,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

/// A scaling policy as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub name: String,
    pub metric: String,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    pub scale_up_cooldown_sec: u64,
    pub scale_down_cooldown_sec: u64,
    pub min_instances: u32,
    pub max_instances: u32,
    #[serde(default = "default_step")]
    pub scale_up_step: u32,
    #[serde(default = "default_step")]
    pub scale_down_step: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A backend registered at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Overrides `balancer.max_connections_per_backend`
    pub max_connections: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

fn default_step() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            balancer: BalancerConfig {
                default_strategy: Strategy::RoundRobin.to_string(),
                max_connections_per_backend: 1000,
            },
            sessions: SessionConfig {
                sticky: false,
                ttl_sec: 3600,
                cleanup_interval_sec: 300,
            },
            health: HealthConfig {
                interval_sec: 30,
                timeout_sec: 5,
                path: "/health".to_string(),
                expected_status: 200,
            },
            scaling: ScalingConfig {
                enabled: true,
                evaluation_interval_sec: 30,
                evaluation_timeout_sec: 10,
                execution_timeout_sec: 60,
                history_limit: 1000,
                initial_instances: 1,
                policies: Vec::new(),
            },
            backends: Vec::new(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl PolicyConfig {
    /// Convert into the runtime policy representation
    pub fn to_policy(&self) -> ScalingPolicy {
        ScalingPolicy {
            name: self.name.clone(),
            metric: self.metric.clone(),
            scale_up_threshold: self.scale_up_threshold,
            scale_down_threshold: self.scale_down_threshold,
            scale_up_cooldown: Duration::from_secs(self.scale_up_cooldown_sec),
            scale_down_cooldown: Duration::from_secs(self.scale_down_cooldown_sec),
            min_instances: self.min_instances,
            max_instances: self.max_instances,
            scale_up_step: self.scale_up_step,
            scale_down_step: self.scale_down_step,
            enabled: self.enabled,
        }
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Strategy used when callers do not name one
    pub fn default_strategy(&self) -> Strategy {
        Strategy::parse_or_default(&self.balancer.default_strategy)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate balancer config
        self.balancer
            .default_strategy
            .parse::<Strategy>()
            .map_err(ConfigError::ValidationError)?;

        if self.balancer.max_connections_per_backend == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections_per_backend must be greater than 0".to_string(),
            ));
        }

        // Validate session config
        if self.sessions.ttl_sec == 0 {
            return Err(ConfigError::ValidationError(
                "session ttl_sec must be greater than 0".to_string(),
            ));
        }

        if self.sessions.cleanup_interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "session cleanup_interval_sec must be greater than 0".to_string(),
            ));
        }

        // Validate health config
        if self.health.interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec >= self.health.interval_sec {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be less than interval_sec".to_string(),
            ));
        }

        if !self.health.path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "health check path must start with '/': {}",
                self.health.path
            )));
        }

        if !(100..=599).contains(&self.health.expected_status) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid expected_status: {}",
                self.health.expected_status
            )));
        }

        // Validate scaling config
        if self.scaling.evaluation_interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "scaling evaluation_interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.scaling.evaluation_timeout_sec == 0 || self.scaling.execution_timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "scaling timeouts must be greater than 0".to_string(),
            ));
        }

        if self.scaling.history_limit == 0 {
            return Err(ConfigError::ValidationError(
                "scaling history_limit must be greater than 0".to_string(),
            ));
        }

        let mut names = std::collections::HashSet::new();
        for policy in &self.scaling.policies {
            policy
                .to_policy()
                .validate()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            if !names.insert(policy.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate scaling policy: {}",
                    policy.name
                )));
            }
        }

        // Validate backends
        for backend in &self.backends {
            if backend.host.trim().is_empty() || backend.port == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid backend address: {}:{}",
                    backend.host, backend.port
                )));
            }
            if backend.weight == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Backend {}:{} weight must be at least 1",
                    backend.host, backend.port
                )));
            }
            if backend.max_connections == Some(0) {
                return Err(ConfigError::ValidationError(format!(
                    "Backend {}:{} max_connections must be greater than 0",
                    backend.host, backend.port
                )));
            }
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.logging.level
                )))
            }
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}",
                    self.logging.format
                )))
            }
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Config {
            balancer: BalancerConfig {
                default_strategy: Strategy::LeastConnections.to_string(),
                max_connections_per_backend: 1000,
            },
            sessions: SessionConfig {
                sticky: true,
                ttl_sec: 3600,
                cleanup_interval_sec: 300,
            },
            scaling: ScalingConfig {
                initial_instances: 3,
                policies: vec![
                    PolicyConfig {
                        name: "connections".to_string(),
                        metric: "connection_utilization".to_string(),
                        scale_up_threshold: 80.0,
                        scale_down_threshold: 20.0,
                        scale_up_cooldown_sec: 300,
                        scale_down_cooldown_sec: 600,
                        min_instances: 1,
                        max_instances: 10,
                        scale_up_step: 2,
                        scale_down_step: 1,
                        enabled: true,
                    },
                    PolicyConfig {
                        name: "latency".to_string(),
                        metric: "avg_response_time_ms".to_string(),
                        scale_up_threshold: 500.0,
                        scale_down_threshold: 50.0,
                        scale_up_cooldown_sec: 300,
                        scale_down_cooldown_sec: 900,
                        min_instances: 1,
                        max_instances: 10,
                        scale_up_step: 1,
                        scale_down_step: 1,
                        enabled: true,
                    },
                ],
                ..Config::default().scaling
            },
            backends: vec![
                BackendConfig {
                    host: "10.0.1.10".to_string(),
                    port: 8080,
                    weight: 2,
                    max_connections: None,
                },
                BackendConfig {
                    host: "10.0.1.11".to_string(),
                    port: 8080,
                    weight: 1,
                    max_connections: None,
                },
                BackendConfig {
                    host: "10.0.1.12".to_string(),
                    port: 8080,
                    weight: 1,
                    max_connections: Some(500),
                },
            ],
            ..Default::default()
        };

        config.save_to_file(path)
    }
}
