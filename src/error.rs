/// Unified error handling for loadscale
///
/// This module provides the error taxonomy shared by the traffic distributor
/// and the capacity controller, plus the configuration errors raised while
/// loading and validating TOML files.
use std::fmt;
use thiserror::Error;

/// Main error type for loadscale operations
#[derive(Debug, Error)]
pub enum LoadScaleError {
    /// An operation referenced an unknown backend or policy
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Selection found no healthy backend with spare capacity
    #[error("No healthy backends available")]
    NoHealthyBackends,

    /// Backend registration or update was rejected
    #[error("Invalid backend: {message}")]
    InvalidBackend { message: String },

    /// Scaling policy creation or update was rejected
    #[error("Invalid scaling policy: {message}")]
    InvalidPolicy { message: String },

    /// Health check errors (internal, reflected in backend state)
    #[error("Health check failed: {message}")]
    HealthCheck { message: String },

    /// The fleet collaborator failed to apply a scaling action
    #[error("Scaling execution failed: {message}")]
    ScalingExecution { message: String },

    /// A single policy could not be evaluated during a controller tick
    #[error("Policy '{policy}' evaluation failed: {message}")]
    PolicyEvaluation { policy: String, message: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for loadscale operations
pub type LoadScaleResult<T> = Result<T, LoadScaleError>;

/// Convenience methods for creating specific error types
impl LoadScaleError {
    /// Create a not-found error for the given entity kind
    pub fn not_found<S: Into<String>>(kind: &'static str, id: S) -> Self {
        LoadScaleError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid_backend<S: Into<String>>(message: S) -> Self {
        LoadScaleError::InvalidBackend {
            message: message.into(),
        }
    }

    pub fn invalid_policy<S: Into<String>>(message: S) -> Self {
        LoadScaleError::InvalidPolicy {
            message: message.into(),
        }
    }

    /// Create a health check error
    pub fn health_check<S: Into<String>>(message: S) -> Self {
        LoadScaleError::HealthCheck {
            message: message.into(),
        }
    }

    /// Create a scaling execution error
    pub fn scaling_execution<S: Into<String>>(message: S) -> Self {
        LoadScaleError::ScalingExecution {
            message: message.into(),
        }
    }

    /// Create a policy evaluation error
    pub fn policy_evaluation<P: Into<String>, S: Into<String>>(policy: P, message: S) -> Self {
        LoadScaleError::PolicyEvaluation {
            policy: policy.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        LoadScaleError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        LoadScaleError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (caller may retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LoadScaleError::NoHealthyBackends
                | LoadScaleError::HealthCheck { .. }
                | LoadScaleError::ScalingExecution { .. }
                | LoadScaleError::PolicyEvaluation { .. }
                | LoadScaleError::Timeout { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            LoadScaleError::Config(_) => ErrorSeverity::Critical,
            LoadScaleError::Internal { .. } => ErrorSeverity::Critical,
            LoadScaleError::NoHealthyBackends => ErrorSeverity::Warning,
            LoadScaleError::ScalingExecution { .. } => ErrorSeverity::Warning,
            LoadScaleError::PolicyEvaluation { .. } => ErrorSeverity::Warning,
            LoadScaleError::Timeout { .. } => ErrorSeverity::Warning,
            LoadScaleError::HealthCheck { .. } => ErrorSeverity::Info,
            _ => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
