//! Simulation error types.

use sensor_domain::DomainError;
use thiserror::Error;

/// Engine and entity errors.
#[derive(Error, Debug)]
pub enum SimulationError {
    /// Negative or non-finite tick length
    #[error("Invalid delta time: {0} (must be finite and >= 0)")]
    NegativeDeltaTime(f64),

    #[error("Simulation clock overflow advancing by {0}s")]
    ClockOverflow(f64),

    #[error("Invalid engine setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },

    #[error("Duplicate entity id: {0}")]
    DuplicateEntity(String),

    #[error("Duplicate sensor id: {0}")]
    DuplicateSensor(String),

    #[error("Simulation is already running")]
    AlreadyRunning,

    /// Blocking publish task panicked or was cancelled
    #[error("Publish task failed: {0}")]
    PublishTask(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Scenario loading and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// All validation problems found in one pass
    #[error("Invalid scenario: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error("Invalid {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

impl ConfigError {
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Runtime fault raised by a single sensor scan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    #[error("Non-finite geometry for entity {entity_id}")]
    NonFiniteGeometry { entity_id: String },

    #[error("Detection probability for entity {entity_id} evaluated to {value}")]
    InvalidProbability { entity_id: String, value: f64 },
}

/// Result type for simulation operations.
pub type Result<T> = std::result::Result<T, SimulationError>;
