use std::time::Duration;
use thiserror::Error;

/// Main error type for the warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Roster errors
    #[error("No workers need to run: the roster is empty")]
    RosterEmpty,

    // Configuration errors
    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Process-related errors
    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Failed to inspect process {0}: {1}")]
    InspectionError(u32, String),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Worker loop errors
    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Iteration failed: {0}")]
    IterationError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
