use thiserror::Error;

/// Main error type for the Warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Process-related errors
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Failed to stop process {0}: {1}")]
    StopError(String, String),

    #[error("Process {0} is in invalid state for this operation: {1}")]
    InvalidProcessState(String, String),

    #[error("Process {0} did not stop within the shutdown window and was killed")]
    ShutdownTimeout(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // IPC-related errors
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error("Failed to connect to daemon: {0}")]
    ConnectionError(String),

    #[error("IPC protocol error: {0}")]
    ProtocolError(String),

    #[error("Daemon not running")]
    DaemonNotRunning,

    // System errors
    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
