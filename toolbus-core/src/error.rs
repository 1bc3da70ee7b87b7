//! Error types for Toolbus operations

/// Result type for Toolbus operations
pub type Result<T> = std::result::Result<T, ToolbusError>;

/// Error types for the Toolbus framework
#[derive(Debug, thiserror::Error)]
pub enum ToolbusError {
    /// Parameter validation failed
    #[error("Validation error: {0}")]
    Validation(#[from] crate::tools::ValidationError),

    /// Parameter schema declaration is inconsistent
    #[error("Schema error: {0}")]
    Schema(#[from] crate::tools::SchemaError),

    /// Tool execution failure
    #[error("Tool error: {0}")]
    Tool(#[from] crate::tools::ToolError),

    /// Job lifecycle violation
    #[error("Job error: {0}")]
    Job(#[from] crate::jobs::JobError),

    /// Coordinator-level failure
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] crate::coordinator::CoordinatorError),

    /// Transport failure
    #[error("Pub/sub error: {0}")]
    PubSub(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ToolbusError {
    fn from(s: String) -> Self {
        ToolbusError::Other(s)
    }
}

impl From<&str> for ToolbusError {
    fn from(s: &str) -> Self {
        ToolbusError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for ToolbusError {
    fn from(err: anyhow::Error) -> Self {
        ToolbusError::Other(err.to_string())
    }
}
