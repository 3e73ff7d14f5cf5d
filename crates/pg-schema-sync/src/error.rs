//! Error types for the reconciliation library.

use thiserror::Error;

/// Main error type for reconciliation operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// An entity definition is structurally invalid.
    #[error("Invalid descriptor for entity '{entity}': {message}")]
    InvalidDescriptor { entity: String, message: String },

    /// Reading the current database schema failed.
    #[error("Schema introspection failed: {0}")]
    Introspection(String),

    /// The backend cannot apply a requested change in place.
    #[error("Capability gap on {table}.{column}: {message}\n  Remediation: {remediation}")]
    CapabilityGap {
        table: String,
        column: String,
        message: String,
        remediation: String,
    },

    /// A DDL statement failed against the backend.
    ///
    /// `position` is 1-based within the applied operation list; operations
    /// before it remain applied and a re-run picks up from the true schema
    /// state.
    #[error("Operation {position} ({operation}) failed: {source}")]
    Execution {
        position: usize,
        operation: String,
        #[source]
        source: tokio_postgres::Error,
    },

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Reconciliation was cancelled (SIGINT, etc.)
    #[error("Reconciliation cancelled")]
    Cancelled,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Create an InvalidDescriptor error for an entity.
    pub fn invalid_descriptor(entity: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::InvalidDescriptor {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Create an Introspection error with context about the failing step.
    pub fn introspection(message: impl std::fmt::Display) -> Self {
        SyncError::Introspection(message.to_string())
    }

    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        SyncError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }

    /// Map the error taxonomy to a process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncError::Config(_) | SyncError::Yaml(_) | SyncError::Io(_) => 2,
            SyncError::InvalidDescriptor { .. } => 3,
            SyncError::Introspection(_) | SyncError::Pool { .. } => 4,
            SyncError::CapabilityGap { .. } => 5,
            SyncError::Execution { .. } => 6,
            SyncError::Cancelled => 130,
            SyncError::Json(_) => 1,
        }
    }
}

/// Result type alias for reconciliation operations.
pub type Result<T> = std::result::Result<T, SyncError>;
