//! Error types for the load engine.

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for connection and pool errors.
pub const EXIT_DATABASE_ERROR: u8 = 2;
/// Exit code for a failing load statement.
pub const EXIT_STATEMENT_ERROR: u8 = 3;
/// Exit code for batch failures (fail-fast or partial).
pub const EXIT_BATCH_ERROR: u8 = 4;
/// Exit code for a cancelled run.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for file errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for load operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Configuration error (invalid YAML, bad key, ambiguous auto-detection, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query error
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// SQL could not be rendered for the given parameters
    #[error("Render error: {0}")]
    Render(String),

    /// A load statement failed against its target
    #[error("Load failed for table {target}: {message}")]
    Statement { target: String, message: String },

    /// A batch window failed under fail-fast
    #[error("Batch {batch} failed for table {target}: {message}")]
    Batch {
        target: String,
        batch: String,
        message: String,
    },

    /// Some batches failed and partial success was not allowed
    #[error("{failed} of {total} batches failed for table {target}")]
    PartialFailure {
        target: String,
        failed: usize,
        total: usize,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Load was cancelled (SIGINT, etc.)
    #[error("Load cancelled")]
    Cancelled,
}

impl LoadError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        LoadError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Statement error
    pub fn statement(target: impl Into<String>, message: impl std::fmt::Display) -> Self {
        LoadError::Statement {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Create a Batch error
    pub fn batch(
        target: impl Into<String>,
        batch: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        LoadError::Batch {
            target: target.into(),
            batch: batch.into(),
            message: message.to_string(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) | LoadError::Yaml(_) | LoadError::Json(_) => EXIT_CONFIG_ERROR,
            LoadError::Database(_) | LoadError::Pool { .. } => EXIT_DATABASE_ERROR,
            LoadError::Render(_) | LoadError::Statement { .. } => EXIT_STATEMENT_ERROR,
            LoadError::Batch { .. } | LoadError::PartialFailure { .. } => EXIT_BATCH_ERROR,
            LoadError::Cancelled => EXIT_CANCELLED,
            LoadError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
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
}

/// Result type alias for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;
