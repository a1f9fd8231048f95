//! Error types for Lorebank

use thiserror::Error;

/// Result type alias using Lorebank's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Lorebank error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E001-E099)
    #[error("Validation failed: {0}")]
    ValidationError(String),

    // Identity errors (E100-E199)
    #[error("Duplicate key: {0} already exists.")]
    DuplicateKey(String),

    #[error("{kind} '{id}' not found.")]
    NotFound { kind: &'static str, id: String },

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    // Graph errors (E200-E299)
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Failed to (de)serialize {context}: {source}")]
    SerializationError {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a missing learning
    pub fn learning_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Learning",
            id: id.into(),
        }
    }

    /// Shorthand for a missing session
    pub fn session_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "Session",
            id: id.into(),
        }
    }

    pub(crate) fn serialization(context: &'static str, source: serde_json::Error) -> Self {
        Self::SerializationError { context, source }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationError(_) => "E001",
            Self::DuplicateKey(_) => "E100",
            Self::NotFound { .. } => "E101",
            Self::Conflict(_) => "E102",
            Self::ConsistencyViolation(_) => "E200",
            Self::DatabaseError(_) => "E400",
            Self::SerializationError { .. } => "E401",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::NotFound {
                kind: "Learning", ..
            } => Some("lorebank retrieve --historical".to_string()),
            Self::NotFound {
                kind: "Session",
                id,
            } => Some(format!("lorebank session {}", id)),
            Self::Conflict(_) => Some("Retry the update once other writers finish".to_string()),
            Self::ConsistencyViolation(_) => Some("lorebank edges <id>".to_string()),
            Self::ConfigError(_) => Some("lorebank config list".to_string()),
            Self::DatabaseError(_) => Some("lorebank init".to_string()),
            _ => None,
        }
    }

    /// Whether the backing store reported a transient lock conflict
    pub(crate) fn is_busy(&self) -> bool {
        match self {
            Self::DatabaseError(sqlx::Error::Database(db)) => {
                // Primary result code lives in the low byte (SQLITE_BUSY = 5, SQLITE_LOCKED = 6)
                let busy_code = db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .is_some_and(|code| matches!(code & 0xff, 5 | 6));
                let message = db.message();
                busy_code
                    || message.contains("database is locked")
                    || message.contains("database is busy")
            }
            _ => false,
        }
    }
}
