use thiserror::Error;

/// All errors that can occur in pubgroup-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Publication not found: {0}")]
    PublicationNotFound(String),

    #[error("Duplicate group not found: {0}")]
    DuplicateGroupNotFound(String),

    #[error("Non-duplicate group not found: {0}")]
    NonDuplicateGroupNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown import source: {0}")]
    UnknownSource(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl CoreError {
    /// True when the underlying SQLite error is a UNIQUE / constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            CoreError::Database(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
