//! Error types for flowledger

use thiserror::Error;

/// Result type alias using flowledger's Error
pub type Result<T> = std::result::Result<T, Error>;

/// flowledger error types
///
/// Absence of a match is not an error; lookups return `Option` or an empty
/// collection instead.
#[derive(Error, Debug)]
pub enum Error {
    // Input errors (E100-E199)
    #[error("Unknown entity kind '{0}'")]
    InvalidEntityKind(String),

    #[error("Invalid entity reference '{0}'. Expected KIND:id, e.g. APPLICATION:12")]
    InvalidEntityReference(String),

    // Store errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("More than one active flow from {from} to {to}")]
    DuplicateActiveFlow { from: String, to: String },

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
    /// Map a store error, singling out uniqueness violations
    pub fn from_store(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::ConstraintViolation(db.message().to_string())
            }
            _ => Self::DatabaseError(err),
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidEntityKind(_) => "E100",
            Self::InvalidEntityReference(_) => "E101",
            Self::DatabaseError(_) => "E400",
            Self::ConstraintViolation(_) => "E401",
            Self::DuplicateActiveFlow { .. } => "E402",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether this error is a uniqueness collision on the active endpoint pair
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Self::ConstraintViolation(_))
    }
}
