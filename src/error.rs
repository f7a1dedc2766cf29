use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already labeled: {0}")]
    AlreadyLabeled(String),

    #[error("Transient delivery failure: {0}")]
    TransientDelivery(String),

    #[error("Permanent delivery failure: {0}")]
    PermanentDelivery(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Service error: {0}")]
    Service(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a delivery error is worth one more attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientDelivery(_))
    }

    /// Map a sqlx failure, turning lost races into `Conflict`
    pub fn from_sqlx(context: &str, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            // 40001 serialization_failure, 40P01 deadlock_detected, 23505 unique_violation
            if let Some(code) = db_err.code() {
                if code == "40001" || code == "40P01" || code == "23505" {
                    return Error::Conflict(format!("{}: {}", context, db_err.message()));
                }
            }
        }
        Error::Database(format!("{}: {}", context, err))
    }
}

/// Look through an `anyhow` chain for the domain error
pub fn domain_error(err: &anyhow::Error) -> Option<&Error> {
    err.chain().find_map(|cause| cause.downcast_ref::<Error>())
}
