use sea_orm::error::DbErr;
use serde::Serialize;

/// Errors surfaced by the sourcing services.
///
/// Shortfalls and skipped sources are not errors: they are recorded on the
/// allocation and the fulfillment report. Only conditions that must abort a
/// line (or the whole confirmation) are represented here.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Ledger submission error: {0}")]
    LedgerSubmissionError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl IntoDbErr for &str {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self.to_string())
    }
}

impl ServiceError {
    /// Generic constructor that normalizes any supported database error input.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        ServiceError::DatabaseError(error.into_db_err())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ServiceError::ConfigurationError(message.into())
    }

    pub fn ledger(message: impl Into<String>) -> Self {
        ServiceError::LedgerSubmissionError(message.into())
    }

    /// Whether the error must abort the confirmation of the affected order.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::EventError(_))
    }

    /// Stable machine-readable code, used as a metrics label and in events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::ConfigurationError(_) => "configuration_error",
            Self::LedgerSubmissionError(_) => "ledger_submission_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidInput(_) => "invalid_input",
            Self::EventError(_) => "event_error",
            Self::InternalError(_) => "internal_error",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_error_wraps_strings() {
        let err = ServiceError::db_error("connection reset");
        assert!(matches!(err, ServiceError::DatabaseError(DbErr::Custom(ref m)) if m == "connection reset"));
        assert_eq!(err.code(), "database_error");
    }

    #[test]
    fn event_errors_are_not_fatal() {
        assert!(!ServiceError::EventError("channel closed".into()).is_fatal());
        assert!(ServiceError::configuration("no hub").is_fatal());
        assert!(ServiceError::ledger("rejected").is_fatal());
    }

    #[test]
    fn display_includes_category() {
        let err = ServiceError::configuration("site 'shop' has no hub warehouse");
        assert_eq!(
            err.to_string(),
            "Configuration error: site 'shop' has no hub warehouse"
        );
    }
}
