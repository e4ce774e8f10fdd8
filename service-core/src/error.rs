use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Invalid transition: {0}")]
    InvalidTransition(anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Timed out: {0}")]
    Timeout(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

/// Coarse classification callers use to map errors onto their transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    /// Optimistic concurrency failure. Re-read and retry.
    Conflict,
    InvalidTransition,
    Validation,
    /// Backing store failure, including deadlines.
    Storage,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => ErrorKind::Validation,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Conflict(_) => ErrorKind::Conflict,
            AppError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            AppError::DatabaseError(_) | AppError::Timeout(_) | AppError::ServiceUnavailable => {
                ErrorKind::Storage
            }
            AppError::InternalError(_) | AppError::ConfigError(_) => ErrorKind::Internal,
        }
    }

    /// Only version conflicts are worth retrying after a fresh read.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Storage => "db_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(AppError::Conflict(anyhow::anyhow!("stale version")).is_retryable());
        assert!(!AppError::InvalidTransition(anyhow::anyhow!("not draft")).is_retryable());
        assert!(!AppError::BadRequest(anyhow::anyhow!("bad date")).is_retryable());
        assert!(!AppError::DatabaseError(anyhow::anyhow!("connection reset")).is_retryable());
    }

    #[test]
    fn timeouts_classify_as_storage() {
        let err = AppError::Timeout(anyhow::anyhow!("pay exceeded 5s"));
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert_eq!(err.label(), "db_error");
    }

    #[test]
    fn validation_variants_share_a_kind() {
        let errs = validator::ValidationErrors::new();
        assert_eq!(AppError::from(errs).kind(), ErrorKind::Validation);
        assert_eq!(
            AppError::BadRequest(anyhow::anyhow!("x")).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn display_includes_context() {
        let err = AppError::NotFound(anyhow::anyhow!("Batch 42 not found"));
        assert_eq!(err.to_string(), "Not found: Batch 42 not found");
    }
}
