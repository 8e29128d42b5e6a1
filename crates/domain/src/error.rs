use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("already acted")]
    AlreadyActed,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("cancelled")]
    Cancelled,
}

/// What the dispatcher does with a handler outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Done,
    Skip,
    Retry,
    Shutdown,
}

impl DomainError {
    pub fn disposition(&self) -> Disposition {
        match self {
            DomainError::Cancelled => Disposition::Shutdown,
            DomainError::Validation(_) | DomainError::NotFound => Disposition::Skip,
            DomainError::Conflict | DomainError::AlreadyActed => Disposition::Done,
            DomainError::Unauthorized(_)
            | DomainError::Unavailable(_)
            | DomainError::Upstream(_) => Disposition::Retry,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "bad_request",
            DomainError::Unauthorized(_) => "unauthorized",
            DomainError::NotFound => "not_found",
            DomainError::Conflict | DomainError::AlreadyActed => "conflict",
            DomainError::Unavailable(_) | DomainError::Upstream(_) | DomainError::Cancelled => {
                "internal"
            }
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            DomainError::Validation(message) => message.clone(),
            DomainError::Unauthorized(_) => "unauthorized".to_string(),
            DomainError::NotFound => "resource not found".to_string(),
            DomainError::Conflict => "resource conflict".to_string(),
            DomainError::AlreadyActed => "action already recorded".to_string(),
            DomainError::Unavailable(_) | DomainError::Upstream(_) | DomainError::Cancelled => {
                "internal server error".to_string()
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DomainError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shutdown_not_retry() {
        assert_eq!(DomainError::Cancelled.disposition(), Disposition::Shutdown);
        assert_eq!(
            DomainError::Unavailable("redis".into()).disposition(),
            Disposition::Retry
        );
    }

    #[test]
    fn schema_mismatch_is_skipped() {
        assert_eq!(
            DomainError::Validation("bad row".into()).disposition(),
            Disposition::Skip
        );
        assert_eq!(DomainError::NotFound.disposition(), Disposition::Skip);
    }

    #[test]
    fn internal_errors_do_not_leak_detail() {
        let err = DomainError::Unavailable("mysql://root:secret@db".into());
        assert_eq!(err.code(), "internal");
        assert!(!err.public_message().contains("secret"));
        assert_eq!(DomainError::AlreadyActed.code(), "conflict");
    }
}
