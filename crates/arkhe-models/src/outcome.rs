//! Tagged result of a unit of work.

use crate::Payload;

/// What an operation reports when it finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkOutcome {
    /// The operation produced a result.
    Success { payload: Payload },
    /// The operation failed with a message and the HTTP status to report.
    Failure { message: String, status: u16 },
}

impl WorkOutcome {
    pub fn success(payload: impl Into<Payload>) -> Self {
        Self::Success { payload: payload.into() }
    }

    pub fn failure(message: impl Into<String>, status: u16) -> Self {
        Self::Failure {
            message: message.into(),
            status,
        }
    }

    /// Failure with status 500.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::failure(message, 500)
    }

    /// HTTP status this outcome maps to.
    ///
    /// A failure status outside `100..=599` is reported as 500.
    pub fn status_code(&self) -> u16 {
        match self {
            WorkOutcome::Success { .. } => 200,
            WorkOutcome::Failure { status, .. } if (100..=599).contains(status) => *status,
            WorkOutcome::Failure { .. } => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(WorkOutcome::success("ok").status_code(), 200);
        assert_eq!(WorkOutcome::failure("bad input", 400).status_code(), 400);
        assert_eq!(WorkOutcome::internal("boom").status_code(), 500);
        assert!(!WorkOutcome::internal("boom").is_success());
    }

    #[test]
    fn test_out_of_range_status_is_internal() {
        assert_eq!(WorkOutcome::failure("odd", 42).status_code(), 500);
        assert_eq!(WorkOutcome::failure("odd", 600).status_code(), 500);
        assert_eq!(WorkOutcome::failure("teapot", 418).status_code(), 418);
    }
}
