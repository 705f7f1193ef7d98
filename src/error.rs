use serde::Serialize;

use crate::generation::GenerationError;
use crate::project::ProjectStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the entitlement, pipeline and payment services.
///
/// Every variant carries a stable machine code so callers can branch on it
/// without parsing the human-readable message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Payment Required")]
    PaymentRequired { email: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("cannot {action} project {project_id} while it is {status}")]
    InvalidState {
        project_id: String,
        status: ProjectStatus,
        action: &'static str,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{kind} {id} was modified concurrently")]
    Conflict { kind: &'static str, id: String },

    #[error("unauthorized")]
    Unauthorized,

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::PaymentRequired { .. } => "PAYMENT_REQUIRED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Validation(_) => "VALIDATION",
            Self::Conflict { .. } => "CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Generation(_) => "GENERATION_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::PaymentRequired { .. } => 402,
            Self::NotFound { .. } => 404,
            Self::InvalidState { .. } | Self::Conflict { .. } => 409,
            Self::Validation(_) => 400,
            Self::Unauthorized => 401,
            Self::Generation(_) => 502,
            Self::Internal(_) => 500,
        }
    }

    pub fn body(&self) -> ErrorBody {
        let error = match self {
            // Internal details stay in the logs.
            Self::Internal(_) => "Internal Server Error".to_owned(),
            other => other.to_string(),
        };
        ErrorBody {
            error,
            code: self.code(),
        }
    }
}

/// Structured payload returned to user-facing callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_required_body_matches_contract() {
        let err = Error::PaymentRequired {
            email: "a@b.com".to_owned(),
        };
        let body = serde_json::to_value(err.body()).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"error": "Payment Required", "code": "PAYMENT_REQUIRED"})
        );
        assert_eq!(err.http_status(), 402);
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = Error::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.body().error, "Internal Server Error");
        assert_eq!(err.code(), "INTERNAL");
    }
}
