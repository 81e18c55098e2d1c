//! Error kinds surfaced by the triage engine.
//!
//! Provider failures (`ProviderError`) stay close to the external call; each component maps
//! them into its own `*Unavailable` kind so callers can tell which step degraded.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T, E = TriageError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("classification unavailable: {0}")]
    ClassificationUnavailable(String),

    #[error("duplicate check unavailable: {0}")]
    DuplicateCheckUnavailable(String),

    #[error("priority scoring unavailable: {0}")]
    PriorityScoringUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl TriageError {
    /// Stable snake_case tag used in trace outputs and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ClassificationUnavailable(_) => "classification_unavailable",
            Self::DuplicateCheckUnavailable(_) => "duplicate_check_unavailable",
            Self::PriorityScoringUnavailable(_) => "priority_scoring_unavailable",
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for TriageError {
    fn into_response(self) -> Response {
        let body = json!({ "error": self.to_string(), "kind": self.kind() });
        (self.status(), Json(body)).into_response()
    }
}

/// Failure of a single call to the external classification service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("http: {0}")]
    Http(String),

    #[error("decode: {0}")]
    Decode(String),

    #[error("daily limit of {0} calls reached")]
    RateLimited(u32),

    #[error("provider disabled")]
    Disabled,

    #[error("local worker: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_propagation_policy() {
        assert_eq!(
            TriageError::InvalidInput("title".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(TriageError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            TriageError::ClassificationUnavailable("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn provider_error_renders_context() {
        let e = TriageError::ClassificationUnavailable(ProviderError::Timeout(250).to_string());
        assert_eq!(e.to_string(), "classification unavailable: timed out after 250 ms");
        assert_eq!(e.kind(), "classification_unavailable");
    }
}
