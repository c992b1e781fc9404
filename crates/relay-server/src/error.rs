use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use relay_provider::ProviderError;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    /// A provider call failed; reported as 500 with details.
    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: ProviderError,
    },
    /// The provider answered with a non-success status that is passed through.
    #[error("{context} (status {status})")]
    UpstreamStatus { context: &'static str, status: StatusCode },
}

impl ApiError {
    pub fn upstream(context: &'static str, source: ProviderError) -> Self {
        Self::Upstream { context, source }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UpstreamStatus { status, .. } => *status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Unauthorized => json!({ "error": "Unauthorized" }),
            Self::BadRequest(message) => json!({ "error": message }),
            Self::Upstream { context, source } => {
                tracing::error!(error = %source, kind = source.error_kind(), "{context}");
                json!({ "error": context, "details": source.to_string() })
            }
            Self::UpstreamStatus { context, .. } => json!({ "error": context }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::upstream("Failed", ProviderError::RateLimited).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::UpstreamStatus {
                context: "Failed",
                status: StatusCode::NOT_FOUND
            }
            .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn upstream_display_includes_source() {
        let err =
            ApiError::upstream("Failed to fetch conversations", ProviderError::MissingCredentials);
        assert_eq!(
            err.to_string(),
            "Failed to fetch conversations: provider credentials are not configured"
        );
    }
}
