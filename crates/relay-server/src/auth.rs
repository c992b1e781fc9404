use axum::http::HeaderMap;
use metrics::counter;
use tracing::warn;

use relay_core::security::ApiKey;
use relay_telemetry::metrics::AUTH_REJECTIONS_TOTAL;

use crate::error::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Check the shared secret. The header wins over `query_key`; routes that
/// only accept the header pass `None`. With no secret configured every
/// request is allowed.
pub fn require_api_key(
    expected: Option<&ApiKey>,
    headers: &HeaderMap,
    query_key: Option<&str>,
) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .or(query_key);

    match provided {
        Some(key) if expected.matches(key) => Ok(()),
        _ => {
            counter!(AUTH_REJECTIONS_TOTAL).increment(1);
            warn!(supplied = provided.is_some(), "rejected request with invalid api key");
            Err(ApiError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_str(key).unwrap());
        headers
    }

    #[test]
    fn no_secret_allows_everything() {
        assert!(require_api_key(None, &HeaderMap::new(), None).is_ok());
    }

    #[test]
    fn header_match_is_accepted() {
        let key = ApiKey::new("s3cret");
        assert!(require_api_key(Some(&key), &headers_with("s3cret"), None).is_ok());
    }

    #[test]
    fn query_key_is_accepted_without_header() {
        let key = ApiKey::new("s3cret");
        assert!(require_api_key(Some(&key), &HeaderMap::new(), Some("s3cret")).is_ok());
    }

    #[test]
    fn header_takes_precedence_over_query() {
        let key = ApiKey::new("s3cret");
        let result = require_api_key(Some(&key), &headers_with("wrong"), Some("s3cret"));
        assert!(matches!(result, Err(ApiError::Unauthorized)));
    }

    #[test]
    fn missing_key_is_rejected() {
        let key = ApiKey::new("s3cret");
        assert!(matches!(
            require_api_key(Some(&key), &HeaderMap::new(), None),
            Err(ApiError::Unauthorized)
        ));
    }
}
