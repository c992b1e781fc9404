//! Authenticated media proxies, so clients never hold provider credentials.

use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use serde::Deserialize;

use relay_provider::types::MediaSource;
use relay_telemetry::metrics::MEDIA_PROXY_TOTAL;

use crate::auth::require_api_key;
use crate::error::ApiError;
use crate::server::AppState;

const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

#[derive(Debug, Default, Deserialize)]
pub struct MediaParams {
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

/// `GET /api/media/{message_sid}/{media_sid}`
pub async fn message_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((message_sid, media_sid)): Path<(String, String)>,
    Query(params): Query<MediaParams>,
) -> Result<Response, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, params.api_key.as_deref())?;
    proxy(&state, MediaSource::Message { message_sid, media_sid }, "image/jpeg").await
}

/// `GET /api/conversation-media/{service_sid}/{media_sid}`
pub async fn conversation_media(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((service_sid, media_sid)): Path<(String, String)>,
    Query(params): Query<MediaParams>,
) -> Result<Response, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, params.api_key.as_deref())?;
    proxy(
        &state,
        MediaSource::Conversation { service_sid, media_sid },
        "application/octet-stream",
    )
    .await
}

async fn proxy(
    state: &AppState,
    source: MediaSource,
    fallback_type: &'static str,
) -> Result<Response, ApiError> {
    let kind = source.kind();
    let media = match state.provider.fetch_media(&source).await {
        Ok(media) => media,
        Err(e) => {
            counter!(MEDIA_PROXY_TOTAL, "kind" => kind, "outcome" => "error").increment(1);
            return Err(match e.status().and_then(|s| StatusCode::from_u16(s).ok()) {
                Some(status) => {
                    tracing::warn!(kind, status = status.as_u16(), "upstream media request failed");
                    ApiError::UpstreamStatus {
                        context: "Failed to fetch media from provider",
                        status,
                    }
                }
                None => ApiError::upstream("Failed to proxy media", e),
            });
        }
    };
    counter!(MEDIA_PROXY_TOTAL, "kind" => kind, "outcome" => "ok").increment(1);

    let content_type = media.content_type.unwrap_or_else(|| fallback_type.to_string());
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, content_type), (CACHE_CONTROL, IMMUTABLE_CACHE.to_string())],
        media.bytes,
    )
        .into_response())
}
