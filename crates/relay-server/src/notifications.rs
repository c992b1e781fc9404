use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use metrics::counter;
use serde::Deserialize;
use tracing::debug;

use relay_core::api::PollResponse;
use relay_core::direction::DirectionPolicy;
use relay_core::events::{EventKind, IncomingMessage, NotificationEvent};
use relay_core::ids::EventId;
use relay_core::time::parse_cursor;
use relay_provider::types::MessageQuery;
use relay_provider::{ConversationProvider, ProviderError};
use relay_settings::NotificationSource;
use relay_telemetry::metrics::{POLL_EVENTS_RETURNED_TOTAL, POLL_REQUESTS_TOTAL};

use crate::auth::require_api_key;
use crate::error::ApiError;
use crate::server::{AppState, ScanLimits};

#[derive(Debug, Default, Deserialize)]
pub struct PollParams {
    pub since: Option<String>,
    #[serde(rename = "apiKey")]
    pub api_key: Option<String>,
}

/// `GET /api/notifications/poll`
pub async fn poll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<PollParams>,
) -> Result<Json<PollResponse>, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, params.api_key.as_deref())?;
    counter!(POLL_REQUESTS_TOTAL, "source" => state.notification_source.as_str()).increment(1);

    let events = match state.notification_source {
        NotificationSource::Store => state.events.get_since(params.since.as_deref()),
        NotificationSource::Provider => scan_provider(
            state.provider.as_ref(),
            state.direction.as_ref(),
            parse_cursor(params.since.as_deref()),
            state.scan_limits,
        )
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch notifications", e))?,
    };

    debug!(count = events.len(), since = ?params.since, "served poll");
    counter!(POLL_EVENTS_RETURNED_TOTAL).increment(events.len() as u64);
    Ok(Json(PollResponse { events }))
}

/// Build notification events from recent conversation messages instead of
/// the event store. Messages newer than `since` from inbound authors are
/// returned oldest first; the message sid doubles as the event id.
pub async fn scan_provider(
    provider: &dyn ConversationProvider,
    direction: &dyn DirectionPolicy,
    since: Option<DateTime<Utc>>,
    limits: ScanLimits,
) -> Result<Vec<NotificationEvent>, ProviderError> {
    let conversations = provider.list_conversations(limits.conversations).await?;
    let threads = try_join_all(conversations.iter().map(|c| {
        provider.list_messages(&c.sid, MessageQuery::newest(limits.messages_per_conversation))
    }))
    .await?;

    let mut events = Vec::new();
    for (conversation, messages) in conversations.iter().zip(threads) {
        for message in messages {
            let Some(created) = message.date_created else {
                continue;
            };
            if since.is_some_and(|since| created <= since) {
                continue;
            }
            let author = message.author.clone().unwrap_or_default();
            if !direction.is_inbound(&author) {
                continue;
            }
            let payload = IncomingMessage {
                from: author,
                to: conversation.friendly_name.clone().unwrap_or_default(),
                body: message.body.clone(),
                conversation_sid: Some(conversation.sid.clone()),
                has_media: message.has_media(),
            }
            .into_payload();
            events.push(NotificationEvent {
                id: EventId::from_raw(message.sid.clone()),
                kind: EventKind::IncomingMessage,
                timestamp: created,
                payload,
            });
        }
    }
    events.sort_by_key(|e| e.timestamp);
    Ok(events)
}
