use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use relay_core::api::{MessageListResponse, MessageSummary, SendMessageRequest, SendMessageResponse};
use relay_core::direction::SYSTEM_AUTHOR;
use relay_provider::types::{MessageQuery, NewConversationMessage};

use crate::auth::require_api_key;
use crate::error::ApiError;
use crate::server::AppState;

/// Messages returned per conversation.
pub const THREAD_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListParams {
    pub conversation_sid: Option<String>,
}

/// `GET /api/messages?conversationSid=`: most recent messages, oldest first.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<MessageListResponse>, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, None)?;
    let Some(conversation_sid) = params.conversation_sid.filter(|s| !s.is_empty()) else {
        return Err(ApiError::BadRequest("conversationSid is required".into()));
    };

    let newest_first = state
        .provider
        .list_messages(&conversation_sid, MessageQuery::newest(THREAD_LIMIT))
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch messages", e))?;
    let messages: Vec<MessageSummary> =
        newest_first.iter().rev().map(MessageSummary::from).collect();
    let count = messages.len();
    Ok(Json(MessageListResponse { messages, count }))
}

/// `POST /api/send-message`: append a message to a conversation. The
/// provider delivers it to SMS participants.
pub async fn send(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, None)?;
    let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
    let (Some(conversation_sid), Some(body)) =
        (non_empty(request.conversation_sid), non_empty(request.message))
    else {
        return Err(ApiError::BadRequest("conversationSid and message are required".into()));
    };

    let message = state
        .provider
        .create_message(
            &conversation_sid,
            NewConversationMessage {
                author: request.author.unwrap_or_else(|| SYSTEM_AUTHOR.to_string()),
                body,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| ApiError::upstream("Failed to send message", e))?;

    tracing::info!(
        conversation_sid = %conversation_sid,
        message_sid = %message.sid,
        "message sent"
    );
    Ok(Json(SendMessageResponse {
        success: true,
        message: MessageSummary::from(&message),
    }))
}
