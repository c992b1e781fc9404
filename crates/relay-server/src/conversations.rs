use std::collections::HashSet;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use relay_core::api::ConversationListResponse;
use relay_core::direction::SYSTEM_AUTHOR;
use relay_core::time::format_timestamp;
use relay_provider::conversations::list_conversation_summaries;
use relay_provider::types::{NewConversationMessage, SmsFilter, SmsMessage};

use crate::auth::require_api_key;
use crate::error::ApiError;
use crate::server::AppState;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 100;
pub const DEFAULT_BACKFILL_LIMIT: usize = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListParams {
    pub limit: Option<String>,
    pub phone_numbers: Option<String>,
}

impl ListParams {
    /// Unparseable or zero limits fall back to the default; large ones are capped.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse::<usize>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .min(MAX_LIST_LIMIT)
    }

    pub fn phone_filter(&self) -> Option<HashSet<String>> {
        let numbers: HashSet<String> = self
            .phone_numbers
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
        (!numbers.is_empty()).then_some(numbers)
    }
}

/// `GET /api/conversations`
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> Result<Json<ConversationListResponse>, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, None)?;

    let mut conversations =
        list_conversation_summaries(state.provider.as_ref(), params.effective_limit())
            .await
            .map_err(|e| ApiError::upstream("Failed to fetch conversations", e))?;

    if let Some(numbers) = params.phone_filter() {
        conversations.retain(|c| {
            c.participants
                .iter()
                .any(|p| p.address.as_ref().is_some_and(|a| numbers.contains(a)))
        });
    }

    let count = conversations.len();
    Ok(Json(ConversationListResponse { conversations, count }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateRequest {
    pub phone_number: Option<String>,
    pub twilio_number: Option<String>,
    pub friendly_name: Option<String>,
}

/// `POST /api/conversations/create`
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, None)?;
    let (Some(phone), Some(proxy)) = (request.phone_number, request.twilio_number) else {
        return Err(ApiError::BadRequest("phoneNumber and twilioNumber are required".into()));
    };
    let friendly_name = request
        .friendly_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| phone.clone());

    let provider = state.provider.as_ref();
    let conversation = provider
        .create_conversation(&friendly_name)
        .await
        .map_err(|e| ApiError::upstream("Failed to create conversation", e))?;
    provider
        .add_sms_participant(&conversation.sid, &phone, &proxy)
        .await
        .map_err(|e| ApiError::upstream("Failed to add participant", e))?;

    info!(conversation_sid = %conversation.sid, "created conversation");
    Ok(Json(json!({
        "success": true,
        "conversation": {
            "sid": conversation.sid,
            "friendlyName": conversation.friendly_name,
            "dateCreated": conversation.date_created.as_ref().map(format_timestamp),
            "phoneNumber": phone,
            "twilioNumber": proxy,
        }
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackfillRequest {
    pub conversation_sid: Option<String>,
    pub phone_number: Option<String>,
    pub twilio_number: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillFailure {
    pub message_sid: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillResponse {
    pub success: bool,
    pub total_messages: usize,
    pub added_count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BackfillFailure>,
    pub conversation_sid: String,
}

fn backfill_message(message: &SmsMessage, provider_number: &str) -> NewConversationMessage {
    let from = message.from.clone().unwrap_or_default();
    let author = if from == provider_number {
        SYSTEM_AUTHOR.to_string()
    } else {
        from
    };
    let attributes = json!({
        "originalMessageSid": message.sid,
        "direction": message.direction,
        "status": message.status,
        "backfilled": true,
    });
    NewConversationMessage {
        author,
        body: message.body.clone().unwrap_or_default(),
        date_created: message.date_created,
        attributes: Some(attributes.to_string()),
    }
}

/// `POST /api/conversations/backfill`: import SMS history in both directions
/// into a conversation, oldest first.
pub async fn backfill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BackfillRequest>,
) -> Result<Json<BackfillResponse>, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, None)?;
    let (Some(conversation_sid), Some(phone), Some(proxy)) =
        (request.conversation_sid, request.phone_number, request.twilio_number)
    else {
        return Err(ApiError::BadRequest(
            "conversationSid, phoneNumber, and twilioNumber are required".into(),
        ));
    };
    let limit = request.limit.filter(|l| *l > 0).unwrap_or(DEFAULT_BACKFILL_LIMIT);

    let provider = state.provider.as_ref();
    let sent = provider
        .list_sms(SmsFilter {
            from: Some(proxy.clone()),
            to: Some(phone.clone()),
            limit,
        })
        .await
        .map_err(|e| ApiError::upstream("Failed to backfill messages", e))?;
    let received = provider
        .list_sms(SmsFilter {
            from: Some(phone.clone()),
            to: Some(proxy.clone()),
            limit,
        })
        .await
        .map_err(|e| ApiError::upstream("Failed to backfill messages", e))?;

    let mut history: Vec<SmsMessage> = sent.into_iter().chain(received).collect();
    history.sort_by_key(|m| m.date_created);

    let mut added = 0;
    let mut errors = Vec::new();
    for message in &history {
        match provider
            .create_message(&conversation_sid, backfill_message(message, &proxy))
            .await
        {
            Ok(_) => added += 1,
            Err(e) => {
                warn!(message_sid = %message.sid, error = %e, "failed to backfill message");
                errors.push(BackfillFailure {
                    message_sid: message.sid.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    info!(conversation_sid = %conversation_sid, total = history.len(), added, "backfill finished");
    Ok(Json(BackfillResponse {
        success: true,
        total_messages: history.len(),
        added_count: added,
        errors,
        conversation_sid,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::tests::{spawn, test_state};
    use relay_core::time::parse_timestamp;
    use relay_provider::mock::MockProvider;
    use serde_json::Value;
    use std::sync::Arc;

    fn params(limit: Option<&str>, phones: Option<&str>) -> ListParams {
        ListParams {
            limit: limit.map(Into::into),
            phone_numbers: phones.map(Into::into),
        }
    }

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(params(None, None).effective_limit(), 50);
        assert_eq!(params(Some("20"), None).effective_limit(), 20);
        assert_eq!(params(Some("500"), None).effective_limit(), 100);
        assert_eq!(params(Some("abc"), None).effective_limit(), 50);
        assert_eq!(params(Some("0"), None).effective_limit(), 50);
    }

    #[test]
    fn phone_filter_splits_csv() {
        let filter = params(None, Some("+1555, +1666,,")).phone_filter().unwrap();
        assert_eq!(filter.len(), 2);
        assert!(filter.contains("+1666"));
        assert!(params(None, Some(" , ")).phone_filter().is_none());
    }

    #[tokio::test]
    async fn lists_and_filters_conversations() {
        let provider = Arc::new(MockProvider::new());
        provider.add_conversation("CH1", "Alice", "+1555");
        provider.add_conversation("CH2", "Bob", "+1666");
        let (handle, url) = spawn(test_state(provider)).await;

        let all: ConversationListResponse = reqwest::get(format!("{url}/api/conversations"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.count, 2);

        let filtered: Value = reqwest::get(format!("{url}/api/conversations?phoneNumbers=%2B1666"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(filtered["count"], 1);
        assert_eq!(filtered["conversations"][0]["sid"], "CH2");
        assert_eq!(filtered["conversations"][0]["participants"][0]["type"], "sms");
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn create_uses_phone_as_default_name() {
        let provider = Arc::new(MockProvider::new());
        let (handle, url) = spawn(test_state(Arc::clone(&provider))).await;

        let body: Value = reqwest::Client::new()
            .post(format!("{url}/api/conversations/create"))
            .json(&json!({"phoneNumber": "+1555", "twilioNumber": "+1999"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["conversation"]["friendlyName"], "+1555");
        assert_eq!(provider.created_conversations().len(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn create_requires_numbers() {
        let (handle, url) = spawn(test_state(Arc::new(MockProvider::new()))).await;
        let resp = reqwest::Client::new()
            .post(format!("{url}/api/conversations/create"))
            .json(&json!({"phoneNumber": "+1555"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn backfill_imports_history_in_order() {
        let provider = Arc::new(MockProvider::new());
        let sms = |sid: &str, from: &str, to: &str, at: &str| SmsMessage {
            sid: sid.into(),
            from: Some(from.into()),
            to: Some(to.into()),
            body: Some(format!("body {sid}")),
            direction: Some("inbound".into()),
            date_created: parse_timestamp(at),
            ..Default::default()
        };
        provider.add_sms(sms("SM2", "+1999", "+1555", "2024-03-01T10:05:00Z"));
        provider.add_sms(sms("SM1", "+1555", "+1999", "2024-03-01T10:00:00Z"));
        provider.add_sms(sms("SM3", "+1555", "+1999", "2024-03-01T10:10:00Z"));
        let (handle, url) = spawn(test_state(Arc::clone(&provider))).await;

        let body: Value = reqwest::Client::new()
            .post(format!("{url}/api/conversations/backfill"))
            .json(&json!({
                "conversationSid": "CH1",
                "phoneNumber": "+1555",
                "twilioNumber": "+1999"
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["totalMessages"], 3);
        assert_eq!(body["addedCount"], 3);
        assert!(body.get("errors").is_none());

        let imported = provider.messages("CH1");
        let authors: Vec<_> = imported.iter().filter_map(|m| m.author.as_deref()).collect();
        assert_eq!(authors, ["+1555", "system", "+1555"]);
        let attributes: Value =
            serde_json::from_str(imported[0].attributes.as_deref().unwrap()).unwrap();
        assert_eq!(attributes["originalMessageSid"], "SM1");
        assert_eq!(attributes["backfilled"], true);
        handle.shutdown().await;
    }
}
