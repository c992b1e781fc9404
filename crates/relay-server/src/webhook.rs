//! Provider delivery callbacks (inbound) and the outbound send hook.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use relay_core::api::MessageSummary;
use relay_core::events::IncomingMessage;
use relay_core::ids::RequestId;
use relay_provider::conversations::find_or_create_conversation;
use relay_provider::types::{MessageQuery, NewConversationMessage};
use relay_provider::ConversationProvider;
use relay_telemetry::metrics::{EVENTS_RECORDED_TOTAL, EVENT_STORE_SIZE, WEBHOOK_DELIVERIES_TOTAL};

use crate::auth::require_api_key;
use crate::error::ApiError;
use crate::server::AppState;

const TWIML_EMPTY: &str = r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#;

/// Attachments the provider allows on a single MMS.
const MAX_MEDIA: usize = 10;

/// Recent messages inspected when matching a delivery to its conversation message.
const MEDIA_MATCH_WINDOW: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaAttachment {
    pub url: String,
    pub content_type: Option<String>,
}

/// A validated inbound SMS/MMS delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundDelivery {
    pub from: String,
    pub to: String,
    pub body: Option<String>,
    pub message_sid: Option<String>,
    pub num_media: usize,
    pub media: Vec<MediaAttachment>,
}

impl InboundDelivery {
    /// Requires non-empty `From` and `To`. A non-numeric `NumMedia` counts as
    /// zero and larger counts are capped at [`MAX_MEDIA`].
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self, ApiError> {
        let field = |name: &str| form.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());
        let (Some(from), Some(to)) = (field("From"), field("To")) else {
            return Err(ApiError::BadRequest("Missing required fields".into()));
        };
        let num_media = field("NumMedia")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0)
            .min(MAX_MEDIA);
        let media = (0..num_media)
            .filter_map(|i| {
                let url = field(&format!("MediaUrl{i}"))?;
                Some(MediaAttachment {
                    url: url.to_string(),
                    content_type: field(&format!("MediaContentType{i}")).map(str::to_string),
                })
            })
            .collect();
        Ok(Self {
            from: from.to_string(),
            to: to.to_string(),
            body: form.get("Body").cloned(),
            message_sid: field("MessageSid").map(str::to_string),
            num_media,
            media,
        })
    }

    pub fn to_event_payload(&self, conversation_sid: Option<String>) -> IncomingMessage {
        IncomingMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            body: self.body.clone(),
            conversation_sid,
            has_media: self.num_media > 0,
        }
    }

    /// Attribute object attached to the conversation message for MMS.
    pub fn media_attributes(&self) -> Map<String, Value> {
        let mut attributes = Map::new();
        if let Some(sid) = &self.message_sid {
            attributes.insert("MessageSid".into(), Value::String(sid.clone()));
        }
        attributes.insert("NumMedia".into(), Value::String(self.num_media.to_string()));
        for (i, media) in self.media.iter().enumerate() {
            attributes.insert(format!("MediaUrl{i}"), Value::String(media.url.clone()));
            if let Some(content_type) = &media.content_type {
                attributes.insert(
                    format!("MediaContentType{i}"),
                    Value::String(content_type.clone()),
                );
            }
        }
        attributes
    }
}

fn twiml_ack() -> Response {
    (StatusCode::OK, [(CONTENT_TYPE, "text/xml")], TWIML_EMPTY).into_response()
}

/// `POST /api/webhook/sms`: form-encoded delivery callback.
///
/// Always acknowledges with empty TwiML once the form validates; every side
/// effect is best-effort.
pub async fn receive_sms(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let delivery = match InboundDelivery::from_form(&form) {
        Ok(delivery) => delivery,
        Err(e) => {
            counter!(WEBHOOK_DELIVERIES_TOTAL, "outcome" => "invalid").increment(1);
            warn!("webhook delivery missing From or To");
            return e.into_response();
        }
    };
    counter!(WEBHOOK_DELIVERIES_TOTAL, "outcome" => "accepted").increment(1);

    let request_id = RequestId::new();
    info!(
        request_id = %request_id,
        from = %delivery.from,
        to = %delivery.to,
        num_media = delivery.num_media,
        "received inbound sms"
    );

    if let Some(forwarder) = &state.forwarder {
        let _ = forwarder.forward(form);
    }

    ingest(&state, delivery).await;
    twiml_ack()
}

/// Resolve the conversation, record the notification, and schedule the
/// media attribute patch.
pub async fn ingest(state: &AppState, delivery: InboundDelivery) {
    let lookup =
        find_or_create_conversation(state.provider.as_ref(), &delivery.from, &delivery.to).await;
    let conversation_sid = match lookup {
        Ok(conversation) => Some(conversation.sid),
        Err(e) => {
            warn!(
                error = %e,
                kind = e.error_kind(),
                "conversation lookup failed; recording without sid"
            );
            None
        }
    };

    if state.direction.is_inbound(&delivery.from) {
        let event = state
            .events
            .record(delivery.to_event_payload(conversation_sid.clone()).into_event());
        counter!(EVENTS_RECORDED_TOTAL, "type" => event.kind.as_str()).increment(1);
        gauge!(EVENT_STORE_SIZE).set(state.events.len() as f64);
        debug!(event_id = %event.id, "recorded notification event");
    } else {
        debug!(from = %delivery.from, "sender is not inbound; no event recorded");
    }

    if delivery.num_media > 0 {
        if let Some(sid) = conversation_sid {
            tokio::spawn(attach_media_attributes(
                Arc::clone(&state.provider),
                sid,
                delivery,
                state.media_settle_delay,
            ));
        }
    }
}

/// Wait for the provider to mirror the delivery into the conversation, then
/// copy the media fields onto the matching message's attributes.
async fn attach_media_attributes(
    provider: Arc<dyn ConversationProvider>,
    conversation_sid: String,
    delivery: InboundDelivery,
    settle_delay: Duration,
) {
    tokio::time::sleep(settle_delay).await;

    let recent = match provider
        .list_messages(&conversation_sid, MessageQuery::newest(MEDIA_MATCH_WINDOW))
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            warn!(
                error = %e,
                conversation_sid = %conversation_sid,
                "could not list messages for media patch"
            );
            return;
        }
    };

    let Some(target) = recent.iter().find(|m| {
        m.author.as_deref() == Some(delivery.from.as_str())
            && m.body.as_deref().unwrap_or("") == delivery.body.as_deref().unwrap_or("")
    }) else {
        debug!(conversation_sid = %conversation_sid, "no matching message for media patch");
        return;
    };

    let attributes = Value::Object(delivery.media_attributes()).to_string();
    match provider
        .update_message_attributes(&conversation_sid, &target.sid, &attributes)
        .await
    {
        Ok(()) => info!(
            message_sid = %target.sid,
            num_media = delivery.num_media,
            "attached media attributes"
        ),
        Err(e) => warn!(error = %e, message_sid = %target.sid, "failed to attach media attributes"),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct OutboundRequest {
    pub to: Option<String>,
    pub from: Option<String>,
    pub message: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundResponse {
    pub success: bool,
    pub conversation_sid: String,
    pub message: MessageSummary,
    pub sms_sid: String,
}

/// `PUT /api/webhook/sms`: send an SMS on behalf of an automation tool and
/// mirror it into the recipient's conversation.
pub async fn send_outbound(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OutboundRequest>,
) -> Result<Json<OutboundResponse>, ApiError> {
    require_api_key(state.api_secret.as_ref(), &headers, None)?;
    let (Some(to), Some(from), Some(body)) = (request.to, request.from, request.message) else {
        return Err(ApiError::BadRequest("to, from, and message are required".into()));
    };

    let request_id = RequestId::new();
    info!(request_id = %request_id, to = %to, "outbound sms requested");

    let provider = state.provider.as_ref();
    let conversation = find_or_create_conversation(provider, &to, &from)
        .await
        .map_err(|e| ApiError::upstream("Failed to resolve conversation", e))?;
    let message = provider
        .create_message(
            &conversation.sid,
            NewConversationMessage {
                author: request.author.unwrap_or_else(|| from.clone()),
                body: body.clone(),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| ApiError::upstream("Failed to record message", e))?;
    let sms = provider
        .send_sms(&from, &to, &body)
        .await
        .map_err(|e| ApiError::upstream("Failed to send SMS", e))?;

    Ok(Json(OutboundResponse {
        success: true,
        conversation_sid: conversation.sid,
        message: MessageSummary::from(&message),
        sms_sid: sms.sid,
    }))
}
