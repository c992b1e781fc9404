//! Provider resource shapes as returned by its REST APIs (snake_case JSON).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::api::{ConversationSummary, MediaSummary, MessageSummary, ParticipantSummary};
use relay_core::time::format_timestamp;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conversation {
    pub sid: String,
    pub friendly_name: Option<String>,
    pub chat_service_sid: Option<String>,
    pub state: Option<String>,
    #[serde(with = "relay_core::time::lenient")]
    pub date_created: Option<DateTime<Utc>>,
    #[serde(with = "relay_core::time::lenient")]
    pub date_updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingBinding {
    #[serde(rename = "type")]
    pub binding_type: Option<String>,
    pub address: Option<String>,
    pub proxy_address: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Participant {
    pub sid: String,
    pub identity: Option<String>,
    pub messaging_binding: Option<MessagingBinding>,
}

impl Participant {
    pub fn address(&self) -> Option<&str> {
        self.messaging_binding.as_ref()?.address.as_deref()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaDescriptor {
    pub sid: String,
    pub content_type: Option<String>,
    pub filename: Option<String>,
    pub size: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationMessage {
    pub sid: String,
    pub index: Option<u64>,
    pub author: Option<String>,
    pub body: Option<String>,
    pub participant_sid: Option<String>,
    pub attributes: Option<String>,
    #[serde(with = "relay_core::time::lenient")]
    pub date_created: Option<DateTime<Utc>>,
    pub media: Option<Vec<MediaDescriptor>>,
}

impl ConversationMessage {
    pub fn has_media(&self) -> bool {
        self.media.as_ref().is_some_and(|m| !m.is_empty())
    }
}

/// A message from the provider's SMS API (as opposed to a conversation message).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsMessage {
    pub sid: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub body: Option<String>,
    pub direction: Option<String>,
    pub status: Option<String>,
    pub num_media: Option<String>,
    #[serde(with = "relay_core::time::lenient")]
    pub date_created: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageQuery {
    pub limit: usize,
    pub order: Order,
}

impl MessageQuery {
    pub fn newest(limit: usize) -> Self {
        Self {
            limit,
            order: Order::Desc,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NewConversationMessage {
    pub author: String,
    pub body: String,
    pub date_created: Option<DateTime<Utc>>,
    pub attributes: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SmsFilter {
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: usize,
}

/// Which media resource to fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MediaSource {
    /// Media attached to an SMS/MMS message.
    Message { message_sid: String, media_sid: String },
    /// Media stored by the conversations media service.
    Conversation { service_sid: String, media_sid: String },
}

impl MediaSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "message",
            Self::Conversation { .. } => "conversation",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MediaContent {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

// ── Page envelopes ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ConversationPage {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ParticipantPage {
    pub participants: Vec<Participant>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MessagePage {
    pub messages: Vec<ConversationMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SmsPage {
    pub messages: Vec<SmsMessage>,
}

// ── Conversions into API summaries ──────────────────────────────────────────

impl From<&Participant> for ParticipantSummary {
    fn from(p: &Participant) -> Self {
        let binding = p.messaging_binding.as_ref();
        Self {
            sid: p.sid.clone(),
            address: binding.and_then(|b| b.address.clone()),
            binding_type: binding.and_then(|b| b.binding_type.clone()),
        }
    }
}

impl Conversation {
    pub fn summarize(&self, participants: &[Participant]) -> ConversationSummary {
        ConversationSummary {
            sid: self.sid.clone(),
            friendly_name: self.friendly_name.clone(),
            date_created: self.date_created.as_ref().map(format_timestamp),
            date_updated: self.date_updated.as_ref().map(format_timestamp),
            state: self.state.clone(),
            participants: participants.iter().map(ParticipantSummary::from).collect(),
        }
    }
}

impl From<&ConversationMessage> for MessageSummary {
    fn from(m: &ConversationMessage) -> Self {
        Self {
            sid: m.sid.clone(),
            author: m.author.clone(),
            body: m.body.clone(),
            date_created: m.date_created.as_ref().map(format_timestamp),
            index: m.index,
            participant_sid: m.participant_sid.clone(),
            attributes: m.attributes.clone(),
            media: m
                .media
                .iter()
                .flatten()
                .map(|d| MediaSummary {
                    sid: d.sid.clone(),
                    content_type: d.content_type.clone(),
                    filename: d.filename.clone(),
                    size: d.size,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversation_parses_iso_dates() {
        let raw = json!({
            "sid": "CH1",
            "friendly_name": "SMS with +1555",
            "date_created": "2024-03-01T10:00:00Z",
            "date_updated": "2024-03-02T10:00:00Z",
            "state": "active"
        });
        let conversation: Conversation = serde_json::from_value(raw).unwrap();
        let summary = conversation.summarize(&[]);
        assert_eq!(summary.date_updated.as_deref(), Some("2024-03-02T10:00:00.000Z"));
        assert_eq!(summary.state.as_deref(), Some("active"));
    }

    #[test]
    fn sms_message_parses_rfc2822_dates() {
        let raw = json!({
            "sid": "SM1",
            "from": "+1555",
            "to": "+1666",
            "body": "hi",
            "date_created": "Fri, 01 Mar 2024 10:00:00 +0000",
            "direction": "inbound"
        });
        let message: SmsMessage = serde_json::from_value(raw).unwrap();
        assert!(message.date_created.is_some());
    }

    #[test]
    fn participant_binding_maps_to_summary() {
        let raw = json!({
            "sid": "MB1",
            "messaging_binding": {"type": "sms", "address": "+1555", "proxy_address": "+1666"}
        });
        let participant: Participant = serde_json::from_value(raw).unwrap();
        assert_eq!(participant.address(), Some("+1555"));
        let summary = ParticipantSummary::from(&participant);
        assert_eq!(summary.binding_type.as_deref(), Some("sms"));
    }

    #[test]
    fn chat_participant_has_no_address() {
        let participant: Participant = serde_json::from_value(json!({
            "sid": "MB2",
            "identity": "agent@example.com",
            "messaging_binding": null
        }))
        .unwrap();
        assert_eq!(participant.address(), None);
    }

    #[test]
    fn message_summary_carries_media() {
        let message = ConversationMessage {
            sid: "IM1".into(),
            media: Some(vec![MediaDescriptor {
                sid: "ME1".into(),
                content_type: Some("image/png".into()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(message.has_media());
        let summary = MessageSummary::from(&message);
        assert_eq!(summary.media[0].sid, "ME1");
    }
}
