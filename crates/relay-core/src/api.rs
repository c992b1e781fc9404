//! JSON bodies exchanged between the relay server and its clients.

use serde::{Deserialize, Serialize};

use crate::events::NotificationEvent;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PollResponse {
    pub events: Vec<NotificationEvent>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantSummary {
    pub sid: String,
    pub address: Option<String>,
    #[serde(rename = "type")]
    pub binding_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationSummary {
    pub sid: String,
    pub friendly_name: Option<String>,
    pub date_created: Option<String>,
    pub date_updated: Option<String>,
    pub state: Option<String>,
    pub participants: Vec<ParticipantSummary>,
}

impl ConversationSummary {
    /// Address of the first participant bound over SMS.
    pub fn sms_address(&self) -> Option<&str> {
        self.participants
            .iter()
            .filter(|p| p.binding_type.as_deref().is_none_or(|t| t == "sms"))
            .find_map(|p| p.address.as_deref())
    }

    pub fn display_name(&self) -> &str {
        self.friendly_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.sms_address())
            .unwrap_or(&self.sid)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationListResponse {
    pub conversations: Vec<ConversationSummary>,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaSummary {
    pub sid: String,
    pub content_type: Option<String>,
    pub filename: Option<String>,
    pub size: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MessageSummary {
    pub sid: String,
    pub author: Option<String>,
    pub body: Option<String>,
    pub date_created: Option<String>,
    pub index: Option<u64>,
    pub participant_sid: Option<String>,
    pub attributes: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaSummary>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub messages: Vec<MessageSummary>,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub success: bool,
    pub message: MessageSummary,
}
