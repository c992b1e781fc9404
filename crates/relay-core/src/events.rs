use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::EventId;

/// Discriminator for notification events. Unrecognized kinds survive
/// deserialization so older clients can skip them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    IncomingMessage,
    #[serde(other)]
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IncomingMessage => "incoming_message",
            Self::Unknown => "unknown",
        }
    }
}

/// A recorded notification, as stored and as returned by the poll endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: EventId,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(with = "crate::time::canonical")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// Input to the event store. The store assigns the id, and the timestamp
/// when none is given.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEvent {
    pub kind: EventKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: Map<String, Value>,
}

impl NewEvent {
    pub fn new(kind: EventKind, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            timestamp: None,
            payload,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Payload of an `incoming_message` event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncomingMessage {
    pub from: String,
    pub to: String,
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_sid: Option<String>,
    pub has_media: bool,
}

impl IncomingMessage {
    pub fn into_payload(self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn into_event(self) -> NewEvent {
        NewEvent::new(EventKind::IncomingMessage, self.into_payload())
    }

    /// Decode the payload of an event. Returns `None` for other kinds and
    /// for payloads missing the sender.
    pub fn from_event(event: &NotificationEvent) -> Option<Self> {
        if event.kind != EventKind::IncomingMessage {
            return None;
        }
        let message: Self = serde_json::from_value(Value::Object(event.payload.clone())).ok()?;
        if message.from.is_empty() {
            return None;
        }
        Some(message)
    }
}
