//! Server, provider and forwarding settings.

use serde::{Deserialize, Serialize};

/// Where the poll endpoint reads events from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSource {
    /// The in-memory event store fed by the webhook.
    #[default]
    Store,
    /// A scan of recent provider conversation messages.
    Provider,
}

impl NotificationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Provider => "provider",
        }
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Shared secret for authenticated routes. Unset disables the check.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    /// Allowed CORS origin. Unset allows any origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origin: Option<String>,
    /// Number of events retained by the event store.
    pub event_capacity: usize,
    /// Backing source of the poll endpoint.
    pub notification_source: NotificationSource,
    /// Delay before attaching media metadata to a conversation message.
    pub media_settle_delay_ms: u64,
    /// Conversations scanned per request when `notificationSource` is `provider`.
    pub scan_conversation_limit: usize,
    /// Messages read per conversation during a provider scan.
    pub scan_message_limit: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            api_secret: None,
            allowed_origin: None,
            event_capacity: 200,
            notification_source: NotificationSource::Store,
            media_settle_delay_ms: 2_000,
            scan_conversation_limit: 100,
            scan_message_limit: 20,
        }
    }
}

/// Messaging provider account and endpoint settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// The relay's own phone number, used as proxy address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    /// Region for the conversation media host (`mcs.{region}`).
    pub region: String,
    pub conversations_base_url: String,
    pub api_base_url: String,
    /// Overrides the region-derived media host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_base_url: Option<String>,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            phone_number: None,
            region: "us1".to_string(),
            conversations_base_url: "https://conversations.twilio.com/v1".to_string(),
            api_base_url: "https://api.twilio.com/2010-04-01".to_string(),
            media_base_url: None,
            request_timeout_ms: 30_000,
        }
    }
}

/// Forwarding of raw webhook payloads to an automation endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForwardingSettings {
    /// Destination URL. Unset disables forwarding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ForwardingSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: 10_000,
        }
    }
}
