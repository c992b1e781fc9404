//! Settings type definitions.
//!
//! Every struct uses `#[serde(rename_all = "camelCase", default)]` so a
//! partial settings file deserializes with the remaining fields defaulted.

mod client;
mod server;

pub use client::{ClientSettings, ContactDirectorySettings};
pub use server::{ForwardingSettings, NotificationSource, ProviderSettings, ServerSettings};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// HTTP server settings (webhook, poll endpoint, proxies).
    pub server: ServerSettings,
    /// Messaging provider credentials and endpoints.
    pub provider: ProviderSettings,
    /// Outbound automation forwarding.
    pub forwarding: ForwardingSettings,
    /// Inbox client settings (poller, reconciler, local state).
    pub client: ClientSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Reject values that would only fail later at request time.
    pub fn validate(&self) -> Result<()> {
        require_http_url("client.backendUrl", &self.client.backend_url)?;
        require_http_url("provider.conversationsBaseUrl", &self.provider.conversations_base_url)?;
        require_http_url("provider.apiBaseUrl", &self.provider.api_base_url)?;
        if let Some(url) = &self.provider.media_base_url {
            require_http_url("provider.mediaBaseUrl", url)?;
        }
        if let Some(url) = &self.forwarding.webhook_url {
            require_http_url("forwarding.webhookUrl", url)?;
        }
        if let Some(directory) = &self.client.contact_directory {
            require_http_url("client.contactDirectory.baseUrl", &directory.base_url)?;
        }
        if self.server.event_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.eventCapacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn require_http_url(key: &str, value: &str) -> Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(SettingsError::InvalidValue(format!(
            "{key} must be an http(s) URL, got {value:?}"
        )))
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
