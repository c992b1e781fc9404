//! Inbox client settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Poller, reconciler and local state settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Base URL of the relay server.
    pub backend_url: String,
    /// Shared secret sent as `x-api-key`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Notification poll period in seconds.
    pub poll_interval_secs: u64,
    /// Conversation reconcile period in seconds.
    pub refresh_interval_secs: u64,
    /// Conversations requested per reconcile.
    pub conversation_limit: usize,
    /// Location of the persisted client state. Defaults to
    /// `~/.relay/client-state.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_path: Option<String>,
    /// Seconds an unacknowledged notification stays routable.
    pub notification_ttl_secs: u64,
    pub request_timeout_ms: u64,
    /// Optional CRM lookup for contact names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_directory: Option<ContactDirectorySettings>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:3000".to_string(),
            api_key: None,
            poll_interval_secs: 60,
            refresh_interval_secs: 15,
            conversation_limit: 50,
            state_path: None,
            notification_ttl_secs: 600,
            request_timeout_ms: 15_000,
            contact_directory: None,
        }
    }
}

impl ClientSettings {
    /// Configured state path, or `client-state.json` in the settings directory.
    pub fn resolved_state_path(&self) -> PathBuf {
        match &self.state_path {
            Some(path) => PathBuf::from(path),
            None => crate::loader::settings_dir().join("client-state.json"),
        }
    }
}

/// CRM search endpoint used to resolve phone numbers to contact names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactDirectorySettings {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ContactDirectorySettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.streak.com/api/v1".to_string(),
            api_key: None,
        }
    }
}
