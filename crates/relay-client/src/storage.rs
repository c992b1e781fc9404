//! Persisted client state: the event cursor, the unread set, the last
//! conversation snapshot and the contact cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::contacts::ContactInfo;
use crate::error::ClientError;

/// Last observed state of one conversation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnownConversation {
    pub date_updated: Option<String>,
    pub friendly_name: Option<String>,
}

pub type ConversationSnapshot = BTreeMap<String, KnownConversation>;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientState {
    #[serde(with = "relay_core::time::lenient", skip_serializing_if = "Option::is_none")]
    pub last_notification_timestamp: Option<DateTime<Utc>>,
    /// Conversation sids in the order they became unread.
    pub unread_conversations: Vec<String>,
    pub last_known_conversations: ConversationSnapshot,
    pub contact_cache: BTreeMap<String, ContactInfo>,
}

/// Where [`ClientState`] lives between runs.
pub trait StateBackend: Send + Sync {
    fn load(&self) -> Result<ClientState, ClientError>;
    fn save(&self, state: &ClientState) -> Result<(), ClientError>;
}

/// JSON file written through a temp file and rename.
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateBackend for JsonFileBackend {
    /// A missing file is a fresh install. An unreadable one is logged and
    /// replaced on the next save.
    fn load(&self) -> Result<ClientState, ClientError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ClientState::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "client state unreadable, starting fresh"
                );
                Ok(ClientState::default())
            }
        }
    }

    fn save(&self, state: &ClientState) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        let temp = self.path.with_extension("json.tmp");
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// In-process backend for tests and one-shot commands.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<ClientState>,
    saves: Mutex<usize>,
}

impl MemoryBackend {
    pub fn with_state(state: ClientState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: Mutex::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }

    pub fn stored(&self) -> ClientState {
        self.state.lock().clone()
    }
}

impl StateBackend for MemoryBackend {
    fn load(&self) -> Result<ClientState, ClientError> {
        Ok(self.state.lock().clone())
    }

    fn save(&self, state: &ClientState) -> Result<(), ClientError> {
        *self.state.lock() = state.clone();
        *self.saves.lock() += 1;
        Ok(())
    }
}

impl<T: StateBackend + ?Sized> StateBackend for std::sync::Arc<T> {
    fn load(&self) -> Result<ClientState, ClientError> {
        (**self).load()
    }

    fn save(&self, state: &ClientState) -> Result<(), ClientError> {
        (**self).save(state)
    }
}

/// Write-through cache over a [`StateBackend`]. Every mutation that changes
/// state is persisted before the call returns.
pub struct ClientStorage {
    backend: Box<dyn StateBackend>,
    state: Mutex<ClientState>,
}

impl ClientStorage {
    pub fn open(backend: impl StateBackend + 'static) -> Result<Self, ClientError> {
        let state = backend.load()?;
        Ok(Self {
            backend: Box::new(backend),
            state: Mutex::new(state),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Box::new(MemoryBackend::default()),
            state: Mutex::new(ClientState::default()),
        }
    }

    fn update<R>(&self, f: impl FnOnce(&mut ClientState) -> (R, bool)) -> Result<R, ClientError> {
        let mut state = self.state.lock();
        let (result, changed) = f(&mut state);
        if changed {
            self.backend.save(&state)?;
        }
        Ok(result)
    }

    pub fn snapshot(&self) -> ClientState {
        self.state.lock().clone()
    }

    // ── Event cursor ──────────────────────────────────────────────────

    pub fn cursor(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_notification_timestamp
    }

    /// Move the cursor forward to `timestamp`. Older timestamps are ignored,
    /// so the cursor never rewinds. Returns whether it moved.
    pub fn advance_cursor(&self, timestamp: DateTime<Utc>) -> Result<bool, ClientError> {
        self.update(|state| {
            let moved = state.last_notification_timestamp.is_none_or(|current| timestamp > current);
            if moved {
                state.last_notification_timestamp = Some(timestamp);
            }
            (moved, moved)
        })
    }

    /// Forget the cursor; the next poll returns the server's whole buffer.
    pub fn reset_cursor(&self) -> Result<(), ClientError> {
        self.update(|state| {
            let changed = state.last_notification_timestamp.take().is_some();
            ((), changed)
        })
    }

    // ── Unread set ────────────────────────────────────────────────────

    pub fn unread(&self) -> Vec<String> {
        self.state.lock().unread_conversations.clone()
    }

    pub fn is_unread(&self, conversation_sid: &str) -> bool {
        self.state.lock().unread_conversations.iter().any(|s| s == conversation_sid)
    }

    /// Badge count: cardinality of the unread set.
    pub fn badge(&self) -> usize {
        self.state.lock().unread_conversations.len()
    }

    /// Returns `true` when the conversation was not already unread.
    pub fn mark_unread(&self, conversation_sid: &str) -> Result<bool, ClientError> {
        self.update(|state| {
            if state.unread_conversations.iter().any(|s| s == conversation_sid) {
                return (false, false);
            }
            state.unread_conversations.push(conversation_sid.to_string());
            (true, true)
        })
    }

    /// Remove exactly this conversation from the unread set. Absent sids are
    /// a no-op and do not touch the backend.
    pub fn mark_read(&self, conversation_sid: &str) -> Result<bool, ClientError> {
        self.update(|state| {
            let before = state.unread_conversations.len();
            state.unread_conversations.retain(|s| s != conversation_sid);
            let removed = state.unread_conversations.len() != before;
            (removed, removed)
        })
    }

    // ── Conversation snapshot ─────────────────────────────────────────

    pub fn known_conversations(&self) -> ConversationSnapshot {
        self.state.lock().last_known_conversations.clone()
    }

    pub fn replace_snapshot(&self, snapshot: ConversationSnapshot) -> Result<(), ClientError> {
        self.update(|state| {
            let changed = state.last_known_conversations != snapshot;
            state.last_known_conversations = snapshot;
            ((), changed)
        })
    }

    // ── Contact cache ─────────────────────────────────────────────────

    pub fn cached_contact(&self, phone: &str) -> Option<ContactInfo> {
        self.state.lock().contact_cache.get(phone).cloned()
    }

    pub fn cache_contact(&self, phone: &str, contact: ContactInfo) -> Result<(), ClientError> {
        self.update(|state| {
            let changed = state.contact_cache.get(phone) != Some(&contact);
            state.contact_cache.insert(phone.to_string(), contact);
            ((), changed)
        })
    }
}
