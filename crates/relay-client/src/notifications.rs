//! Local notifications and the routing table for notification clicks.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Which freshness signal raised a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySource {
    /// Event cursor polling.
    Poll,
    /// Conversation-list diffing.
    Refresh,
}

impl ActivitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Refresh => "refresh",
        }
    }
}

/// `{source}:{conversationSid}:{uuid}`. The conversation sid is embedded so
/// a click can be routed even after the outstanding entry expired.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(source: ActivitySource, conversation_sid: Option<&str>) -> Self {
        Self(format!(
            "{}:{}:{}",
            source.as_str(),
            conversation_sid.unwrap_or_default(),
            Uuid::new_v4().simple()
        ))
    }

    pub fn parse(raw: &str) -> Self {
        Self(raw.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn conversation_sid(&self) -> Option<&str> {
        let mut parts = self.0.splitn(3, ':');
        let _source = parts.next()?;
        let sid = parts.next()?;
        parts.next()?;
        (!sid.is_empty()).then_some(sid)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub source: ActivitySource,
    pub conversation_sid: Option<String>,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(
        source: ActivitySource,
        conversation_sid: Option<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: NotificationId::new(source, conversation_sid.as_deref()),
            source,
            conversation_sid,
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Receives "new activity" from both freshness signals.
pub trait ActivitySink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes notifications to the log. Used by the headless `watch` command.
pub struct LogSink;

impl ActivitySink for LogSink {
    fn notify(&self, notification: &Notification) {
        tracing::info!(
            id = %notification.id,
            source = notification.source.as_str(),
            conversation_sid = notification.conversation_sid.as_deref().unwrap_or(""),
            title = %notification.title,
            body = %notification.body,
            "new activity"
        );
    }
}

/// Keeps every notification it receives.
#[derive(Default)]
pub struct CollectingSink {
    received: Mutex<Vec<Notification>>,
}

impl CollectingSink {
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.received.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.lock().is_empty()
    }
}

impl ActivitySink for CollectingSink {
    fn notify(&self, notification: &Notification) {
        self.received.lock().push(notification.clone());
    }
}

struct Outstanding {
    conversation_sid: Option<String>,
    raised_at: Instant,
}

/// Notifications raised but not yet clicked, dismissed or expired.
pub struct OutstandingNotifications {
    entries: Mutex<HashMap<NotificationId, Outstanding>>,
    ttl: Duration,
}

impl OutstandingNotifications {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn track(&self, notification: &Notification) {
        self.entries.lock().insert(
            notification.id.clone(),
            Outstanding {
                conversation_sid: notification.conversation_sid.clone(),
                raised_at: Instant::now(),
            },
        );
    }

    /// Remove the entry and return the conversation it routes to.
    pub fn acknowledge(&self, id: &NotificationId) -> Option<String> {
        self.entries.lock().remove(id).and_then(|o| o.conversation_sid)
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop entries older than the TTL. Returns how many were removed.
    pub fn expire(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, o| now.duration_since(o.raised_at) < self.ttl);
        before - entries.len()
    }
}
