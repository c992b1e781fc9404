//! User-driven transitions: opening a conversation and clicking a
//! notification.

use std::sync::Arc;

use tracing::debug;

use crate::error::ClientError;
use crate::notifications::{NotificationId, OutstandingNotifications};
use crate::storage::ClientStorage;

pub struct Inbox {
    storage: Arc<ClientStorage>,
    outstanding: Arc<OutstandingNotifications>,
}

impl Inbox {
    pub fn new(storage: Arc<ClientStorage>, outstanding: Arc<OutstandingNotifications>) -> Self {
        Self { storage, outstanding }
    }

    pub fn badge(&self) -> usize {
        self.storage.badge()
    }

    pub fn unread(&self) -> Vec<String> {
        self.storage.unread()
    }

    /// Clears the conversation's unread flag. Returns whether it was unread.
    pub fn open_conversation(&self, conversation_sid: &str) -> Result<bool, ClientError> {
        let was_unread = self.storage.mark_read(conversation_sid)?;
        debug!(conversation_sid, was_unread, badge = self.storage.badge(), "conversation opened");
        Ok(was_unread)
    }

    /// Routes a click to its conversation and opens it. Expired entries are
    /// still routed through the sid embedded in the identifier.
    pub fn notification_clicked(&self, id: &NotificationId) -> Result<Option<String>, ClientError> {
        let conversation_sid = self
            .outstanding
            .acknowledge(id)
            .or_else(|| id.conversation_sid().map(str::to_string));
        if let Some(sid) = &conversation_sid {
            self.open_conversation(sid)?;
        }
        Ok(conversation_sid)
    }

    /// The user closed the notification without opening it.
    pub fn notification_dismissed(&self, id: &NotificationId) {
        self.outstanding.acknowledge(id);
    }
}
