//! Conversation-list diffing. A redundant freshness signal that works even
//! when the server's event buffer never saw a message.

use std::sync::Arc;

use tracing::{debug, info, warn};

use relay_core::api::ConversationSummary;
use relay_core::time::parse_timestamp;

use crate::backend::ConversationFeed;
use crate::notifications::{ActivitySink, ActivitySource, Notification, OutstandingNotifications};
use crate::schedule::CycleGuard;
use crate::storage::{ClientStorage, ConversationSnapshot, KnownConversation};

/// Per-conversation changes between two snapshots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// Present now, absent before. Never notified.
    pub discovered: Vec<String>,
    /// Present in both with a later `dateUpdated`.
    pub updated: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty() && self.updated.is_empty()
    }
}

pub fn snapshot_of(conversations: &[ConversationSummary]) -> ConversationSnapshot {
    conversations
        .iter()
        .map(|c| {
            (
                c.sid.clone(),
                KnownConversation {
                    date_updated: c.date_updated.clone(),
                    friendly_name: Some(c.display_name().to_string()),
                },
            )
        })
        .collect()
}

/// Conversations that disappeared are dropped silently. An update is only
/// recognized when both timestamps parse and the new one is later.
pub fn diff_snapshots(
    previous: &ConversationSnapshot,
    current: &ConversationSnapshot,
) -> SnapshotDiff {
    let mut diff = SnapshotDiff::default();
    for (sid, now) in current {
        match previous.get(sid) {
            None => diff.discovered.push(sid.clone()),
            Some(before) => {
                let old = before.date_updated.as_deref().and_then(parse_timestamp);
                let new = now.date_updated.as_deref().and_then(parse_timestamp);
                if let (Some(old), Some(new)) = (old, new) {
                    if new > old {
                        diff.updated.push(sid.clone());
                    }
                }
            }
        }
    }
    diff
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A previous cycle was still in flight.
    Skipped,
    /// The fetch failed; the stored snapshot was kept.
    Failed,
    Completed(SnapshotDiff),
}

pub struct ConversationReconciler {
    feed: Arc<dyn ConversationFeed>,
    storage: Arc<ClientStorage>,
    sink: Arc<dyn ActivitySink>,
    outstanding: Arc<OutstandingNotifications>,
    limit: usize,
    guard: CycleGuard,
}

impl ConversationReconciler {
    pub fn new(
        feed: Arc<dyn ConversationFeed>,
        storage: Arc<ClientStorage>,
        sink: Arc<dyn ActivitySink>,
        outstanding: Arc<OutstandingNotifications>,
        limit: usize,
    ) -> Self {
        Self {
            feed,
            storage,
            sink,
            outstanding,
            limit,
            guard: CycleGuard::default(),
        }
    }

    pub async fn reconcile_once(&self) -> ReconcileOutcome {
        let Some(_token) = self.guard.try_enter() else {
            debug!("reconcile already in flight");
            return ReconcileOutcome::Skipped;
        };

        let conversations = match self.feed.fetch_conversations(self.limit).await {
            Ok(conversations) => conversations,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "conversation refresh failed");
                return ReconcileOutcome::Failed;
            }
        };

        let previous = self.storage.known_conversations();
        let current = snapshot_of(&conversations);
        let diff = diff_snapshots(&previous, &current);

        for sid in &diff.updated {
            if let Err(e) = self.storage.mark_unread(sid) {
                warn!(conversation_sid = %sid, error = %e, "failed to persist unread state");
            }
            let title = current
                .get(sid)
                .and_then(|c| c.friendly_name.clone())
                .unwrap_or_else(|| sid.clone());
            let notification =
                Notification::new(ActivitySource::Refresh, Some(sid.clone()), title, "New message");
            self.outstanding.track(&notification);
            self.sink.notify(&notification);
        }

        if let Err(e) = self.storage.replace_snapshot(current) {
            warn!(error = %e, "failed to persist conversation snapshot");
        }
        if !diff.is_empty() {
            info!(
                discovered = diff.discovered.len(),
                updated = diff.updated.len(),
                badge = self.storage.badge(),
                "conversations reconciled"
            );
        }
        ReconcileOutcome::Completed(diff)
    }
}
