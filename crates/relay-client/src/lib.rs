//! Inbox client for the relay server.
//!
//! Two independent freshness signals feed one [`notifications::ActivitySink`]:
//! the [`poller::NotificationPoller`] follows the server's event cursor, and
//! the [`reconciler::ConversationReconciler`] diffs conversation-list
//! snapshots. Their watermarks live side by side in
//! [`storage::ClientStorage`] and are never merged.

pub mod backend;
pub mod contacts;
pub mod error;
pub mod inbox;
pub mod notifications;
pub mod poller;
pub mod reconciler;
pub mod schedule;
pub mod storage;

pub use backend::{BackendClient, ConversationFeed, EventFeed};
pub use error::ClientError;
pub use inbox::Inbox;
pub use notifications::{
    ActivitySink, LogSink, Notification, NotificationId, OutstandingNotifications,
};
pub use poller::{NotificationPoller, PollOutcome};
pub use reconciler::{ConversationReconciler, ReconcileOutcome};
pub use storage::{ClientState, ClientStorage, JsonFileBackend, MemoryBackend, StateBackend};
