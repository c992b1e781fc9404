//! Follows the server's event cursor and raises one notification per
//! inbound message.

use std::sync::Arc;

use tracing::{debug, warn};

use relay_core::events::{EventKind, IncomingMessage};

use crate::backend::EventFeed;
use crate::contacts::ContactResolver;
use crate::notifications::{ActivitySink, ActivitySource, Notification, OutstandingNotifications};
use crate::schedule::CycleGuard;
use crate::storage::ClientStorage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// A previous cycle was still in flight.
    Skipped,
    /// The fetch failed; the cursor did not move.
    Failed,
    Completed { delivered: usize },
}

pub struct NotificationPoller {
    feed: Arc<dyn EventFeed>,
    storage: Arc<ClientStorage>,
    sink: Arc<dyn ActivitySink>,
    outstanding: Arc<OutstandingNotifications>,
    contacts: Option<Arc<ContactResolver>>,
    guard: CycleGuard,
}

impl NotificationPoller {
    pub fn new(
        feed: Arc<dyn EventFeed>,
        storage: Arc<ClientStorage>,
        sink: Arc<dyn ActivitySink>,
        outstanding: Arc<OutstandingNotifications>,
    ) -> Self {
        Self {
            feed,
            storage,
            sink,
            outstanding,
            contacts: None,
            guard: CycleGuard::default(),
        }
    }

    /// Resolve sender numbers to contact names in notification titles.
    pub fn with_contacts(mut self, contacts: Arc<ContactResolver>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    pub async fn poll_once(&self) -> PollOutcome {
        let Some(_token) = self.guard.try_enter() else {
            debug!("poll already in flight");
            return PollOutcome::Skipped;
        };

        let cursor = self.storage.cursor();
        let events = match self.feed.fetch_since(cursor).await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "notification poll failed");
                return PollOutcome::Failed;
            }
        };

        let mut delivered = 0;
        for event in &events {
            if event.kind != EventKind::IncomingMessage {
                debug!(id = %event.id, kind = event.kind.as_str(), "ignoring event");
                continue;
            }
            let Some(message) = IncomingMessage::from_event(event) else {
                debug!(id = %event.id, "incoming_message without sender");
                continue;
            };

            if let Err(e) = self.storage.advance_cursor(event.timestamp) {
                warn!(error = %e, "failed to persist notification cursor");
            }

            let title = match &self.contacts {
                Some(contacts) => contacts.display_name(&message.from).await,
                None => message.from.clone(),
            };
            let body = match message.body.as_deref().filter(|b| !b.is_empty()) {
                Some(body) => body.to_string(),
                None if message.has_media => "Sent an attachment".to_string(),
                None => String::new(),
            };
            let notification =
                Notification::new(ActivitySource::Poll, message.conversation_sid, title, body);
            self.outstanding.track(&notification);
            self.sink.notify(&notification);
            delivered += 1;
        }

        debug!(received = events.len(), delivered, "poll cycle complete");
        PollOutcome::Completed { delivered }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::{ContactDirectory, ContactInfo};
    use crate::error::ClientError;
    use crate::notifications::CollectingSink;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;
    use relay_core::events::NotificationEvent;
    use relay_core::ids::EventId;
    use std::time::Duration;

    /// Filters a fixed event list by cursor, like the server does.
    #[derive(Default)]
    struct ScriptedFeed {
        events: Mutex<Vec<NotificationEvent>>,
        failing: Mutex<bool>,
        cursors: Mutex<Vec<Option<DateTime<Utc>>>>,
    }

    impl ScriptedFeed {
        fn push(&self, event: NotificationEvent) {
            self.events.lock().push(event);
        }
    }

    #[async_trait]
    impl EventFeed for ScriptedFeed {
        async fn fetch_since(
            &self,
            cursor: Option<DateTime<Utc>>,
        ) -> Result<Vec<NotificationEvent>, ClientError> {
            self.cursors.lock().push(cursor);
            if *self.failing.lock() {
                return Err(ClientError::Network("connection refused".into()));
            }
            Ok(self
                .events
                .lock()
                .iter()
                .filter(|e| cursor.is_none_or(|c| e.timestamp > c))
                .cloned()
                .collect())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn incoming(secs: i64, from: &str, conversation: &str) -> NotificationEvent {
        let message = IncomingMessage {
            from: from.into(),
            to: "+1000".into(),
            body: Some(format!("hello at {secs}")),
            conversation_sid: Some(conversation.into()),
            has_media: false,
        };
        NotificationEvent {
            id: EventId::new(),
            kind: EventKind::IncomingMessage,
            timestamp: at(secs),
            payload: message.into_payload(),
        }
    }

    struct Harness {
        feed: Arc<ScriptedFeed>,
        storage: Arc<ClientStorage>,
        sink: Arc<CollectingSink>,
        outstanding: Arc<OutstandingNotifications>,
        poller: NotificationPoller,
    }

    fn harness() -> Harness {
        let feed = Arc::new(ScriptedFeed::default());
        let storage = Arc::new(ClientStorage::in_memory());
        let sink = Arc::new(CollectingSink::default());
        let outstanding = Arc::new(OutstandingNotifications::new(Duration::from_secs(600)));
        let poller = NotificationPoller::new(
            feed.clone(),
            Arc::clone(&storage),
            sink.clone(),
            Arc::clone(&outstanding),
        );
        Harness {
            feed,
            storage,
            sink,
            outstanding,
            poller,
        }
    }

    #[tokio::test]
    async fn delivers_each_event_once_and_advances_cursor() {
        let h = harness();
        h.feed.push(incoming(1, "+1555", "CH1"));
        h.feed.push(incoming(2, "+1666", "CH2"));

        assert_eq!(h.poller.poll_once().await, PollOutcome::Completed { delivered: 2 });
        assert_eq!(h.storage.cursor(), Some(at(2)));
        assert_eq!(h.outstanding.len(), 2);

        let received = h.sink.received();
        assert_eq!(received[0].conversation_sid.as_deref(), Some("CH1"));
        assert_eq!(received[0].id.conversation_sid(), Some("CH1"));
        assert_eq!(received[1].title, "+1666");

        assert_eq!(h.poller.poll_once().await, PollOutcome::Completed { delivered: 0 });
        assert_eq!(h.feed.cursors.lock().last().copied().flatten(), Some(at(2)));
        assert_eq!(h.sink.len(), 2);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_cursor_for_retry() {
        let h = harness();
        h.storage.advance_cursor(at(5)).unwrap();
        h.feed.push(incoming(6, "+1555", "CH1"));
        *h.feed.failing.lock() = true;

        assert_eq!(h.poller.poll_once().await, PollOutcome::Failed);
        assert_eq!(h.storage.cursor(), Some(at(5)));
        assert!(h.sink.is_empty());

        *h.feed.failing.lock() = false;
        assert_eq!(h.poller.poll_once().await, PollOutcome::Completed { delivered: 1 });
        assert_eq!(h.storage.cursor(), Some(at(6)));
    }

    #[tokio::test]
    async fn unknown_kinds_are_ignored() {
        let h = harness();
        let mut other = incoming(3, "+1555", "CH1");
        other.kind = EventKind::Unknown;
        h.feed.push(other);

        assert_eq!(h.poller.poll_once().await, PollOutcome::Completed { delivered: 0 });
        assert_eq!(h.storage.cursor(), None);
    }

    #[tokio::test]
    async fn media_only_message_gets_placeholder_body() {
        let h = harness();
        let mut event = incoming(1, "+1555", "CH1");
        event.payload.insert("body".into(), serde_json::Value::String(String::new()));
        event.payload.insert("hasMedia".into(), serde_json::Value::Bool(true));
        h.feed.push(event);

        h.poller.poll_once().await;
        assert_eq!(h.sink.received()[0].body, "Sent an attachment");
    }

    struct OneContact;

    #[async_trait]
    impl ContactDirectory for OneContact {
        async fn search(&self, phone: &str) -> Result<Option<ContactInfo>, ClientError> {
            Ok((phone == "+1555").then(|| ContactInfo {
                name: "Ada".into(),
                ..Default::default()
            }))
        }
    }

    #[tokio::test]
    async fn titles_use_contact_names() {
        let h = harness();
        let resolver = Arc::new(ContactResolver::new(Arc::new(OneContact), Arc::clone(&h.storage)));
        let poller = NotificationPoller::new(
            h.feed.clone(),
            Arc::clone(&h.storage),
            h.sink.clone(),
            h.outstanding.clone(),
        )
        .with_contacts(resolver);
        h.feed.push(incoming(1, "+1555", "CH1"));
        h.feed.push(incoming(2, "+1777", "CH2"));

        poller.poll_once().await;
        let titles: Vec<_> = h.sink.received().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, ["Ada", "+1777"]);
    }
}
