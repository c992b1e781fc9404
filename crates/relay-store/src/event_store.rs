use std::collections::VecDeque;

use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use relay_core::events::{NewEvent, NotificationEvent};
use relay_core::ids::EventId;
use relay_core::time::parse_cursor;

pub const DEFAULT_CAPACITY: usize = 200;

pub struct EventStore {
    events: Mutex<VecDeque<NotificationEvent>>,
    capacity: usize,
}

impl EventStore {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Append an event, assigning a fresh id and (if absent) the current
    /// time. Timestamps are truncated to milliseconds, the precision they
    /// have on the wire, so a cursor echoed back by a client excludes the
    /// event it came from. Returns the stored event.
    pub fn record(&self, event: NewEvent) -> NotificationEvent {
        let stored = NotificationEvent {
            id: EventId::new(),
            kind: event.kind,
            timestamp: event.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(3),
            payload: event.payload,
        };

        let mut events = self.events.lock();
        events.push_back(stored.clone());
        while events.len() > self.capacity {
            events.pop_front();
        }
        stored
    }

    /// Events strictly newer than the cursor, in arrival order.
    ///
    /// A missing, empty or unparseable cursor returns every retained event.
    pub fn get_since(&self, cursor: Option<&str>) -> Vec<NotificationEvent> {
        self.get_after(parse_cursor(cursor))
    }

    pub fn get_after(&self, since: Option<DateTime<Utc>>) -> Vec<NotificationEvent> {
        let events = self.events.lock();
        match since {
            None => events.iter().cloned().collect(),
            Some(since) => events.iter().filter(|e| e.timestamp > since).cloned().collect(),
        }
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use relay_core::events::{EventKind, IncomingMessage};
    use relay_core::time::format_timestamp;
    use std::sync::Arc;

    fn message(n: usize) -> NewEvent {
        IncomingMessage {
            from: format!("+1555000{n:04}"),
            to: "+15559999999".into(),
            body: Some(format!("message {n}")),
            conversation_sid: Some(format!("CH{n}")),
            has_media: false,
        }
        .into_event()
    }

    fn base() -> DateTime<Utc> {
        relay_core::time::parse_timestamp("2024-03-01T12:00:00Z").unwrap()
    }

    #[test]
    fn record_assigns_id_and_timestamp() {
        let store = EventStore::default();
        let before = Utc::now().trunc_subsecs(3);
        let event = store.record(message(1));
        assert!(event.id.as_str().starts_with("evt_"));
        assert!(event.timestamp >= before);
        assert_eq!(event.kind, EventKind::IncomingMessage);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn record_keeps_supplied_timestamp() {
        let store = EventStore::default();
        let event = store.record(message(1).at(base()));
        assert_eq!(event.timestamp, base());
    }

    #[test]
    fn serialized_timestamp_excludes_its_own_event() {
        let store = EventStore::default();
        let event = store.record(message(1));
        let wire = serde_json::to_value(&event).unwrap();
        let cursor = wire["timestamp"].as_str().unwrap().to_string();

        assert!(store.get_since(Some(&cursor)).is_empty());
        store.record(message(2));
        assert_eq!(store.get_since(Some(&cursor)).len(), 1);
    }

    #[test]
    fn supplied_timestamps_are_truncated_to_millis() {
        let store = EventStore::default();
        let precise = base() + Duration::nanoseconds(1_234_567);
        let event = store.record(message(1).at(precise));
        assert_eq!(format_timestamp(&event.timestamp), "2024-03-01T12:00:00.001Z");
        assert!(store.get_since(Some("2024-03-01T12:00:00.001Z")).is_empty());
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let store = EventStore::default();
        for n in 0..205 {
            store.record(message(n).at(base() + Duration::seconds(n as i64)));
        }
        let all = store.get_since(None);
        assert_eq!(all.len(), DEFAULT_CAPACITY);
        assert_eq!(all[0].payload["body"], "message 5");
        assert_eq!(all[199].payload["body"], "message 204");
    }

    #[test]
    fn since_is_strictly_greater() {
        let store = EventStore::default();
        store.record(message(1).at(base()));
        store.record(message(2).at(base() + Duration::seconds(1)));
        store.record(message(3).at(base() + Duration::seconds(2)));

        let cursor = format_timestamp(&(base() + Duration::seconds(1)));
        let newer = store.get_since(Some(&cursor));
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].payload["body"], "message 3");
    }

    #[test]
    fn cursor_after_everything_returns_nothing() {
        let store = EventStore::default();
        store.record(message(1).at(base()));
        assert!(store.get_since(Some("2030-01-01T00:00:00Z")).is_empty());
    }

    #[test]
    fn missing_or_invalid_cursor_fails_open() {
        let store = EventStore::default();
        store.record(message(1).at(base()));
        store.record(message(2).at(base() + Duration::seconds(1)));
        assert_eq!(store.get_since(None).len(), 2);
        assert_eq!(store.get_since(Some("")).len(), 2);
        assert_eq!(store.get_since(Some("not-a-date")).len(), 2);
    }

    #[test]
    fn get_since_is_idempotent() {
        let store = EventStore::default();
        store.record(message(1).at(base()));
        store.record(message(2).at(base() + Duration::seconds(5)));
        let cursor = format_timestamp(&base());
        assert_eq!(store.get_since(Some(&cursor)), store.get_since(Some(&cursor)));
    }

    #[test]
    fn empty_store_returns_empty() {
        let store = EventStore::default();
        assert!(store.is_empty());
        assert!(store.get_since(None).is_empty());
        assert!(store.get_since(Some("2024-01-01")).is_empty());
    }

    #[test]
    fn naive_cursor_is_read_as_utc() {
        let store = EventStore::default();
        store.record(message(1).at(base()));
        store.record(message(2).at(base() + Duration::hours(1)));
        let newer = store.get_since(Some("2024-03-01T12:30:00"));
        assert_eq!(newer.len(), 1);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let store = EventStore::new(0);
        store.record(message(1));
        store.record(message(2));
        assert_eq!(store.capacity(), 1);
        assert_eq!(store.get_since(None)[0].payload["body"], "message 2");
    }

    #[tokio::test]
    async fn concurrent_writers_respect_capacity() {
        let store = Arc::new(EventStore::new(50));
        let mut handles = Vec::new();
        for task in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for n in 0..25 {
                    store.record(message(task * 100 + n));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len(), 50);
    }
}
