use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::ProviderError;
use crate::provider::ConversationProvider;
use crate::types::{
    Conversation, ConversationMessage, MediaContent, MediaSource, MessageQuery, MessagingBinding,
    NewConversationMessage, Order, Participant, SmsFilter, SmsMessage,
};

#[derive(Default)]
struct MockState {
    conversations: Vec<Conversation>,
    participants: HashMap<String, Vec<Participant>>,
    /// Oldest first.
    messages: HashMap<String, Vec<ConversationMessage>>,
    sms: Vec<SmsMessage>,
    media: HashMap<String, MediaContent>,
    created_conversations: Vec<String>,
    attribute_updates: Vec<(String, String, String)>,
    sent_sms: Vec<(String, String, String)>,
    failure: Option<ProviderError>,
    next_id: u64,
}

impl MockState {
    fn next_sid(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:032}", self.next_id)
    }

    fn check(&self) -> Result<(), ProviderError> {
        match &self.failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// In-memory provider for deterministic tests without network calls.
#[derive(Default)]
pub struct MockProvider {
    state: Mutex<MockState>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Seed a conversation with a single SMS participant at `address`.
    pub fn add_conversation(&self, sid: &str, friendly_name: &str, address: &str) {
        let mut state = self.state.lock();
        state.conversations.push(Conversation {
            sid: sid.to_string(),
            friendly_name: Some(friendly_name.to_string()),
            state: Some("active".to_string()),
            date_created: Some(Utc::now()),
            date_updated: Some(Utc::now()),
            ..Default::default()
        });
        let participant_sid = state.next_sid("MB");
        state.participants.entry(sid.to_string()).or_default().push(Participant {
            sid: participant_sid,
            identity: None,
            messaging_binding: Some(MessagingBinding {
                binding_type: Some("sms".to_string()),
                address: Some(address.to_string()),
                proxy_address: None,
            }),
        });
    }

    /// Append a message to a conversation (kept oldest first).
    pub fn add_message(&self, conversation_sid: &str, message: ConversationMessage) {
        self.state
            .lock()
            .messages
            .entry(conversation_sid.to_string())
            .or_default()
            .push(message);
    }

    pub fn add_sms(&self, message: SmsMessage) {
        self.state.lock().sms.push(message);
    }

    pub fn add_media(&self, media_sid: &str, content: MediaContent) {
        self.state.lock().media.insert(media_sid.to_string(), content);
    }

    /// Make every subsequent call fail with `error`.
    pub fn fail_with(&self, error: ProviderError) {
        self.state.lock().failure = Some(error);
    }

    pub fn clear_failure(&self) {
        self.state.lock().failure = None;
    }

    pub fn created_conversations(&self) -> Vec<String> {
        self.state.lock().created_conversations.clone()
    }

    /// `(conversation_sid, message_sid, attributes)` for each update.
    pub fn attribute_updates(&self) -> Vec<(String, String, String)> {
        self.state.lock().attribute_updates.clone()
    }

    /// `(from, to, body)` for each SMS sent.
    pub fn sent_sms(&self) -> Vec<(String, String, String)> {
        self.state.lock().sent_sms.clone()
    }

    pub fn messages(&self, conversation_sid: &str) -> Vec<ConversationMessage> {
        self.state
            .lock()
            .messages
            .get(conversation_sid)
            .cloned()
            .unwrap_or_default()
    }

    fn enter(&self) -> parking_lot::MutexGuard<'_, MockState> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.state.lock()
    }
}

#[async_trait]
impl ConversationProvider for MockProvider {
    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, ProviderError> {
        let state = self.enter();
        state.check()?;
        Ok(state.conversations.iter().take(limit).cloned().collect())
    }

    async fn list_participants(
        &self,
        conversation_sid: &str,
    ) -> Result<Vec<Participant>, ProviderError> {
        let state = self.enter();
        state.check()?;
        Ok(state.participants.get(conversation_sid).cloned().unwrap_or_default())
    }

    async fn list_messages(
        &self,
        conversation_sid: &str,
        query: MessageQuery,
    ) -> Result<Vec<ConversationMessage>, ProviderError> {
        let state = self.enter();
        state.check()?;
        let messages = state.messages.get(conversation_sid).cloned().unwrap_or_default();
        Ok(match query.order {
            Order::Asc => messages.into_iter().take(query.limit).collect(),
            Order::Desc => messages.into_iter().rev().take(query.limit).collect(),
        })
    }

    async fn create_conversation(
        &self,
        friendly_name: &str,
    ) -> Result<Conversation, ProviderError> {
        let mut state = self.enter();
        state.check()?;
        let conversation = Conversation {
            sid: state.next_sid("CH"),
            friendly_name: Some(friendly_name.to_string()),
            state: Some("active".to_string()),
            date_created: Some(Utc::now()),
            date_updated: Some(Utc::now()),
            ..Default::default()
        };
        state.created_conversations.push(conversation.sid.clone());
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn add_sms_participant(
        &self,
        conversation_sid: &str,
        address: &str,
        proxy_address: &str,
    ) -> Result<Participant, ProviderError> {
        let mut state = self.enter();
        state.check()?;
        let participant = Participant {
            sid: state.next_sid("MB"),
            identity: None,
            messaging_binding: Some(MessagingBinding {
                binding_type: Some("sms".to_string()),
                address: Some(address.to_string()),
                proxy_address: Some(proxy_address.to_string()),
            }),
        };
        state
            .participants
            .entry(conversation_sid.to_string())
            .or_default()
            .push(participant.clone());
        Ok(participant)
    }

    async fn create_message(
        &self,
        conversation_sid: &str,
        message: NewConversationMessage,
    ) -> Result<ConversationMessage, ProviderError> {
        let mut state = self.enter();
        state.check()?;
        let sid = state.next_sid("IM");
        let thread = state.messages.entry(conversation_sid.to_string()).or_default();
        let created = ConversationMessage {
            sid,
            index: Some(thread.len() as u64),
            author: Some(message.author),
            body: Some(message.body),
            attributes: message.attributes,
            date_created: Some(message.date_created.unwrap_or_else(Utc::now)),
            ..Default::default()
        };
        thread.push(created.clone());
        Ok(created)
    }

    async fn update_message_attributes(
        &self,
        conversation_sid: &str,
        message_sid: &str,
        attributes: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.enter();
        state.check()?;
        let message = state
            .messages
            .get_mut(conversation_sid)
            .and_then(|thread| thread.iter_mut().find(|m| m.sid == message_sid))
            .ok_or_else(|| ProviderError::NotFound(message_sid.to_string()))?;
        message.attributes = Some(attributes.to_string());
        state.attribute_updates.push((
            conversation_sid.to_string(),
            message_sid.to_string(),
            attributes.to_string(),
        ));
        Ok(())
    }

    async fn list_sms(&self, filter: SmsFilter) -> Result<Vec<SmsMessage>, ProviderError> {
        let state = self.enter();
        state.check()?;
        Ok(state
            .sms
            .iter()
            .filter(|m| filter.from.is_none() || m.from == filter.from)
            .filter(|m| filter.to.is_none() || m.to == filter.to)
            .take(filter.limit)
            .cloned()
            .collect())
    }

    async fn send_sms(
        &self,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<SmsMessage, ProviderError> {
        let mut state = self.enter();
        state.check()?;
        state
            .sent_sms
            .push((from.to_string(), to.to_string(), body.to_string()));
        Ok(SmsMessage {
            sid: state.next_sid("SM"),
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            body: Some(body.to_string()),
            direction: Some("outbound-api".to_string()),
            status: Some("queued".to_string()),
            num_media: Some("0".to_string()),
            date_created: Some(Utc::now()),
        })
    }

    async fn fetch_media(&self, source: &MediaSource) -> Result<MediaContent, ProviderError> {
        let state = self.enter();
        state.check()?;
        let media_sid = match source {
            MediaSource::Message { media_sid, .. }
            | MediaSource::Conversation { media_sid, .. } => media_sid,
        };
        state
            .media
            .get(media_sid)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(media_sid.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn desc_order_returns_newest_first() {
        let provider = MockProvider::new();
        for body in ["one", "two", "three"] {
            provider
                .create_message(
                    "CH1",
                    NewConversationMessage {
                        author: "+1555".into(),
                        body: body.into(),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        let newest = provider.list_messages("CH1", MessageQuery::newest(2)).await.unwrap();
        let bodies: Vec<_> = newest.iter().filter_map(|m| m.body.as_deref()).collect();
        assert_eq!(bodies, ["three", "two"]);
    }

    #[tokio::test]
    async fn failure_applies_until_cleared() {
        let provider = MockProvider::new();
        provider.fail_with(ProviderError::RateLimited);
        assert!(provider.list_conversations(10).await.is_err());
        provider.clear_failure();
        assert!(provider.list_conversations(10).await.is_ok());
        assert_eq!(provider.call_count(), 2);
    }
}
