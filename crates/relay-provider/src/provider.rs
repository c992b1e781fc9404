use async_trait::async_trait;

use crate::error::ProviderError;
use crate::types::{
    Conversation, ConversationMessage, MediaContent, MediaSource, MessageQuery,
    NewConversationMessage, Participant, SmsFilter, SmsMessage,
};

/// Operations the relay needs from the messaging provider.
#[async_trait]
pub trait ConversationProvider: Send + Sync {
    async fn list_conversations(&self, limit: usize) -> Result<Vec<Conversation>, ProviderError>;

    async fn list_participants(
        &self,
        conversation_sid: &str,
    ) -> Result<Vec<Participant>, ProviderError>;

    async fn list_messages(
        &self,
        conversation_sid: &str,
        query: MessageQuery,
    ) -> Result<Vec<ConversationMessage>, ProviderError>;

    async fn create_conversation(
        &self,
        friendly_name: &str,
    ) -> Result<Conversation, ProviderError>;

    /// Bind an SMS participant at `address`, reached through `proxy_address`.
    async fn add_sms_participant(
        &self,
        conversation_sid: &str,
        address: &str,
        proxy_address: &str,
    ) -> Result<Participant, ProviderError>;

    async fn create_message(
        &self,
        conversation_sid: &str,
        message: NewConversationMessage,
    ) -> Result<ConversationMessage, ProviderError>;

    /// Replace a conversation message's attributes (a JSON string).
    async fn update_message_attributes(
        &self,
        conversation_sid: &str,
        message_sid: &str,
        attributes: &str,
    ) -> Result<(), ProviderError>;

    async fn list_sms(&self, filter: SmsFilter) -> Result<Vec<SmsMessage>, ProviderError>;

    async fn send_sms(
        &self,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<SmsMessage, ProviderError>;

    async fn fetch_media(&self, source: &MediaSource) -> Result<MediaContent, ProviderError>;
}
