//! Multi-call conversation workflows built on [`ConversationProvider`].

use futures::future::try_join_all;
use tracing::{debug, info};

use relay_core::api::ConversationSummary;

use crate::error::ProviderError;
use crate::provider::ConversationProvider;
use crate::types::Conversation;

/// Conversations scanned when looking for an existing participant.
pub const LOOKUP_CONVERSATION_LIMIT: usize = 100;

pub fn default_friendly_name(phone: &str) -> String {
    format!("SMS with {phone}")
}

/// Find the conversation whose SMS participant is `phone`, creating one
/// (with `proxy_address` as the relay side) when none exists.
pub async fn find_or_create_conversation(
    provider: &dyn ConversationProvider,
    phone: &str,
    proxy_address: &str,
) -> Result<Conversation, ProviderError> {
    if let Some(existing) = find_conversation(provider, phone).await? {
        debug!(conversation_sid = %existing.sid, "found existing conversation");
        return Ok(existing);
    }

    let conversation = provider.create_conversation(&default_friendly_name(phone)).await?;
    provider
        .add_sms_participant(&conversation.sid, phone, proxy_address)
        .await?;
    info!(conversation_sid = %conversation.sid, "created conversation for new sender");
    Ok(conversation)
}

/// Find the first conversation with an SMS participant bound to `phone`.
pub async fn find_conversation(
    provider: &dyn ConversationProvider,
    phone: &str,
) -> Result<Option<Conversation>, ProviderError> {
    let conversations = provider.list_conversations(LOOKUP_CONVERSATION_LIMIT).await?;
    for conversation in conversations {
        let participants = provider.list_participants(&conversation.sid).await?;
        if participants.iter().any(|p| p.address() == Some(phone)) {
            return Ok(Some(conversation));
        }
    }
    Ok(None)
}

/// List conversations with their participants, fetched concurrently.
pub async fn list_conversation_summaries(
    provider: &dyn ConversationProvider,
    limit: usize,
) -> Result<Vec<ConversationSummary>, ProviderError> {
    let conversations = provider.list_conversations(limit).await?;
    let participants = try_join_all(
        conversations
            .iter()
            .map(|c| provider.list_participants(&c.sid)),
    )
    .await?;
    Ok(conversations
        .iter()
        .zip(participants)
        .map(|(c, p)| c.summarize(&p))
        .collect())
}
