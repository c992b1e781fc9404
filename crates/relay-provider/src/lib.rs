//! Messaging provider access: conversations, participants, messages, SMS
//! history and media.
//!
//! [`ConversationProvider`] is the seam the server depends on.
//! [`TwilioProvider`] implements it over the provider's REST APIs and
//! [`mock::MockProvider`] implements it in memory for tests.

pub mod conversations;
pub mod error;
pub mod mock;
pub mod provider;
pub mod twilio;
pub mod types;

pub use error::ProviderError;
pub use provider::ConversationProvider;
pub use twilio::{TwilioConfig, TwilioProvider};
