pub mod auth;
pub mod conversations;
pub mod error;
pub mod forward;
pub mod media;
pub mod messages;
pub mod notifications;
pub mod server;
pub mod webhook;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
