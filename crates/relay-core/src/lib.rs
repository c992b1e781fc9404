pub mod api;
pub mod direction;
pub mod events;
pub mod ids;
pub mod security;
pub mod time;
