//! # relay-settings
//!
//! Configuration for the relay server and the inbox client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **User file**: `~/.relay/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: provider credentials and `RELAY_*` overrides
//!
//! There is no global instance. The binary loads settings once and passes
//! the pieces each component needs.
//!
//! # Usage
//!
//! ```no_run
//! let settings = relay_settings::load_settings().unwrap_or_default();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_dir, settings_path};
pub use types::*;
