//! Layered configuration: compiled defaults, then `~/.nextcmd/settings.json`,
//! then `NEXTCMD_*` environment variables.

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_with, deep_merge, load_settings, load_settings_from_path,
    nextcmd_home, settings_path,
};
pub use types::{
    EngineSettings, LoggingSettings, ModelSettings, ServerSettings, Settings, StoreSettings,
};
