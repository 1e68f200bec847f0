//! Configuration module for vizquery.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, AclSettings, CacheBackend, CacheSettings, DataSourceSettings, Driver,
    QuerySettings, ServerSettings, Settings, SettingsError,
};
