//! TOML-based configuration for vizquery.
//!
//! Supports a config file (vizquery.toml) with environment variable expansion
//! in paths.
//!
//! Example configuration:
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 13000
//!
//! [cache]
//! backend = "sqlite"             # or "memory"
//! path = "${HOME}/.vizquery/cache.db"
//! default_ttl_seconds = 60
//!
//! [query]
//! default_limit = 2000
//! max_limit = 10000
//!
//! [data_sources.main]
//! driver = "sqlite"
//! path = "./data/shop.db"
//! schema = "./schema/shop.toml"
//! default = true
//!
//! [data_sources.warehouse]       # catalog only: SQL can be rendered, not run
//! dialect = "postgres"
//! schema = "./schema/warehouse.toml"
//!
//! [acl.roles]
//! member = ["orders:list", "customers:list"]
//! admin = ["*"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::params::DEFAULT_LIMIT;
use crate::pipeline::QueryOptions;
use crate::schema::Collection;
use crate::sql::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Data source not found: {0}")]
    DataSourceNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub query: QuerySettings,
    /// Data sources by id.
    pub data_sources: HashMap<String, DataSourceSettings>,
    pub acl: AclSettings,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 13000,
        }
    }
}

/// Where chart results are cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackend,

    /// SQLite cache file; defaults to `~/.vizquery/cache.db`.
    pub path: Option<String>,

    /// TTL used when a cached request does not carry one.
    pub default_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            path: None,
            default_ttl_seconds: 60,
        }
    }
}

impl CacheSettings {
    /// The cache file path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

/// Query limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuerySettings {
    pub default_limit: u64,
    pub max_limit: Option<u64>,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: None,
        }
    }
}

/// Database drivers that can execute queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
}

impl Driver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Sqlite => "sqlite",
        }
    }

    /// The dialect this driver speaks.
    pub fn dialect(&self) -> Dialect {
        match self {
            Driver::Sqlite => Dialect::Sqlite,
        }
    }
}

/// One data source.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DataSourceSettings {
    /// Driver that executes queries; without one the source can only render SQL.
    pub driver: Option<Driver>,

    /// Database file (supports ${ENV_VAR} expansion); in-memory when absent.
    pub path: Option<String>,

    /// Dialect for catalog-only sources. Must match the driver when both are set.
    pub dialect: Option<Dialect>,

    /// Path to a collections TOML file.
    pub schema: Option<String>,

    /// Collections declared inline, added to those from `schema`.
    pub collections: Vec<Collection>,

    /// SQL script run once when the data source opens.
    pub init_sql: Option<String>,

    /// Use this data source when a request names none.
    pub default: bool,

    /// Per-source ACL; the application ACL applies when empty.
    pub roles: HashMap<String, Vec<String>>,
}

impl DataSourceSettings {
    /// The dialect queries against this source are rendered in.
    pub fn dialect(&self) -> Result<Dialect, SettingsError> {
        match (self.driver, self.dialect) {
            (Some(driver), Some(dialect)) if driver.dialect() != dialect => {
                Err(SettingsError::InvalidConfig(format!(
                    "driver '{}' cannot use dialect '{}'",
                    driver.as_str(),
                    dialect
                )))
            }
            (Some(driver), _) => Ok(driver.dialect()),
            (None, dialect) => Ok(dialect.unwrap_or_default()),
        }
    }

    /// Get the database path with environment variables expanded.
    pub fn resolved_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.path
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }

    pub fn resolved_schema_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.schema
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }

    pub fn resolved_init_sql_path(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.init_sql
            .as_deref()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .transpose()
    }
}

/// Application-wide ACL: role → `collection:action` grants.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AclSettings {
    pub roles: HashMap<String, Vec<String>>,
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `VIZQUERY_CONFIG`
    /// 2. `./vizquery.toml`
    /// 3. `~/.config/vizquery/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("VIZQUERY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("vizquery.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("vizquery").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let defaults: Vec<&str> = self
            .data_sources
            .iter()
            .filter(|(_, ds)| ds.default)
            .map(|(id, _)| id.as_str())
            .collect();
        if defaults.len() > 1 {
            let mut defaults = defaults;
            defaults.sort_unstable();
            return Err(SettingsError::InvalidConfig(format!(
                "more than one default data source: {}",
                defaults.join(", ")
            )));
        }
        for ds in self.data_sources.values() {
            ds.dialect()?;
        }
        if self.query.max_limit == Some(0) {
            return Err(SettingsError::InvalidConfig(
                "query.max_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Get a data source by id.
    pub fn get_data_source(&self, id: &str) -> Result<&DataSourceSettings, SettingsError> {
        self.data_sources
            .get(id)
            .ok_or_else(|| SettingsError::DataSourceNotFound(id.to_string()))
    }

    /// Id of the default data source: the one flagged `default`, else `main`,
    /// else the only one configured.
    pub fn default_data_source(&self) -> Option<&str> {
        if let Some((id, _)) = self.data_sources.iter().find(|(_, ds)| ds.default) {
            return Some(id);
        }
        if self.data_sources.contains_key(crate::datasource::DEFAULT_DATA_SOURCE) {
            return Some(crate::datasource::DEFAULT_DATA_SOURCE);
        }
        if self.data_sources.len() == 1 {
            return self.data_sources.keys().next().map(String::as_str);
        }
        None
    }

    /// Pipeline options derived from the `[query]` and `[cache]` sections.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            default_limit: self.query.default_limit,
            max_limit: self.query.max_limit,
            default_ttl_seconds: self.cache.default_ttl_seconds,
        }
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name: String = if chars.peek() == Some(&'{') {
            chars.next();
            chars.by_ref().take_while(|&ch| ch != '}').collect()
        } else {
            let mut name = String::new();
            while let Some(&ch) = chars.peek() {
                if !(ch.is_alphanumeric() || ch == '_') {
                    break;
                }
                name.push(ch);
                chars.next();
            }
            if name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
            name
        };

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
