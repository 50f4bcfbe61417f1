pub mod open;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub use open::open_store;

/// Root configuration for the session stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub backend: Backend,
    /// Expiry handed to `acquire` when the caller has no opinion.
    pub default_expires_secs: u64,
    pub mongo: MongoConfig,
    pub dgraph: DgraphConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            default_expires_secs: 30 * 60,
            mongo: MongoConfig::default(),
            dgraph: DgraphConfig::default(),
        }
    }
}

impl Config {
    pub fn default_expires(&self) -> Duration {
        Duration::from_secs(self.default_expires_secs)
    }
}

/// Which store `open_store` builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Mongo,
    Dgraph,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "mongo" | "mongodb" => Ok(Backend::Mongo),
            "dgraph" => Ok(Backend::Dgraph),
            other => Err(ConfigError::Invalid(format!("unknown backend: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://127.0.0.1:27017".to_string(),
            database: "sessions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DgraphConfig {
    /// Alpha HTTP endpoint.
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for DgraphConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8080".to_string(),
            timeout_secs: 30,
        }
    }
}

// ====== Config loading/saving ======

/// Load configuration from environment variables.
///
/// Priority:
/// 1. `SESSION_STORES_CONFIG` env var: full JSON config
/// 2. Individual env vars (merged on top of the file config)
/// 3. File fallback (`~/.session-stores/config.json`)
pub fn load_config_from_env() -> Config {
    if let Ok(json) = std::env::var("SESSION_STORES_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("Failed to parse SESSION_STORES_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = load_config(None);
    apply_env_overrides(&mut cfg);
    cfg
}

/// Overlay individual environment variables on `cfg`.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("SESSION_STORES_BACKEND") {
        match v.parse() {
            Ok(backend) => cfg.backend = backend,
            Err(e) => tracing::warn!("Ignoring SESSION_STORES_BACKEND: {}", e),
        }
    }
    if let Ok(v) = std::env::var("SESSION_STORES_EXPIRES_SECS") {
        match v.trim().parse() {
            Ok(secs) => cfg.default_expires_secs = secs,
            Err(e) => tracing::warn!("Ignoring SESSION_STORES_EXPIRES_SECS: {}", e),
        }
    }

    // MongoDB
    if let Ok(v) = std::env::var("MONGO_URI") {
        cfg.mongo.uri = v;
    }
    if let Ok(v) = std::env::var("MONGO_DATABASE") {
        cfg.mongo.database = v;
    }

    // Dgraph
    if let Ok(v) = std::env::var("DGRAPH_URL") {
        cfg.dgraph.url = v;
    }
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".session-stores")
        .join("config.json")
}

/// Load configuration from file or fall back to defaults.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if path.exists() {
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Config>(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to parse config from {}: {}", path.display(), e);
                    tracing::warn!("Using default configuration.");
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config from {}: {}", path.display(), e);
                tracing::warn!("Using default configuration.");
            }
        }
    }

    Config::default()
}

/// Load configuration strictly: a missing or malformed file is an error.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(serde_json::from_str(&content)?)
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.backend, Backend::Memory);
        assert_eq!(cfg.default_expires(), Duration::from_secs(1800));
        assert_eq!(cfg.mongo.database, "sessions");
        assert_eq!(cfg.dgraph.url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_config_camelcase_compat() {
        let json = r#"{
            "backend": "mongo",
            "defaultExpiresSecs": 60,
            "mongo": { "uri": "mongodb://db:27017", "database": "app" },
            "dgraph": { "timeoutSecs": 5 }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.backend, Backend::Mongo);
        assert_eq!(cfg.default_expires_secs, 60);
        assert_eq!(cfg.mongo.uri, "mongodb://db:27017");
        assert_eq!(cfg.mongo.database, "app");
        assert_eq!(cfg.dgraph.timeout_secs, 5);
        // Unset fields keep their defaults.
        assert_eq!(cfg.dgraph.url, "http://127.0.0.1:8080");
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("MongoDB".parse::<Backend>().unwrap(), Backend::Mongo);
        assert_eq!(" dgraph ".parse::<Backend>().unwrap(), Backend::Dgraph);
        assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
        assert!(matches!(
            "redis".parse::<Backend>(),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_save_and_load_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.json");

        let mut cfg = Config::default();
        cfg.backend = Backend::Dgraph;
        cfg.dgraph.url = "http://alpha:8080".to_string();
        save_config(&cfg, Some(&path)).unwrap();

        assert!(path.exists());
        let loaded = load_config(Some(&path));
        assert_eq!(loaded.backend, Backend::Dgraph);
        assert_eq!(loaded.dgraph.url, "http://alpha:8080");

        let strict = read_config(&path).unwrap();
        assert_eq!(strict.backend, Backend::Dgraph);
    }

    #[test]
    fn test_load_config_missing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("absent.json");
        let cfg = load_config(Some(&path));
        assert_eq!(cfg.backend, Backend::Memory);

        assert!(matches!(read_config(&path), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_config_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_config(Some(&path)).backend, Backend::Memory);
        assert!(matches!(read_config(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("SESSION_STORES_BACKEND", "dgraph");
        std::env::set_var("SESSION_STORES_EXPIRES_SECS", "90");
        std::env::set_var("MONGO_DATABASE", "from-env");
        std::env::set_var("DGRAPH_URL", "http://env-alpha:8080");

        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.backend, Backend::Dgraph);
        assert_eq!(cfg.default_expires_secs, 90);
        assert_eq!(cfg.mongo.database, "from-env");
        assert_eq!(cfg.dgraph.url, "http://env-alpha:8080");

        std::env::remove_var("SESSION_STORES_BACKEND");
        std::env::remove_var("SESSION_STORES_EXPIRES_SECS");
        std::env::remove_var("MONGO_DATABASE");
        std::env::remove_var("DGRAPH_URL");
    }
}
