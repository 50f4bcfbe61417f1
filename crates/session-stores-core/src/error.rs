use std::path::PathBuf;

/// Core error types for the session stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[cfg(feature = "mongodb-backend")]
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[cfg(feature = "dgraph-backend")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Dgraph error: {0}")]
    Dgraph(String),

    #[error("Invalid session key: {0}")]
    InvalidKey(String),

    #[error("{0} is not implemented by this store")]
    NotImplemented(&'static str),

    #[error("Store has been closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("database name is required")]
    MissingDatabase,

    #[error("Dgraph target url is required")]
    MissingTarget,

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failures turning stored text back into a value (or a value into text).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
