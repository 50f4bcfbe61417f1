use std::sync::Arc;

use tracing::info;

use crate::error::Result;
#[cfg(not(all(feature = "mongodb-backend", feature = "dgraph-backend")))]
use crate::error::{ConfigError, StoreError};
use crate::session::{Database, MemoryStore};

use super::{Backend, Config};

/// Build the store selected by `config.backend`.
pub async fn open_store(config: &Config) -> Result<Arc<dyn Database>> {
    match config.backend {
        Backend::Memory => {
            info!("Using in-memory session store");
            Ok(Arc::new(MemoryStore::new()))
        }
        Backend::Mongo => open_mongo(config).await,
        Backend::Dgraph => open_dgraph(config).await,
    }
}

#[cfg(feature = "mongodb-backend")]
async fn open_mongo(config: &Config) -> Result<Arc<dyn Database>> {
    use crate::session::MongoStore;

    let store = MongoStore::connect(&config.mongo.uri, &config.mongo.database).await?;
    info!(database = %config.mongo.database, "Using MongoDB session store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "mongodb-backend"))]
async fn open_mongo(_config: &Config) -> Result<Arc<dyn Database>> {
    Err(StoreError::Config(ConfigError::Invalid(
        "built without the mongodb-backend feature".to_string(),
    )))
}

#[cfg(feature = "dgraph-backend")]
async fn open_dgraph(config: &Config) -> Result<Arc<dyn Database>> {
    use std::time::Duration;

    use crate::session::DgraphStore;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.dgraph.timeout_secs))
        .build()?;
    let store = DgraphStore::with_client(http, &config.dgraph.url).await?;
    info!(url = %store.target(), "Using Dgraph session store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "dgraph-backend"))]
async fn open_dgraph(_config: &Config) -> Result<Arc<dyn Database>> {
    Err(StoreError::Config(ConfigError::Invalid(
        "built without the dgraph-backend feature".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DatabaseExt;

    #[tokio::test]
    async fn test_open_memory_store() {
        let store = open_store(&Config::default()).await.unwrap();
        store.set_value("s", "name", "iris").await.unwrap();
        assert_eq!(store.get_string("s", "name").await, "iris");
    }

    #[cfg(feature = "mongodb-backend")]
    #[tokio::test]
    async fn test_open_mongo_requires_database() {
        let mut cfg = Config::default();
        cfg.backend = Backend::Mongo;
        cfg.mongo.database = String::new();
        assert!(open_store(&cfg).await.is_err());
    }

    #[cfg(feature = "dgraph-backend")]
    #[tokio::test]
    async fn test_open_dgraph_requires_url() {
        let mut cfg = Config::default();
        cfg.backend = Backend::Dgraph;
        cfg.dgraph.url = String::new();
        assert!(open_store(&cfg).await.is_err());
    }
}
