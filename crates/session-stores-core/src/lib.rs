pub mod error;
pub mod codec;
pub mod config;
pub mod session;

pub use error::{Result, StoreError};
pub use session::{Database, DatabaseExt, LifeTime, MemoryStore};

#[cfg(feature = "mongodb-backend")]
pub use session::MongoStore;

#[cfg(feature = "dgraph-backend")]
pub use session::DgraphStore;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
