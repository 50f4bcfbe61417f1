use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{CodecError, Result, StoreError};

use super::LifeTime;

/// Trait for session storage backends.
///
/// A session manager calls these per request to keep key/value pairs of a
/// session outside process memory. Every session owns one bootstrap record
/// (keyed by the session id itself) holding its expiry; it is created by
/// [`acquire`](Database::acquire), skipped by `visit`/`len`/`clear` and only
/// removed by [`release`](Database::release).
#[async_trait]
pub trait Database: Send + Sync {
    /// Get the session's lifetime, creating the bootstrap record with
    /// expiry `now + expires` on first touch.
    ///
    /// Returns [`LifeTime::Unset`] when the record was just created so the
    /// session manager falls back to its configured expiry.
    async fn acquire(&self, sid: &str, expires: Duration) -> Result<LifeTime>;

    /// Move a session's expiry. None of the bundled stores support this;
    /// callers must handle [`StoreError::NotImplemented`] themselves.
    async fn on_update_expiration(&self, _sid: &str, _new_expires: Duration) -> Result<()> {
        Err(StoreError::NotImplemented("on_update_expiration"))
    }

    /// Insert or overwrite a key. `immutable` is a session-manager policy
    /// and is not enforced here.
    async fn set(
        &self,
        sid: &str,
        lifetime: &LifeTime,
        key: &str,
        value: &Value,
        immutable: bool,
    ) -> Result<()>;

    /// Read a key, treating every failure as absent.
    async fn get(&self, sid: &str, key: &str) -> Option<Value> {
        match self.decode(sid, key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(sid, key, error = %e, "get: treating failed read as absent");
                None
            }
        }
    }

    /// Read a key. `Ok(None)` means the key is not stored; errors are kept
    /// apart so callers can tell a missing key from an unreadable one.
    /// The bootstrap record is never returned: `key == sid` reads as absent.
    async fn decode(&self, sid: &str, key: &str) -> Result<Option<Value>>;

    /// Call `visitor` once per entry of the session, in store order.
    async fn visit(
        &self,
        sid: &str,
        visitor: &mut (dyn for<'k> FnMut(&'k str, Value) + Send),
    ) -> Result<()>;

    /// Number of entries, not counting the bootstrap record.
    async fn len(&self, sid: &str) -> Result<usize>;

    /// Remove one key. `true` when the delete call itself succeeded, which
    /// does not say whether the key existed.
    async fn delete(&self, sid: &str, key: &str) -> bool;

    /// Remove every entry but keep the bootstrap record.
    async fn clear(&self, sid: &str) -> Result<()>;

    /// Destroy the session including its bootstrap record.
    async fn release(&self, sid: &str) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}

/// Typed helpers available on every [`Database`].
#[async_trait]
pub trait DatabaseExt: Database {
    async fn set_value<T>(&self, sid: &str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(value).map_err(CodecError::from)?;
        self.set(sid, &LifeTime::Unset, key, &value, false).await
    }

    async fn decode_as<T>(&self, sid: &str, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.decode(sid, key).await? {
            Some(value) => {
                let typed = serde_json::from_value(value).map_err(CodecError::from)?;
                Ok(Some(typed))
            }
            None => Ok(None),
        }
    }

    /// The stored string, or empty when missing or not a string.
    async fn get_string(&self, sid: &str, key: &str) -> String {
        match self.get(sid, key).await {
            Some(Value::String(s)) => s,
            _ => String::new(),
        }
    }
}

impl<D: Database + ?Sized> DatabaseExt for D {}
