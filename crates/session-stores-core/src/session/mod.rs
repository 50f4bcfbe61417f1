pub mod store;
pub mod memory_store;

#[cfg(feature = "mongodb-backend")]
pub mod mongo_store;

#[cfg(feature = "dgraph-backend")]
pub mod dgraph_store;

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{Result, StoreError};

pub use memory_store::MemoryStore;
pub use store::{Database, DatabaseExt};

#[cfg(feature = "mongodb-backend")]
pub use mongo_store::MongoStore;

#[cfg(feature = "dgraph-backend")]
pub use dgraph_store::DgraphStore;

/// Expiration state of a session as reported by [`Database::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifeTime {
    /// First touch: the session manager should apply its configured expiry.
    #[default]
    Unset,
    /// The expiry recorded in the session's bootstrap record.
    Expires(DateTime<Utc>),
}

impl LifeTime {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            LifeTime::Unset => None,
            LifeTime::Expires(at) => Some(*at),
        }
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, LifeTime::Unset)
    }

    /// An unset lifetime never counts as expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            LifeTime::Unset => false,
            LifeTime::Expires(at) => *at <= now,
        }
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at()
            .map(|at| (at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Push the expiry forward by `by`. Unset stays unset.
    pub fn shift(&self, by: Duration) -> LifeTime {
        match self {
            LifeTime::Unset => LifeTime::Unset,
            LifeTime::Expires(at) => LifeTime::Expires(add_saturating(*at, by)),
        }
    }
}

/// Expiry timestamp for a session created now with the given ttl.
pub(crate) fn expiry_from_now(expires: Duration) -> DateTime<Utc> {
    add_saturating(Utc::now(), expires)
}

fn add_saturating(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Reject keys that would collide with the bootstrap record.
pub(crate) fn check_key(sid: &str, key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidKey("empty key".to_string()));
    }
    if key == sid {
        return Err(StoreError::InvalidKey(format!(
            "{key} is reserved for the session's lifetime record"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_unset_lifetime() {
        let lt = LifeTime::default();
        assert!(lt.is_unset());
        assert_eq!(lt.expires_at(), None);
        assert!(!lt.is_expired(Utc::now()));
        assert_eq!(lt.remaining(Utc::now()), None);
        assert_eq!(lt.shift(Duration::from_secs(60)), LifeTime::Unset);
    }

    #[test]
    fn test_expired_lifetime() {
        let lt = LifeTime::Expires(at("2026-01-01T00:00:00Z"));
        let now = at("2026-01-01T00:00:01Z");
        assert!(lt.is_expired(now));
        assert_eq!(lt.remaining(now), Some(Duration::ZERO));
    }

    #[test]
    fn test_remaining_and_shift() {
        let lt = LifeTime::Expires(at("2026-01-01T01:00:00Z"));
        let now = at("2026-01-01T00:00:00Z");
        assert_eq!(lt.remaining(now), Some(Duration::from_secs(3600)));

        let shifted = lt.shift(Duration::from_secs(1800));
        assert_eq!(shifted.expires_at(), Some(at("2026-01-01T01:30:00Z")));
    }

    #[test]
    fn test_check_key() {
        assert!(check_key("abc123", "name").is_ok());
        assert!(matches!(check_key("abc123", ""), Err(StoreError::InvalidKey(_))));
        assert!(matches!(
            check_key("abc123", "abc123"),
            Err(StoreError::InvalidKey(_))
        ));
    }
}
