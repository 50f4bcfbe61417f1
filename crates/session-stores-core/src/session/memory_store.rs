use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, Span};

use crate::codec::{self, JsonTranscoder, Transcoder};
use crate::error::Result;

use super::store::Database;
use super::{check_key, expiry_from_now, LifeTime};

/// In-process session store.
///
/// Keeps the same encoded layout as the database stores (one map of
/// `key -> base64 value` per session, bootstrap record under the session
/// id) so it can stand in for them in tests and single-node setups.
pub struct MemoryStore {
    sessions: DashMap<String, HashMap<String, String>>,
    transcoder: Arc<dyn Transcoder>,
    span: Span,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            transcoder: Arc::new(JsonTranscoder),
            span: tracing::debug_span!("session_store", backend = "memory"),
        }
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Number of sessions currently held.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn snapshot(&self, sid: &str) -> Vec<(String, String)> {
        self.sessions
            .get(sid)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(k, _)| k.as_str() != sid)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for MemoryStore {
    async fn acquire(&self, sid: &str, expires: Duration) -> Result<LifeTime> {
        let mut entries = self.sessions.entry(sid.to_string()).or_default();
        if let Some(stored) = entries.get(sid) {
            let at = codec::decode_expiry(self.transcoder.as_ref(), stored)?;
            return Ok(LifeTime::Expires(at));
        }

        let stored = codec::encode_expiry(self.transcoder.as_ref(), expiry_from_now(expires))?;
        entries.insert(sid.to_string(), stored);
        debug!(parent: &self.span, sid, "created lifetime record");
        Ok(LifeTime::Unset)
    }

    async fn set(
        &self,
        sid: &str,
        _lifetime: &LifeTime,
        key: &str,
        value: &Value,
        _immutable: bool,
    ) -> Result<()> {
        check_key(sid, key)?;
        let stored = codec::encode_value(self.transcoder.as_ref(), value)?;
        self.sessions
            .entry(sid.to_string())
            .or_default()
            .insert(key.to_string(), stored);
        Ok(())
    }

    async fn decode(&self, sid: &str, key: &str) -> Result<Option<Value>> {
        if key == sid {
            return Ok(None);
        }
        let stored = self
            .sessions
            .get(sid)
            .and_then(|entries| entries.get(key).cloned());

        match stored {
            Some(stored) => Ok(Some(codec::decode_value(self.transcoder.as_ref(), &stored)?)),
            None => Ok(None),
        }
    }

    async fn visit(
        &self,
        sid: &str,
        visitor: &mut (dyn for<'k> FnMut(&'k str, Value) + Send),
    ) -> Result<()> {
        // Copy out first so the visitor never runs under the shard lock.
        for (key, stored) in self.snapshot(sid) {
            let value = codec::decode_value(self.transcoder.as_ref(), &stored)?;
            visitor(&key, value);
        }
        Ok(())
    }

    async fn len(&self, sid: &str) -> Result<usize> {
        Ok(self
            .sessions
            .get(sid)
            .map(|entries| entries.keys().filter(|k| k.as_str() != sid).count())
            .unwrap_or(0))
    }

    async fn delete(&self, sid: &str, key: &str) -> bool {
        if let Some(mut entries) = self.sessions.get_mut(sid) {
            entries.remove(key);
        }
        true
    }

    async fn clear(&self, sid: &str) -> Result<()> {
        if let Some(mut entries) = self.sessions.get_mut(sid) {
            entries.retain(|k, _| k == sid);
        }
        debug!(parent: &self.span, sid, "cleared session entries");
        Ok(())
    }

    async fn release(&self, sid: &str) -> Result<()> {
        self.sessions.remove(sid);
        debug!(parent: &self.span, sid, "released session");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
