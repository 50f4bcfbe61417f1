use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, ReturnDocument};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn, Span};

use crate::codec::{self, JsonTranscoder, Transcoder};
use crate::error::{ConfigError, Result};

use super::store::Database;
use super::{check_key, expiry_from_now, LifeTime};

/// One stored entry. Each session is a collection named after its id.
///
/// `_id` carries the key so the collection's built-in unique index keeps
/// one document per key under concurrent upserts; `key` repeats it for
/// readability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub key: String,
    pub value: String,
}

/// MongoDB-based session store.
pub struct MongoStore {
    client: Client,
    database: mongodb::Database,
    transcoder: Arc<dyn Transcoder>,
    span: Span,
}

impl MongoStore {
    /// Connect with custom client options to the named database.
    pub fn new(options: ClientOptions, database: &str) -> Result<Self> {
        if database.is_empty() {
            return Err(ConfigError::MissingDatabase.into());
        }
        let client = Client::with_options(options)?;
        Ok(Self::from_client(client, database))
    }

    /// Connect from a `mongodb://` connection string.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        if database.is_empty() {
            return Err(ConfigError::MissingDatabase.into());
        }
        let options = ClientOptions::parse(uri).await?;
        Self::new(options, database)
    }

    /// Wrap an already connected client.
    pub fn from_client(client: Client, database: &str) -> Self {
        Self::from_database(client.database(database))
    }

    /// Wrap an existing database handle; its client is shut down on close.
    pub fn from_database(database: mongodb::Database) -> Self {
        let span = tracing::debug_span!(
            "session_store",
            backend = "mongodb",
            database = database.name()
        );
        Self {
            client: database.client().clone(),
            database,
            transcoder: Arc::new(JsonTranscoder),
            span,
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

    /// The database sessions are written to.
    pub fn database(&self) -> &mongodb::Database {
        &self.database
    }

    fn collection(&self, sid: &str) -> Collection<EntryDocument> {
        self.database.collection(sid)
    }
}

fn key_filter(key: &str) -> Document {
    doc! { "_id": key }
}

/// Every document of a session except its lifetime record.
fn entries_filter(sid: &str) -> Document {
    doc! { "_id": { "$ne": sid } }
}

fn upsert_update(key: &str, value: &str) -> Document {
    doc! { "$set": { "key": key, "value": value } }
}

fn bootstrap_insert(sid: &str, value: &str) -> Document {
    doc! { "$setOnInsert": { "key": sid, "value": value } }
}

#[async_trait]
impl Database for MongoStore {
    async fn acquire(&self, sid: &str, expires: Duration) -> Result<LifeTime> {
        let stored = codec::encode_expiry(self.transcoder.as_ref(), expiry_from_now(expires))?;

        // Matching document is left untouched; a missing one is inserted
        // with `_id = sid`, so racing first requests collide on the index.
        let before = self
            .collection(sid)
            .find_one_and_update(key_filter(sid), bootstrap_insert(sid, &stored))
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .await?;

        match before {
            Some(existing) => {
                let at = codec::decode_expiry(self.transcoder.as_ref(), &existing.value)?;
                Ok(LifeTime::Expires(at))
            }
            None => {
                debug!(parent: &self.span, sid, "created lifetime record");
                Ok(LifeTime::Unset)
            }
        }
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

        self.collection(sid)
            .update_one(key_filter(key), upsert_update(key, &stored))
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn decode(&self, sid: &str, key: &str) -> Result<Option<Value>> {
        if key == sid {
            return Ok(None);
        }
        let found = self.collection(sid).find_one(key_filter(key)).await?;
        match found {
            Some(entry) => Ok(Some(codec::decode_value(
                self.transcoder.as_ref(),
                &entry.value,
            )?)),
            None => Ok(None),
        }
    }

    async fn visit(
        &self,
        sid: &str,
        visitor: &mut (dyn for<'k> FnMut(&'k str, Value) + Send),
    ) -> Result<()> {
        let mut cursor = self.collection(sid).find(entries_filter(sid)).await?;
        while let Some(entry) = cursor.try_next().await? {
            let value = codec::decode_value(self.transcoder.as_ref(), &entry.value)?;
            visitor(&entry.key, value);
        }
        Ok(())
    }

    async fn len(&self, sid: &str) -> Result<usize> {
        let n = self
            .collection(sid)
            .count_documents(entries_filter(sid))
            .await?;
        Ok(usize::try_from(n).unwrap_or(usize::MAX))
    }

    async fn delete(&self, sid: &str, key: &str) -> bool {
        match self.collection(sid).delete_one(key_filter(key)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(parent: &self.span, sid, key, error = %e, "MongoDB delete_one error");
                false
            }
        }
    }

    async fn clear(&self, sid: &str) -> Result<()> {
        let result = self
            .collection(sid)
            .delete_many(entries_filter(sid))
            .await?;
        debug!(parent: &self.span, sid, deleted = result.deleted_count, "cleared session entries");
        Ok(())
    }

    async fn release(&self, sid: &str) -> Result<()> {
        self.collection(sid).drop().await?;
        debug!(parent: &self.span, sid, "released session");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson;

    #[test]
    fn test_key_filter_uses_unique_id() {
        // Upserts matching on `_id` converge on the built-in unique index.
        assert_eq!(key_filter("name"), doc! { "_id": "name" });
        assert_eq!(key_filter("abc123"), doc! { "_id": "abc123" });
    }

    #[test]
    fn test_entries_filter_excludes_lifetime_record() {
        let filter = entries_filter("abc123");
        let inner = filter.get_document("_id").unwrap();
        assert_eq!(inner.get_str("$ne").unwrap(), "abc123");
        assert!(filter.get("key").is_none());
    }

    #[test]
    fn test_upsert_update_sets_both_fields() {
        let update = upsert_update("name", "ImlyaXMi");
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("key").unwrap(), "name");
        assert_eq!(set.get_str("value").unwrap(), "ImlyaXMi");
    }

    #[test]
    fn test_bootstrap_insert_only_on_insert() {
        let update = bootstrap_insert("abc123", "stored");
        assert!(update.get("$set").is_none());
        let on_insert = update.get_document("$setOnInsert").unwrap();
        assert_eq!(on_insert.get_str("key").unwrap(), "abc123");
    }

    #[test]
    fn test_entry_document_layout() {
        let raw = doc! {
            "_id": "name",
            "key": "name",
            "value": "ImlyaXMi",
        };
        let entry: EntryDocument = bson::from_document(raw.clone()).unwrap();
        assert_eq!(
            entry,
            EntryDocument {
                id: "name".to_string(),
                key: "name".to_string(),
                value: "ImlyaXMi".to_string(),
            }
        );
        assert_eq!(bson::to_document(&entry).unwrap(), raw);
    }

    #[tokio::test]
    async fn test_from_database_wraps_handle() {
        // Clients connect lazily, so no server is needed here.
        let client = Client::with_uri_str("mongodb://127.0.0.1:27017").await.unwrap();
        let store = MongoStore::from_database(client.database("sessions"));
        assert_eq!(store.database().name(), "sessions");

        let store = MongoStore::from_client(client, "other");
        assert_eq!(store.database().name(), "other");
    }

    #[tokio::test]
    async fn test_new_requires_database_name() {
        let err = MongoStore::connect("mongodb://127.0.0.1:27017", "")
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            crate::error::StoreError::Config(ConfigError::MissingDatabase)
        ));
    }
}
