use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn, Span};

use crate::codec::{self, JsonTranscoder, Transcoder};
use crate::error::{ConfigError, Result, StoreError};

use super::store::Database;
use super::{check_key, expiry_from_now, LifeTime};

/// Node type every session entry is stored as.
pub const ENTRY_TYPE: &str = "SessionEntry";

/// Predicates and type applied on every connect; `/alter` with an
/// unchanged schema is a no-op, and an older one gains `@upsert`.
pub const SCHEMA: &str = r#"
sid: string @index(hash) @upsert .
skey: string @index(hash) @upsert .
svalue: string .
type SessionEntry {
    sid
    skey
    svalue
}
"#;

const ENTRY_QUERY: &str = r#"query entry($sid: string, $key: string) {
  q(func: eq(skey, $key)) @filter(eq(sid, $sid)) {
    svalue
  }
}"#;

const ENTRIES_QUERY: &str = r#"query entries($sid: string) {
  q(func: eq(sid, $sid)) @filter(NOT eq(skey, $sid)) {
    skey
    svalue
  }
}"#;

const COUNT_QUERY: &str = r#"query entries($sid: string) {
  q(func: eq(sid, $sid)) @filter(NOT eq(skey, $sid)) {
    count(uid)
  }
}"#;

/// Dgraph-based session store speaking the Alpha HTTP API.
///
/// Every entry is a `SessionEntry` node with `sid`, `skey` and `svalue`
/// predicates. Reads use DQL variables; upsert blocks, which the HTTP
/// endpoint cannot parameterize, only ever embed values through [`quote`].
pub struct DgraphStore {
    http: reqwest::Client,
    target: String,
    transcoder: Arc<dyn Transcoder>,
    span: Span,
    closed: AtomicBool,
}

#[derive(Debug, Deserialize)]
struct DgraphResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<DgraphMessage>,
}

#[derive(Debug, Deserialize)]
struct DgraphMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Rows<T> {
    #[serde(default = "Vec::new")]
    q: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ValueNode {
    #[serde(default)]
    svalue: String,
}

#[derive(Debug, Deserialize)]
struct EntryNode {
    #[serde(default)]
    skey: String,
    #[serde(default)]
    svalue: String,
}

#[derive(Debug, Deserialize)]
struct CountNode {
    count: usize,
}

impl DgraphStore {
    /// Connect to the Alpha HTTP endpoint at `target` (e.g.
    /// `http://127.0.0.1:8080`) and apply the schema.
    pub async fn new(target: &str) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), target).await
    }

    /// Same as [`new`](Self::new) with a pre-configured HTTP client
    /// (TLS, proxies, timeouts).
    pub async fn with_client(http: reqwest::Client, target: &str) -> Result<Self> {
        let target = normalize_target(target)?;
        let span = tracing::debug_span!("session_store", backend = "dgraph", url = %target);
        let store = Self {
            http,
            target,
            transcoder: Arc::new(JsonTranscoder),
            span,
            closed: AtomicBool::new(false),
        };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn ensure_schema(&self) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/alter", self.target))
            .body(SCHEMA)
            .send()
            .await?;
        into_data(resp).await?;
        debug!(parent: &self.span, "applied SessionEntry schema");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn query(&self, dql: &str, vars: &[(&str, &str)]) -> Result<Value> {
        let variables: HashMap<&str, &str> = vars.iter().copied().collect();
        let resp = self
            .http
            .post(format!("{}/query", self.target))
            .json(&json!({ "query": dql, "variables": variables }))
            .send()
            .await?;
        into_data(resp).await
    }

    async fn query_rows<T: DeserializeOwned>(&self, dql: &str, vars: &[(&str, &str)]) -> Result<Vec<T>> {
        let data = self.query(dql, vars).await?;
        parse_rows(data)
    }

    async fn mutate(&self, body: &Value) -> Result<Value> {
        let resp = self
            .http
            .post(format!("{}/mutate?commitNow=true", self.target))
            .json(body)
            .send()
            .await?;
        into_data(resp).await
    }
}

/// Add a scheme when only `host:port` was given and drop trailing slashes.
fn normalize_target(target: &str) -> Result<String> {
    let target = target.trim().trim_end_matches('/');
    if target.is_empty() {
        return Err(ConfigError::MissingTarget.into());
    }
    if target.starts_with("http://") || target.starts_with("https://") {
        Ok(target.to_string())
    } else {
        Ok(format!("http://{target}"))
    }
}

/// Render `s` as a DQL string literal.
///
/// JSON string escaping is a subset of what the DQL lexer unquotes, so no
/// input can terminate the literal early.
pub fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

async fn into_data(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body = resp.text().await?;
    response_data(status, &body)
}

/// Map a Dgraph reply to its `data`. Query and mutation failures come back
/// in `errors`, usually with a 200 status; other statuses may carry no JSON.
fn response_data(status: reqwest::StatusCode, body: &str) -> Result<Value> {
    let parsed: DgraphResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if !status.is_success() => {
            return Err(StoreError::Dgraph(format!("HTTP status {status}: {}", body.trim())));
        }
        Err(e) => return Err(StoreError::Dgraph(format!("unexpected response: {e}"))),
    };
    if !parsed.errors.is_empty() {
        let messages: Vec<String> = parsed.errors.into_iter().map(|e| e.message).collect();
        return Err(StoreError::Dgraph(messages.join("; ")));
    }
    if !status.is_success() {
        return Err(StoreError::Dgraph(format!("HTTP status {status}")));
    }
    Ok(parsed.data.unwrap_or(Value::Null))
}

fn parse_rows<T: DeserializeOwned>(data: Value) -> Result<Vec<T>> {
    if data.is_null() {
        return Ok(Vec::new());
    }
    let rows: Rows<T> = serde_json::from_value(data)
        .map_err(|e| StoreError::Dgraph(format!("unexpected query response: {e}")))?;
    Ok(rows.q)
}

/// Rows returned by the query block of an upsert request.
fn upsert_rows<T: DeserializeOwned>(data: Value) -> Result<Vec<T>> {
    match data.get("queries") {
        Some(queries) => parse_rows(queries.clone()),
        None => Ok(Vec::new()),
    }
}

fn entry_selector(sid: &str, key: &str) -> String {
    format!(
        "{{ q(func: eq(skey, {})) @filter(eq(sid, {})) {{ v as uid svalue }} }}",
        quote(key),
        quote(sid)
    )
}

fn node(sid: &str, key: &str, uid: &str, stored: &str) -> Value {
    json!({
        "uid": uid,
        "sid": sid,
        "skey": key,
        "svalue": stored,
        "dgraph.type": ENTRY_TYPE,
    })
}

/// Create the lifetime node only when the session has none.
fn bootstrap_request(sid: &str, stored: &str) -> Value {
    json!({
        "query": entry_selector(sid, sid),
        "mutations": [{
            "cond": "@if(eq(len(v), 0))",
            "set": [node(sid, sid, "_:lifetime", stored)],
        }],
    })
}

/// Update the matching node, or create one when `v` is empty.
fn upsert_request(sid: &str, key: &str, stored: &str) -> Value {
    json!({
        "query": entry_selector(sid, key),
        "mutations": [{
            "set": [node(sid, key, "uid(v)", stored)],
        }],
    })
}

fn delete_request(query: String) -> Value {
    json!({
        "query": query,
        "mutations": [{
            "cond": "@if(gt(len(v), 0))",
            "delete": [{ "uid": "uid(v)" }],
        }],
    })
}

fn delete_entry_request(sid: &str, key: &str) -> Value {
    delete_request(entry_selector(sid, key))
}

fn clear_request(sid: &str) -> Value {
    let sid = quote(sid);
    delete_request(format!(
        "{{ q(func: eq(sid, {sid})) @filter(NOT eq(skey, {sid})) {{ v as uid }} }}"
    ))
}

fn release_request(sid: &str) -> Value {
    delete_request(format!(
        "{{ q(func: eq(sid, {})) {{ v as uid }} }}",
        quote(sid)
    ))
}

#[async_trait]
impl Database for DgraphStore {
    async fn acquire(&self, sid: &str, expires: Duration) -> Result<LifeTime> {
        self.ensure_open()?;
        let stored = codec::encode_expiry(self.transcoder.as_ref(), expiry_from_now(expires))?;

        let data = self.mutate(&bootstrap_request(sid, &stored)).await?;
        let existing: Vec<ValueNode> = upsert_rows(data)?;

        match existing.first() {
            Some(found) => {
                let at = codec::decode_expiry(self.transcoder.as_ref(), &found.svalue)?;
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
        self.ensure_open()?;
        check_key(sid, key)?;
        let stored = codec::encode_value(self.transcoder.as_ref(), value)?;
        self.mutate(&upsert_request(sid, key, &stored)).await?;
        Ok(())
    }

    async fn decode(&self, sid: &str, key: &str) -> Result<Option<Value>> {
        self.ensure_open()?;
        if key == sid {
            return Ok(None);
        }
        let rows: Vec<ValueNode> = self
            .query_rows(ENTRY_QUERY, &[("$sid", sid), ("$key", key)])
            .await?;

        match rows.first() {
            Some(row) => Ok(Some(codec::decode_value(self.transcoder.as_ref(), &row.svalue)?)),
            None => Ok(None),
        }
    }

    async fn visit(
        &self,
        sid: &str,
        visitor: &mut (dyn for<'k> FnMut(&'k str, Value) + Send),
    ) -> Result<()> {
        self.ensure_open()?;
        let rows: Vec<EntryNode> = self.query_rows(ENTRIES_QUERY, &[("$sid", sid)]).await?;
        for row in rows {
            let value = codec::decode_value(self.transcoder.as_ref(), &row.svalue)?;
            visitor(&row.skey, value);
        }
        Ok(())
    }

    async fn len(&self, sid: &str) -> Result<usize> {
        self.ensure_open()?;
        let rows: Vec<CountNode> = self.query_rows(COUNT_QUERY, &[("$sid", sid)]).await?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    async fn delete(&self, sid: &str, key: &str) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        match self.mutate(&delete_entry_request(sid, key)).await {
            Ok(_) => true,
            Err(e) => {
                warn!(parent: &self.span, sid, key, error = %e, "Dgraph delete error");
                false
            }
        }
    }

    async fn clear(&self, sid: &str) -> Result<()> {
        self.ensure_open()?;
        self.mutate(&clear_request(sid)).await?;
        debug!(parent: &self.span, sid, "cleared session entries");
        Ok(())
    }

    async fn release(&self, sid: &str) -> Result<()> {
        self.ensure_open()?;
        self.mutate(&release_request(sid)).await?;
        debug!(parent: &self.span, sid, "released session");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
