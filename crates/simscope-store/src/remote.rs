//! Remote store contract and implementations.
//!
//! The engine talks to the store of record through `RemoteStore` only. The
//! real client (`HttpStore`, behind the `http` feature) speaks the store's
//! REST dialect: list endpoints return `{results: [...], next: url|null}`
//! pages, single lookups are filters that must match exactly one record.
//! `MemoryStore` backs every test with in-process tables and fetch counters.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

// ============================================================================
// Lookup
// ============================================================================

/// Query criteria with a deterministic encoding, so equal lookups produce
/// equal cache keys regardless of construction order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lookup {
    fields: BTreeMap<String, Value>,
}

impl Lookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// `key=value` pairs joined with `&`, sorted by key.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            out.push_str(k);
            out.push('=');
            match v {
                Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out
    }

    /// Whether a record's payload satisfies every criterion.
    pub fn matches(&self, payload: &Value) -> bool {
        self.fields
            .iter()
            .all(|(k, v)| payload.get(k) == Some(v))
    }
}

impl fmt::Display for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no {endpoint} record matching `{lookup}`")]
    NotFound { endpoint: String, lookup: String },

    #[error("multiple {endpoint} records matching `{lookup}`")]
    MultipleFound { endpoint: String, lookup: String },

    #[error("store returned status {status} for {endpoint}")]
    Api { endpoint: String, status: u16 },

    #[error("malformed store response for {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("http error: {0}")]
    Http(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(feature = "http")]
impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Http(err.to_string())
    }
}

// ============================================================================
// RemoteStore trait
// ============================================================================

/// Async seam to the store of record.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetch the single record matching `lookup`. Zero matches is
    /// `NotFound`, more than one is `MultipleFound`.
    async fn get_one(&self, endpoint: &str, lookup: &Lookup) -> StoreResult<Value>;

    /// Fetch every record matching `lookup`, following pagination to
    /// exhaustion.
    async fn get_list(&self, endpoint: &str, lookup: &Lookup) -> StoreResult<Vec<Value>>;

    /// POST a new record; returns the stored payload (with its id).
    async fn create(&self, endpoint: &str, payload: Value) -> StoreResult<Value>;

    /// PUT a full replacement for an existing record.
    async fn update(&self, endpoint: &str, pk: i64, payload: Value) -> StoreResult<Value>;

    /// Create when the payload has no `id`, update otherwise.
    async fn save(&self, endpoint: &str, payload: Value) -> StoreResult<Value> {
        match payload.get("id").and_then(Value::as_i64) {
            Some(pk) => self.update(endpoint, pk, payload).await,
            None => self.create(endpoint, payload).await,
        }
    }
}

// ============================================================================
// HttpStore
// ============================================================================

#[cfg(feature = "http")]
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    auth: Option<(String, String)>,
}

#[cfg(feature = "http")]
impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            auth: None,
        }
    }

    pub fn with_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some((user.into(), password.into()));
        self
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}/", self.base_url.trim_end_matches('/'), endpoint)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some((user, password)) = &self.auth {
            req = req.basic_auth(user, Some(password));
        }
        req
    }

    async fn fetch_json(&self, endpoint: &str, req: reqwest::RequestBuilder) -> StoreResult<Value> {
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl RemoteStore for HttpStore {
    async fn get_one(&self, endpoint: &str, lookup: &Lookup) -> StoreResult<Value> {
        // Pk lookups hit the detail URL directly; everything else is a
        // filter that must be unique.
        if let Some(pk) = lookup.get("id").and_then(Value::as_i64) {
            let url = format!("{}{}/", self.endpoint_url(endpoint), pk);
            return self.fetch_json(endpoint, self.request(reqwest::Method::GET, &url)).await;
        }

        let results = self.get_list(endpoint, lookup).await?;
        let mut iter = results.into_iter();
        let first = iter.next().ok_or_else(|| StoreError::NotFound {
            endpoint: endpoint.to_string(),
            lookup: lookup.encode(),
        })?;
        if iter.next().is_some() {
            return Err(StoreError::MultipleFound {
                endpoint: endpoint.to_string(),
                lookup: lookup.encode(),
            });
        }
        Ok(first)
    }

    async fn get_list(&self, endpoint: &str, lookup: &Lookup) -> StoreResult<Vec<Value>> {
        let mut url = self.endpoint_url(endpoint);
        if !lookup.is_empty() {
            url = format!("{}?{}", url, lookup.encode());
        }

        let mut results = Vec::new();
        loop {
            let page = self
                .fetch_json(endpoint, self.request(reqwest::Method::GET, &url))
                .await?;
            match page {
                // Paginated envelope
                Value::Object(mut map) if map.contains_key("results") => {
                    match map.remove("results") {
                        Some(Value::Array(items)) => results.extend(items),
                        _ => {
                            return Err(StoreError::Decode {
                                endpoint: endpoint.to_string(),
                                reason: "`results` is not an array".to_string(),
                            })
                        }
                    }
                    match map.get("next").and_then(Value::as_str) {
                        Some(next) => {
                            tracing::debug!(endpoint, next, "following pagination link");
                            url = next.to_string();
                        }
                        None => break,
                    }
                }
                // Bare array, no pagination
                Value::Array(items) => {
                    results.extend(items);
                    break;
                }
                _ => {
                    return Err(StoreError::Decode {
                        endpoint: endpoint.to_string(),
                        reason: "expected an array or paginated envelope".to_string(),
                    })
                }
            }
        }
        Ok(results)
    }

    async fn create(&self, endpoint: &str, payload: Value) -> StoreResult<Value> {
        let url = self.endpoint_url(endpoint);
        self.fetch_json(
            endpoint,
            self.request(reqwest::Method::POST, &url).json(&payload),
        )
        .await
    }

    async fn update(&self, endpoint: &str, pk: i64, payload: Value) -> StoreResult<Value> {
        let url = format!("{}{}/", self.endpoint_url(endpoint), pk);
        self.fetch_json(
            endpoint,
            self.request(reqwest::Method::PUT, &url).json(&payload),
        )
        .await
    }
}

// ============================================================================
// MemoryStore (test double)
// ============================================================================

/// In-process store for tests: per-endpoint record tables plus a fetch
/// counter to assert how many round trips an operation cost.
#[derive(Default)]
pub struct MemoryStore {
    tables: parking_lot::Mutex<BTreeMap<String, Vec<Value>>>,
    fetches: std::sync::atomic::AtomicUsize,
    next_pk: std::sync::atomic::AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: parking_lot::Mutex::new(BTreeMap::new()),
            fetches: std::sync::atomic::AtomicUsize::new(0),
            next_pk: std::sync::atomic::AtomicI64::new(10_000),
        }
    }

    /// Seed a table without counting as a fetch.
    pub fn insert(&self, endpoint: &str, payload: Value) {
        self.tables
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .push(payload);
    }

    pub fn remove(&self, endpoint: &str, pk: i64) {
        if let Some(table) = self.tables.lock().get_mut(endpoint) {
            table.retain(|r| r.get("id").and_then(Value::as_i64) != Some(pk));
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn record_fetch(&self) {
        self.fetches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get_one(&self, endpoint: &str, lookup: &Lookup) -> StoreResult<Value> {
        let results = self.get_list(endpoint, lookup).await?;
        let mut iter = results.into_iter();
        let first = iter.next().ok_or_else(|| StoreError::NotFound {
            endpoint: endpoint.to_string(),
            lookup: lookup.encode(),
        })?;
        if iter.next().is_some() {
            return Err(StoreError::MultipleFound {
                endpoint: endpoint.to_string(),
                lookup: lookup.encode(),
            });
        }
        Ok(first)
    }

    async fn get_list(&self, endpoint: &str, lookup: &Lookup) -> StoreResult<Vec<Value>> {
        self.record_fetch();
        let tables = self.tables.lock();
        let Some(table) = tables.get(endpoint) else {
            return Ok(Vec::new());
        };
        Ok(table
            .iter()
            .filter(|r| lookup.matches(r))
            .cloned()
            .collect())
    }

    async fn create(&self, endpoint: &str, mut payload: Value) -> StoreResult<Value> {
        if payload.get("id").and_then(Value::as_i64).is_none() {
            let pk = self
                .next_pk
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if let Value::Object(map) = &mut payload {
                map.insert("id".to_string(), Value::from(pk));
            }
        }
        self.insert(endpoint, payload.clone());
        Ok(payload)
    }

    async fn update(&self, endpoint: &str, pk: i64, payload: Value) -> StoreResult<Value> {
        let mut tables = self.tables.lock();
        let table = tables
            .entry(endpoint.to_string())
            .or_default();
        let slot = table
            .iter_mut()
            .find(|r| r.get("id").and_then(Value::as_i64) == Some(pk))
            .ok_or_else(|| StoreError::NotFound {
                endpoint: endpoint.to_string(),
                lookup: format!("id={pk}"),
            })?;
        *slot = payload.clone();
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_encoding_is_order_independent() {
        let a = Lookup::new().with("run", 1).with("world", 2);
        let b = Lookup::new().with("world", 2).with("run", 1);
        assert_eq!(a.encode(), b.encode());
        assert_eq!(a.encode(), "run=1&world=2");
    }

    #[tokio::test]
    async fn memory_store_get_one_enforces_uniqueness() {
        let store = MemoryStore::new();
        store.insert("runusers", json!({"id": 5, "run": 1}));
        store.insert("runusers", json!({"id": 6, "run": 1}));

        let one = store
            .get_one("runusers", &Lookup::new().with("id", 5))
            .await
            .unwrap();
        assert_eq!(one["id"], json!(5));

        let err = store
            .get_one("runusers", &Lookup::new().with("run", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MultipleFound { .. }));

        let err = store
            .get_one("runusers", &Lookup::new().with("id", 99))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn memory_store_save_routes_create_and_update() {
        let store = MemoryStore::new();
        let created = store
            .save("worlds", json!({"run": 1, "name": "w"}))
            .await
            .unwrap();
        let pk = created["id"].as_i64().unwrap();

        let updated = store
            .save("worlds", json!({"id": pk, "run": 1, "name": "w2"}))
            .await
            .unwrap();
        assert_eq!(updated["name"], json!("w2"));

        let rows = store
            .get_list("worlds", &Lookup::new().with("id", pk))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("w2"));
    }
}
