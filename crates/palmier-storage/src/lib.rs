//! Record store abstraction, its PocketBase and in-memory backends, and the
//! outbound HTTP helpers (page fetcher, link liveness probe).

pub mod fetch;
pub mod filter;
pub mod liveness;
pub mod memory;
pub mod pocketbase;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fetch::{BackoffPolicy, FetchError, FetchedResponse, HttpClientConfig, HttpFetcher};
pub use filter::{Filter, FilterValue, Sort};
pub use liveness::{AssumeAlive, HttpLivenessProbe, LivenessProbe};
pub use memory::MemoryStore;
pub use pocketbase::{PocketBaseConfig, PocketBaseStore};

pub const CRATE_NAME: &str = "palmier-storage";

pub const EVENTS: &str = "events";
pub const FLIGHT_PRICES: &str = "flight_prices";
pub const CRAWL_LOGS: &str = "crawl_logs";

/// Page size used by full-collection scans.
pub const FULL_SCAN_PAGE_SIZE: u32 = 200;

/// A stored record as the store returns it: a flat JSON object with an `id`.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },
    #[error("record `{id}` not found in `{collection}`")]
    NotFound { collection: String, id: String },
    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    /// 1-based.
    pub page: u32,
    pub per_page: u32,
    pub sort: Vec<Sort>,
    pub filter: Option<Filter>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
            sort: Vec::new(),
            filter: None,
        }
    }
}

impl ListQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    pub fn page(mut self, page: u32, per_page: u32) -> Self {
        self.page = page.max(1);
        self.per_page = per_page.max(1);
        self
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    #[serde(default)]
    pub items: Vec<Record>,
}

impl ListPage {
    pub fn is_last(&self) -> bool {
        self.items.len() < self.per_page as usize
            || (self.page as u64) * (self.per_page as u64) >= self.total_items
    }
}

/// Generic collection store: list with filter/sort/pagination plus CRUD.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<ListPage, StoreError>;
    async fn get(&self, collection: &str, id: &str) -> Result<Record, StoreError>;
    async fn create(&self, collection: &str, record: Record) -> Result<Record, StoreError>;
    /// Merge `patch` into the stored record.
    async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record, StoreError>;
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;
}

/// First record matching `filter` in the store's natural order.
pub async fn first<S: RecordStore + ?Sized>(
    store: &S,
    collection: &str,
    filter: Filter,
) -> Result<Option<Record>, StoreError> {
    let query = ListQuery::filtered(filter).page(1, 1);
    let page = store.list(collection, &query).await?;
    Ok(page.items.into_iter().next())
}

/// Read every record matching `filter`, one page of [`FULL_SCAN_PAGE_SIZE`] at a time.
pub async fn list_all<S: RecordStore + ?Sized>(
    store: &S,
    collection: &str,
    filter: Option<Filter>,
    sort: Vec<Sort>,
) -> Result<Vec<Record>, StoreError> {
    let mut out = Vec::new();
    let mut page_no = 1;
    loop {
        let query = ListQuery {
            page: page_no,
            per_page: FULL_SCAN_PAGE_SIZE,
            sort: sort.clone(),
            filter: filter.clone(),
        };
        let page = store.list(collection, &query).await?;
        let last = page.is_last();
        out.extend(page.items);
        if last {
            return Ok(out);
        }
        page_no += 1;
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Record, StoreError> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidRecord(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

pub fn decode<T: DeserializeOwned>(record: Record) -> Result<T, StoreError> {
    Ok(serde_json::from_value(serde_json::Value::Object(record))?)
}

pub fn record_id(record: &Record) -> Option<&str> {
    record
        .get("id")
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.is_empty())
}

/// Single-field patch, e.g. `{"status": "expired"}`.
pub fn patch(field: &str, value: impl Into<serde_json::Value>) -> Record {
    let mut record = Record::new();
    record.insert(field.to_string(), value.into());
    record
}
