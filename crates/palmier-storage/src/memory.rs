//! In-process record store with the same filter/sort/pagination semantics as
//! the HTTP store. Used by tests and dry runs.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{ListPage, ListQuery, Record, RecordStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Record>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of `collection` in insertion order.
    pub async fn snapshot(&self, collection: &str) -> Vec<Record> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    fn new_id() -> String {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(15);
        id
    }

    fn not_found(collection: &str, id: &str) -> StoreError {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

fn has_id(record: &Record, id: &str) -> bool {
    record.get("id").and_then(Value::as_str) == Some(id)
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<ListPage, StoreError> {
        let collections = self.collections.lock().await;
        let mut matching: Vec<&Record> = collections
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| query.filter.as_ref().is_none_or(|f| f.matches(r)))
                    .collect()
            })
            .unwrap_or_default();

        // Stable: ties keep insertion order.
        matching.sort_by(|a, b| {
            query
                .sort
                .iter()
                .map(|s| s.compare(a, b))
                .find(|o| o.is_ne())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let page = query.page.max(1);
        let per_page = query.per_page.max(1);
        let skip = ((page - 1) as usize).saturating_mul(per_page as usize);
        let items = matching
            .iter()
            .skip(skip)
            .take(per_page as usize)
            .map(|r| (*r).clone())
            .collect();

        Ok(ListPage {
            page,
            per_page,
            total_items: matching.len() as u64,
            items,
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Record, StoreError> {
        let collections = self.collections.lock().await;
        collections
            .get(collection)
            .and_then(|records| records.iter().find(|r| has_id(r, id)))
            .cloned()
            .ok_or_else(|| Self::not_found(collection, id))
    }

    async fn create(&self, collection: &str, mut record: Record) -> Result<Record, StoreError> {
        let id = match crate::record_id(&record) {
            Some(id) => id.to_string(),
            None => Self::new_id(),
        };
        let mut collections = self.collections.lock().await;
        let records = collections.entry(collection.to_string()).or_default();
        if records.iter().any(|r| has_id(r, &id)) {
            return Err(StoreError::InvalidRecord(format!(
                "duplicate id `{id}` in `{collection}`"
            )));
        }
        record.insert("id".to_string(), Value::String(id));
        records.push(record.clone());
        Ok(record)
    }

    async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record, StoreError> {
        let mut collections = self.collections.lock().await;
        let record = collections
            .get_mut(collection)
            .and_then(|records| records.iter_mut().find(|r| has_id(r, id)))
            .ok_or_else(|| Self::not_found(collection, id))?;
        for (field, value) in patch {
            if field != "id" {
                record.insert(field, value);
            }
        }
        Ok(record.clone())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().await;
        let records = collections
            .get_mut(collection)
            .ok_or_else(|| Self::not_found(collection, id))?;
        let before = records.len();
        records.retain(|r| !has_id(r, id));
        if records.len() == before {
            return Err(Self::not_found(collection, id));
        }
        Ok(())
    }
}
