//! Published → expired transitions: past start time or dead source link.

use std::sync::Arc;

use chrono::NaiveDateTime;
use palmier_core::datetime::to_store;
use palmier_core::EventStatus;
use palmier_storage::{list_all, patch, record_id, Filter, LivenessProbe, RecordStore, StoreError, EVENTS};
use serde_json::Value;
use tracing::{info, warn};

pub struct LifecycleManager {
    store: Arc<dyn RecordStore>,
}

fn published() -> Filter {
    Filter::eq("status", EventStatus::Published.as_str())
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    async fn expire(&self, id: &str) -> bool {
        match self
            .store
            .update(EVENTS, id, patch("status", EventStatus::Expired.as_str()))
            .await
        {
            Ok(_) => true,
            Err(err) => {
                warn!(event_id = id, error = %err, "failed to expire record");
                false
            }
        }
    }

    /// Expire every published record starting strictly before `now`.
    pub async fn expire_past(&self, now: NaiveDateTime) -> Result<usize, StoreError> {
        let filter = published().and(Filter::lt("date_start", to_store(&now)));
        // Ids first: expiring moves records out of the filtered set.
        let ids: Vec<String> = list_all(self.store.as_ref(), EVENTS, Some(filter), Vec::new())
            .await?
            .iter()
            .filter_map(|r| record_id(r).map(str::to_string))
            .collect();

        let mut expired = 0;
        for id in &ids {
            if self.expire(id).await {
                expired += 1;
            }
        }
        info!(expired, candidates = ids.len(), "past events expired");
        Ok(expired)
    }

    /// Probe the source link of every published record and expire the dead
    /// ones. Exempt links are not probed.
    pub async fn expire_dead_links(&self, probe: &dyn LivenessProbe) -> Result<usize, StoreError> {
        let filter = published().and(Filter::ne("source_url", ""));
        let candidates: Vec<(String, String)> =
            list_all(self.store.as_ref(), EVENTS, Some(filter), Vec::new())
                .await?
                .iter()
                .filter_map(|r| {
                    let id = record_id(r)?;
                    let url = r.get("source_url").and_then(Value::as_str)?.trim();
                    (!url.is_empty()).then(|| (id.to_string(), url.to_string()))
                })
                .collect();

        let mut expired = 0;
        for (id, url) in &candidates {
            if probe.is_exempt(url) || probe.probe(url).await {
                continue;
            }
            info!(event_id = %id, url = %url, "dead source link");
            if self.expire(id).await {
                expired += 1;
            }
        }
        info!(expired, checked = candidates.len(), "link check complete");
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use palmier_storage::{encode, MemoryStore};
    use serde_json::json;

    struct DeadHosts(&'static str);

    #[async_trait]
    impl LivenessProbe for DeadHosts {
        fn is_exempt(&self, url: &str) -> bool {
            url.contains("ogcnice.com")
        }

        async fn probe(&self, url: &str) -> bool {
            !url.contains(self.0)
        }
    }

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    async fn seed(store: &MemoryStore, status: &str, start: NaiveDateTime, url: &str) -> String {
        let record = encode(&json!({
            "title": "x",
            "status": status,
            "date_start": to_store(&start),
            "source_url": url,
        }))
        .unwrap();
        let created = store.create(EVENTS, record).await.unwrap();
        record_id(&created).unwrap().to_string()
    }

    async fn status(store: &MemoryStore, id: &str) -> String {
        store.get(EVENTS, id).await.unwrap()["status"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn expire_past_only_touches_published_records_before_now() {
        let store = Arc::new(MemoryStore::new());
        let past = seed(&store, "published", at(10, 20), "").await;
        let future = seed(&store, "published", at(12, 20), "").await;
        let cancelled = seed(&store, "cancelled", at(10, 20), "").await;
        let boundary = seed(&store, "published", at(11, 12), "").await;

        let manager = LifecycleManager::new(store.clone());
        assert_eq!(manager.expire_past(at(11, 12)).await.unwrap(), 1);
        assert_eq!(status(&store, &past).await, "expired");
        assert_eq!(status(&store, &future).await, "published");
        assert_eq!(status(&store, &cancelled).await, "cancelled");
        assert_eq!(status(&store, &boundary).await, "published");
        assert_eq!(manager.expire_past(at(11, 12)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dead_links_expire_and_exempt_links_survive() {
        let store = Arc::new(MemoryStore::new());
        let dead = seed(&store, "published", at(20, 20), "https://gone.example/e/1").await;
        let alive = seed(&store, "published", at(20, 20), "https://fine.example/e/2").await;
        let exempt = seed(&store, "published", at(20, 20), "https://gone.example/ogcnice.com").await;
        let no_url = seed(&store, "published", at(20, 20), "").await;

        let manager = LifecycleManager::new(store.clone());
        let expired = manager
            .expire_dead_links(&DeadHosts("gone.example"))
            .await
            .unwrap();
        assert_eq!(expired, 1);
        assert_eq!(status(&store, &dead).await, "expired");
        assert_eq!(status(&store, &alive).await, "published");
        assert_eq!(status(&store, &exempt).await, "published");
        assert_eq!(status(&store, &no_url).await, "published");
    }
}
