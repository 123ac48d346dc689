use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use palmier_adapters::{AdapterError, FixtureAdapter, SourceAdapter};
use palmier_core::datetime::to_store;
use palmier_core::tags::{SOLD_OUT, SPORT_MATCH};
use palmier_core::{normalize_match_title, CrawlLog, CrawlStatus, EventRecord, RawRecord, TagCategory, TagSet};
use palmier_storage::{
    decode, encode, AssumeAlive, ListPage, ListQuery, LivenessProbe, MemoryStore, Record,
    RecordStore, StoreError, CRAWL_LOGS, EVENTS,
};
use palmier_sync::{
    run_guarded, Blocklist, DedupEngine, EnrichmentService, FixedClock, FuzzyCheck, RunCoordinator,
    SkipReason, SyncConfig, SyncPipeline,
};
use serde_json::json;

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn at(month: u32, day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, month, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn now() -> NaiveDateTime {
    at(6, 1, 10)
}

struct StaticAdapter {
    name: &'static str,
    tier_scored: bool,
    records: Vec<RawRecord>,
}

#[async_trait]
impl SourceAdapter for StaticAdapter {
    fn source_name(&self) -> &str {
        self.name
    }

    fn tier_scored(&self) -> bool {
        self.tier_scored
    }

    async fn crawl(&self) -> Result<Vec<RawRecord>, AdapterError> {
        Ok(self.records.clone())
    }
}

struct FailingAdapter;

#[async_trait]
impl SourceAdapter for FailingAdapter {
    fn source_name(&self) -> &str {
        "broken"
    }

    async fn crawl(&self) -> Result<Vec<RawRecord>, AdapterError> {
        Err(AdapterError::Message("listing page changed layout".into()))
    }
}

struct SlowAdapter;

#[async_trait]
impl SourceAdapter for SlowAdapter {
    fn source_name(&self) -> &str {
        "slow"
    }

    async fn crawl(&self) -> Result<Vec<RawRecord>, AdapterError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }
}

/// Tags every record as a football match and scores it low.
struct MatchEnricher;

#[async_trait]
impl EnrichmentService for MatchEnricher {
    async fn tag(&self, _record: &RawRecord) -> TagSet {
        let mut tags = TagSet::default();
        tags.insert(TagCategory::Type, SPORT_MATCH);
        tags
    }

    async fn score(&self, _record: &RawRecord, _tags: &TagSet) -> u8 {
        20
    }

    async fn summarize(&self, record: &RawRecord) -> String {
        format!("{} ce soir", record.title)
    }
}

struct DeadHost(&'static str);

#[async_trait]
impl LivenessProbe for DeadHost {
    fn is_exempt(&self, _url: &str) -> bool {
        false
    }

    async fn probe(&self, url: &str) -> bool {
        !url.contains(self.0)
    }
}

/// Memory store that refuses lists whose rendered filter contains
/// `failing_filter`, and deletes of `failing_delete`.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing_filter: Option<&'static str>,
    failing_delete: Option<String>,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing_filter: None,
            failing_delete: None,
        }
    }

    fn unavailable(collection: &str) -> StoreError {
        StoreError::Status {
            status: 503,
            url: format!("/api/collections/{collection}/records"),
            body: "service unavailable".to_string(),
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<ListPage, StoreError> {
        if let (Some(needle), Some(filter)) = (self.failing_filter, &query.filter) {
            if filter.render().contains(needle) {
                return Err(Self::unavailable(collection));
            }
        }
        self.inner.list(collection, query).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Record, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn create(&self, collection: &str, record: Record) -> Result<Record, StoreError> {
        self.inner.create(collection, record).await
    }

    async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record, StoreError> {
        self.inner.update(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        if self.failing_delete.as_deref() == Some(id) {
            return Err(Self::unavailable(collection));
        }
        self.inner.delete(collection, id).await
    }
}

async fn seed_event(store: &MemoryStore, title: &str, start: NaiveDateTime, score: u8, url: &str) -> String {
    let record = encode(&json!({
        "title": title,
        "status": "published",
        "date_start": to_store(&start),
        "interest_score": score,
        "source_url": url,
    }))
    .unwrap();
    let created = store.create(EVENTS, record).await.unwrap();
    created["id"].as_str().unwrap().to_string()
}

fn raw(title: &str, start: NaiveDateTime, venue: &str) -> RawRecord {
    let mut record = RawRecord::new(title, start);
    record.location.name = venue.to_string();
    record.location.city = "Nice".to_string();
    record
}

fn pipeline(
    store: Arc<dyn RecordStore>,
    adapters: Vec<Box<dyn SourceAdapter>>,
    config: SyncConfig,
) -> SyncPipeline {
    SyncPipeline::new(config, store, adapters)
        .unwrap()
        .with_probe(Arc::new(AssumeAlive))
        .with_clock(Arc::new(FixedClock(now())))
}

async fn events(store: &MemoryStore) -> Vec<EventRecord> {
    store
        .snapshot(EVENTS)
        .await
        .into_iter()
        .map(|r| decode(r).unwrap())
        .collect()
}

async fn logs(store: &MemoryStore) -> Vec<CrawlLog> {
    store
        .snapshot(CRAWL_LOGS)
        .await
        .into_iter()
        .map(|r| decode(r).unwrap())
        .collect()
}

#[tokio::test]
async fn sold_out_resale_of_the_same_night_collapses_to_one_record() {
    let store = Arc::new(MemoryStore::new());
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(FixtureAdapter::new(
            "nightlife",
            workspace_root().join("fixtures/sources/nightlife.json"),
        )),
        Box::new(FixtureAdapter::new(
            "resale",
            workspace_root().join("fixtures/sources/resale.json"),
        )),
    ];
    let summary = pipeline(store.clone(), adapters, SyncConfig::default())
        .run_once()
        .await;

    assert_eq!(summary.events_found, 3);
    assert_eq!(summary.events_new, 2);
    assert_eq!(summary.failed_sources(), 0);
    assert_eq!(summary.sources[1].skipped.get(SkipReason::FuzzyDuplicate.as_str()), Some(&1));

    let stored = events(&store).await;
    let dj_nights: Vec<_> = stored
        .iter()
        .filter(|e| normalize_match_title(&e.title) == "dj night")
        .filter(|e| e.date_start.date() == NaiveDate::from_ymd_opt(2026, 6, 12).unwrap())
        .collect();
    assert_eq!(dj_nights.len(), 1);
    let dj = dj_nights[0];
    assert_eq!(dj.status.as_str(), "published");
    assert_eq!(dj.source_name, "nightlife");
    assert_eq!(dj.interest_score, 50);
    assert!(!dj.is_featured);
    assert_eq!(dj.summary, "Deep house rooftop session.");
    assert_eq!(dj.hash, palmier_core::event_hash("DJ Night", &at(6, 12, 23), "Le Shelter"));
    assert_eq!(dj.crawled_at, now());

    let logs = logs(&store).await;
    assert_eq!(logs.len(), 2);
    assert_eq!((logs[0].events_found, logs[0].events_new), (2, 2));
    assert_eq!((logs[1].events_found, logs[1].events_new), (1, 0));
    assert!(logs.iter().all(|l| l.status == CrawlStatus::Success && l.finished_at.is_some()));

    // Same listings again: every record is now an exact duplicate.
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(FixtureAdapter::new(
        "nightlife",
        workspace_root().join("fixtures/sources/nightlife.json"),
    ))];
    let again = pipeline(store.clone(), adapters, SyncConfig::default())
        .run_once()
        .await;
    assert_eq!(again.events_new, 0);
    assert_eq!(again.sources[0].skipped.get("exact_duplicate"), Some(&2));
}

#[tokio::test]
async fn purge_collapses_duplicates_written_outside_the_pipeline() {
    let store = Arc::new(MemoryStore::new());
    for (title, score) in [("DJ Night", 40), ("DJ Night (sold out)", 70), ("DJ NIGHT", 55)] {
        let record = encode(&json!({
            "title": title,
            "status": "published",
            "date_start": to_store(&at(6, 12, 23)),
            "interest_score": score,
        }))
        .unwrap();
        store.create(EVENTS, record).await.unwrap();
    }

    let summary = pipeline(store.clone(), Vec::new(), SyncConfig::default())
        .run_once()
        .await;
    assert_eq!(summary.purged, 2);
    let remaining = store.snapshot(EVENTS).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["interest_score"], 70);
}

#[tokio::test]
async fn adapter_failure_is_logged_and_the_run_continues() {
    let store = Arc::new(MemoryStore::new());
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(FailingAdapter),
        Box::new(StaticAdapter {
            name: "agenda",
            tier_scored: false,
            records: vec![raw("Stand-up au Théâtre", at(6, 20, 21), "Théâtre Lino Ventura")],
        }),
    ];
    let summary = pipeline(store.clone(), adapters, SyncConfig::default())
        .run_once()
        .await;

    assert_eq!(summary.failed_sources(), 1);
    assert_eq!(summary.events_new, 1);
    assert_eq!(summary.sources[0].error.as_deref(), Some("listing page changed layout"));

    let logs = logs(&store).await;
    assert_eq!(logs[0].source, "broken");
    assert_eq!(logs[0].status, CrawlStatus::Error);
    assert_eq!(logs[0].error_message, "listing page changed layout");
    assert_eq!(logs[1].status, CrawlStatus::Success);
}

#[tokio::test]
async fn slow_adapter_times_out() {
    let store = Arc::new(MemoryStore::new());
    let config = SyncConfig {
        crawl_timeout: Duration::from_millis(50),
        ..SyncConfig::default()
    };
    let summary = pipeline(store.clone(), vec![Box::new(SlowAdapter)], config)
        .run_once()
        .await;
    assert_eq!(summary.failed_sources(), 1);
    assert!(summary.sources[0].error.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn tier_scored_matches_ignore_the_enrichment_score() {
    let store = Arc::new(MemoryStore::new());
    let mut sold_out = raw("OGC Nice vs PSG (Ligue 1)", at(8, 20, 21), "Allianz Riviera");
    sold_out.sold_out = true;
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![
        Box::new(StaticAdapter {
            name: "ogc_nice",
            tier_scored: true,
            records: vec![sold_out, raw("OGC Nice vs Le Havre (Ligue 1)", at(8, 30, 17), "Allianz Riviera")],
        }),
        Box::new(StaticAdapter {
            name: "agenda",
            tier_scored: false,
            records: vec![raw("Monaco vs Marseille (Ligue 1)", at(9, 5, 21), "Stade Louis II")],
        }),
    ];
    pipeline(store.clone(), adapters, SyncConfig::default())
        .with_enricher(Arc::new(MatchEnricher))
        .run_once()
        .await;

    let stored = events(&store).await;
    let psg = &stored[0];
    assert_eq!(psg.interest_score, 85);
    assert!(psg.is_featured);
    assert!(psg.tags.contains(TagCategory::Exclusivity, SOLD_OUT));
    assert!(psg.sold_out);
    assert_eq!(psg.summary, "OGC Nice vs PSG (Ligue 1) ce soir");

    assert_eq!(stored[1].interest_score, 70);
    assert!(!stored[1].is_featured);
    assert_eq!(stored[2].source_name, "agenda");
    assert_eq!(stored[2].interest_score, 20);
}

#[tokio::test]
async fn filters_past_blocklisted_dead_and_capped_records() {
    let store = Arc::new(MemoryStore::new());
    let mut dead = raw("Soirée latino", at(6, 15, 22), "Le Kiosk");
    dead.source_url = "https://gone.example/latino".into();
    let mut blocked = raw("Cours de yoga", at(6, 16, 9), "Plage du Centenaire");
    blocked.description = "Session du matin".into();
    let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(StaticAdapter {
        name: "agenda",
        tier_scored: false,
        records: vec![
            raw("Hier soir", at(5, 30, 21), "Le Shelter"),
            blocked,
            dead,
            raw("Karting nocturne", at(6, 18, 20), "Kart'in Nice"),
            raw("Poker entre potes", at(6, 19, 20), "Le Cercle"),
        ],
    })];
    let config = SyncConfig {
        max_events_per_run: 1,
        ..SyncConfig::default()
    };
    let summary = pipeline(store.clone(), adapters, config)
        .with_probe(Arc::new(DeadHost("gone.example")))
        .with_blocklist(Blocklist::with_defaults(&[]).unwrap())
        .run_once()
        .await;

    let skipped = &summary.sources[0].skipped;
    assert_eq!(skipped.get("past"), Some(&1));
    assert_eq!(skipped.get("blocklisted"), Some(&1));
    assert_eq!(skipped.get("dead_link"), Some(&1));
    assert_eq!(skipped.get("capped"), Some(&1));
    assert_eq!(summary.events_new, 1);
    assert_eq!(events(&store).await[0].title, "Karting nocturne");
}

#[tokio::test]
async fn post_passes_expire_past_and_dead_records() {
    let store = Arc::new(MemoryStore::new());
    for (title, start, url) in [
        ("Past party", at(5, 20, 23), ""),
        ("Future party", at(6, 20, 23), "https://ok.example/future"),
        ("Vanished party", at(6, 21, 23), "https://gone.example/vanished"),
    ] {
        let record = encode(&json!({
            "title": title,
            "status": "published",
            "date_start": to_store(&start),
            "source_url": url,
        }))
        .unwrap();
        store.create(EVENTS, record).await.unwrap();
    }

    let summary = pipeline(store.clone(), Vec::new(), SyncConfig::default())
        .with_probe(Arc::new(DeadHost("gone.example")))
        .run_once()
        .await;
    assert_eq!((summary.expired, summary.dead_links), (1, 1));
    assert!(summary.post_pass_errors.is_empty());

    let statuses: Vec<_> = store
        .snapshot(EVENTS)
        .await
        .iter()
        .map(|r| (r["title"].as_str().unwrap().to_string(), r["status"].as_str().unwrap().to_string()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("Past party".to_string(), "expired".to_string()),
            ("Future party".to_string(), "published".to_string()),
            ("Vanished party".to_string(), "expired".to_string()),
        ]
    );
}

#[tokio::test]
async fn guarded_runs_do_not_overlap() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline(store, Vec::new(), SyncConfig::default());
    let coordinator = Arc::new(RunCoordinator::new(Arc::new(FixedClock(now()))));

    let held = coordinator.try_start().unwrap();
    assert!(run_guarded(&pipeline, &coordinator).await.is_none());
    held.finish("success");

    let summary = run_guarded(&pipeline, &coordinator).await.unwrap();
    assert_eq!(summary.adapters, 0);
    let status = coordinator.status();
    assert!(!status.is_running);
    assert_eq!(status.last_status.as_deref(), Some("success"));
}

#[tokio::test]
async fn failed_same_day_lookup_lets_the_record_through() {
    let memory = Arc::new(MemoryStore::new());
    let mut flaky = FlakyStore::new(memory.clone());
    flaky.failing_filter = Some("date_start >=");
    let store: Arc<dyn RecordStore> = Arc::new(flaky);

    let dedup = DedupEngine::new(Arc::clone(&store));
    let check = dedup.fuzzy_match("DJ Night", &at(6, 12, 23)).await;
    assert!(matches!(check, FuzzyCheck::FailedOpen(StoreError::Status { status: 503, .. })));
    assert!(!check.is_duplicate());
    assert_eq!(dedup.fail_open_count(), 1);
    assert!(!dedup.fuzzy_match_exists("DJ Night", &at(6, 12, 23)).await);
    assert_eq!(dedup.fail_open_count(), 2);

    let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(StaticAdapter {
        name: "nightlife",
        tier_scored: false,
        records: vec![raw("DJ Night", at(6, 12, 23), "Le Shelter")],
    })];
    let summary = pipeline(store, adapters, SyncConfig::default()).run_once().await;
    assert_eq!((summary.events_found, summary.events_new), (1, 1));
    assert!(summary.post_pass_errors.is_empty());
    assert_eq!(events(&memory).await[0].title, "DJ Night");
}

#[tokio::test]
async fn purge_skips_records_it_cannot_delete() {
    let memory = Arc::new(MemoryStore::new());
    let stuck = seed_event(&memory, "Jazz sur la plage", at(6, 20, 20), 10, "").await;
    seed_event(&memory, "Jazz sur la plage", at(6, 20, 21), 30, "").await;
    let keep = seed_event(&memory, "JAZZ SUR LA PLAGE", at(6, 20, 22), 90, "").await;

    let mut flaky = FlakyStore::new(memory.clone());
    flaky.failing_delete = Some(stuck.clone());
    let dedup = DedupEngine::new(Arc::new(flaky));

    assert_eq!(dedup.purge_duplicates().await.unwrap(), 1);
    let mut remaining: Vec<String> = memory
        .snapshot(EVENTS)
        .await
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect();
    remaining.sort();
    let mut expected = vec![stuck, keep];
    expected.sort();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn post_passes_run_even_when_expiry_fails() {
    let memory = Arc::new(MemoryStore::new());
    seed_event(&memory, "Past party", at(5, 20, 23), 50, "").await;
    seed_event(&memory, "Apéro Rooftop", at(6, 13, 19), 40, "").await;
    seed_event(&memory, "Apéro Rooftop", at(6, 13, 20), 60, "").await;
    seed_event(&memory, "Vanished party", at(6, 21, 23), 50, "https://gone.example/vanished").await;

    let mut flaky = FlakyStore::new(memory.clone());
    flaky.failing_filter = Some(r#"status = "published" && date_start <"#);
    let summary = pipeline(Arc::new(flaky), Vec::new(), SyncConfig::default())
        .with_probe(Arc::new(DeadHost("gone.example")))
        .run_once()
        .await;

    assert_eq!(summary.expired, 0);
    assert_eq!(summary.purged, 1);
    assert_eq!(summary.dead_links, 1);
    assert_eq!(summary.post_pass_errors.len(), 1);
    assert!(summary.post_pass_errors[0].starts_with("expire: "));

    let stored = memory.snapshot(EVENTS).await;
    assert_eq!(stored.len(), 3);
    let status_of = |title: &str| {
        stored
            .iter()
            .find(|r| r["title"] == title)
            .map(|r| r["status"].as_str().unwrap().to_string())
    };
    assert_eq!(status_of("Past party").as_deref(), Some("published"));
    assert_eq!(status_of("Vanished party").as_deref(), Some("expired"));
}
