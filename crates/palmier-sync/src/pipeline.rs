use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use metrics::counter;
use palmier_adapters::SourceAdapter;
use palmier_core::tags::SOLD_OUT;
use palmier_core::{CrawlLog, CrawlStatus, EventRecord, RawRecord, TagCategory};
use palmier_storage::{
    encode, record_id, HttpLivenessProbe, LivenessProbe, PocketBaseStore, RecordStore, StoreError,
    CRAWL_LOGS, EVENTS,
};
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::blocklist::Blocklist;
use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::dedup::DedupEngine;
use crate::enrich::{enrich, AnthropicEnricher, EnrichmentService, FallbackEnricher};
use crate::lifecycle::LifecycleManager;
use crate::metrics::{ensure_metrics_described, ADAPTER_ERRORS, RECORDS_NEW, RECORDS_SKIPPED};
use crate::registry::SourceRegistry;
use crate::tiers;

const ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a raw record was not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SkipReason {
    Past,
    ExactDuplicate,
    FuzzyDuplicate,
    Blocklisted,
    DeadLink,
    PersistFailed,
    Capped,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Past => "past",
            Self::ExactDuplicate => "exact_duplicate",
            Self::FuzzyDuplicate => "fuzzy_duplicate",
            Self::Blocklisted => "blocklisted",
            Self::DeadLink => "dead_link",
            Self::PersistFailed => "persist_failed",
            Self::Capped => "capped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: CrawlStatus,
    pub events_found: usize,
    pub events_new: usize,
    pub error: Option<String>,
    pub skipped: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: NaiveDateTime,
    pub finished_at: NaiveDateTime,
    pub adapters: usize,
    pub events_found: usize,
    pub events_new: usize,
    pub sources: Vec<SourceOutcome>,
    pub expired: usize,
    pub purged: usize,
    pub dead_links: usize,
    pub post_pass_errors: Vec<String>,
}

impl SyncRunSummary {
    pub fn failed_sources(&self) -> usize {
        self.sources
            .iter()
            .filter(|s| s.status == CrawlStatus::Error)
            .count()
    }
}

pub struct SyncPipeline {
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    adapters: Vec<Box<dyn SourceAdapter>>,
    enricher: Arc<dyn EnrichmentService>,
    probe: Arc<dyn LivenessProbe>,
    clock: Arc<dyn Clock>,
    blocklist: Blocklist,
    dedup: DedupEngine,
    lifecycle: LifecycleManager,
}

impl SyncPipeline {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn RecordStore>,
        adapters: Vec<Box<dyn SourceAdapter>>,
    ) -> Result<Self> {
        ensure_metrics_described();
        let blocklist =
            Blocklist::with_defaults(&config.blocklist_extra).context("compiling blocklist")?;
        let probe = HttpLivenessProbe::new(&config.user_agent)?;
        Ok(Self {
            dedup: DedupEngine::new(Arc::clone(&store)),
            lifecycle: LifecycleManager::new(Arc::clone(&store)),
            config,
            store,
            adapters,
            enricher: Arc::new(FallbackEnricher),
            probe: Arc::new(probe),
            clock: Arc::new(SystemClock),
            blocklist,
        })
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn EnrichmentService>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_blocklist(mut self, blocklist: Blocklist) -> Self {
        self.blocklist = blocklist;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Crawl every adapter in order, then run the cleanup passes. Nothing in
    /// here aborts the run; failures end up in crawl logs and the summary.
    pub async fn run_once(&self) -> SyncRunSummary {
        let started_at = self.clock.now();
        let run_id = Uuid::new_v4();
        info!(%run_id, adapters = self.adapters.len(), "sync run started");

        let mut sources = Vec::with_capacity(self.adapters.len());
        let mut persisted = 0usize;
        for adapter in &self.adapters {
            let span = info_span!("crawl_source", source = adapter.source_name());
            let outcome = self
                .crawl_source(adapter.as_ref(), &mut persisted)
                .instrument(span)
                .await;
            sources.push(outcome);
        }

        let mut post_pass_errors = Vec::new();
        let expired = self
            .expire_past()
            .await
            .unwrap_or_else(|err| post_pass_failed(&mut post_pass_errors, "expire", err));
        let purged = self
            .purge_duplicates()
            .await
            .unwrap_or_else(|err| post_pass_failed(&mut post_pass_errors, "dedup", err));
        let dead_links = self
            .check_urls()
            .await
            .unwrap_or_else(|err| post_pass_failed(&mut post_pass_errors, "check_urls", err));

        let summary = SyncRunSummary {
            run_id,
            started_at,
            finished_at: self.clock.now(),
            adapters: self.adapters.len(),
            events_found: sources.iter().map(|s| s.events_found).sum(),
            events_new: persisted,
            sources,
            expired,
            purged,
            dead_links,
            post_pass_errors,
        };
        info!(
            %run_id,
            found = summary.events_found,
            new = summary.events_new,
            failed_sources = summary.failed_sources(),
            expired,
            purged,
            dead_links,
            "sync run finished"
        );
        summary
    }

    async fn crawl_source(&self, adapter: &dyn SourceAdapter, persisted: &mut usize) -> SourceOutcome {
        let source = adapter.source_name().to_string();
        let mut log = CrawlLog::started(&source, self.clock.now());
        let mut outcome = SourceOutcome {
            source: source.clone(),
            status: CrawlStatus::Success,
            events_found: 0,
            events_new: 0,
            error: None,
            skipped: BTreeMap::new(),
        };

        let crawled = match tokio::time::timeout(self.config.crawl_timeout, adapter.crawl()).await {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "crawl timed out after {}s",
                self.config.crawl_timeout.as_secs()
            )),
        };

        match crawled {
            Ok(records) => {
                outcome.events_found = records.len();
                for raw in records {
                    match self.ingest(adapter, raw, *persisted).await {
                        Ok(id) => {
                            debug!(event_id = %id, "record persisted");
                            *persisted += 1;
                            outcome.events_new += 1;
                        }
                        Err(reason) => {
                            counter!(RECORDS_SKIPPED, "reason" => reason.as_str()).increment(1);
                            *outcome.skipped.entry(reason.as_str()).or_default() += 1;
                        }
                    }
                }
                counter!(RECORDS_NEW, "source" => source.clone()).increment(outcome.events_new as u64);
                info!(found = outcome.events_found, new = outcome.events_new, skipped = ?outcome.skipped, "source crawled");
            }
            Err(message) => {
                counter!(ADAPTER_ERRORS, "source" => source.clone()).increment(1);
                warn!(error = %message, "source crawl failed");
                outcome.status = CrawlStatus::Error;
                outcome.error = Some(message.clone());
                log.fail(message);
            }
        }

        log.finished_at = Some(self.clock.now());
        log.events_found = outcome.events_found as u32;
        log.events_new = outcome.events_new as u32;
        if let Err(err) = self.write_log(&log).await {
            warn!(error = %err, "failed to write crawl log");
        }
        outcome
    }

    async fn write_log(&self, log: &CrawlLog) -> Result<(), StoreError> {
        self.store.create(CRAWL_LOGS, encode(log)?).await?;
        Ok(())
    }

    /// Filter, enrich and persist one raw record. Returns the new record id.
    async fn ingest(
        &self,
        adapter: &dyn SourceAdapter,
        raw: RawRecord,
        persisted_so_far: usize,
    ) -> Result<String, SkipReason> {
        if persisted_so_far >= self.config.max_events_per_run {
            return Err(SkipReason::Capped);
        }
        let now = self.clock.now();
        if raw.date_start < now {
            return Err(SkipReason::Past);
        }

        match self
            .dedup
            .exactly_exists(&raw.title, &raw.date_start, &raw.location.name)
            .await
        {
            Ok(true) => return Err(SkipReason::ExactDuplicate),
            Ok(false) => {}
            Err(err) => warn!(title = %raw.title, error = %err, "hash lookup failed, continuing"),
        }
        if self.dedup.fuzzy_match_exists(&raw.title, &raw.date_start).await {
            return Err(SkipReason::FuzzyDuplicate);
        }
        if let Some(rule) = self.blocklist.matching_rule(&raw.combined_text()) {
            debug!(title = %raw.title, rule, "blocklisted");
            return Err(SkipReason::Blocklisted);
        }
        if !self.probe.is_alive(&raw.source_url).await {
            debug!(title = %raw.title, url = %raw.source_url, "source link unreachable");
            return Err(SkipReason::DeadLink);
        }

        let mut enrichment = enrich(self.enricher.as_ref(), &raw).await;
        if adapter.tier_scored() && enrichment.tags.is_sport_match() {
            enrichment.interest_score = tiers::match_score(&raw.title);
        }
        if raw.sold_out {
            enrichment.tags.insert(TagCategory::Exclusivity, SOLD_OUT);
        }

        let record = EventRecord::from_raw(raw, adapter.source_name(), enrichment, now);
        let created = match encode(&record) {
            Ok(body) => self.store.create(EVENTS, body).await,
            Err(err) => Err(err),
        };
        match created {
            Ok(stored) => Ok(record_id(&stored).unwrap_or_default().to_string()),
            Err(err) => {
                warn!(title = %record.title, error = %err, "failed to persist record");
                Err(SkipReason::PersistFailed)
            }
        }
    }

    pub async fn expire_past(&self) -> Result<usize, StoreError> {
        self.lifecycle.expire_past(self.clock.now()).await
    }

    pub async fn purge_duplicates(&self) -> Result<usize, StoreError> {
        self.dedup.purge_duplicates().await
    }

    pub async fn check_urls(&self) -> Result<usize, StoreError> {
        self.lifecycle.expire_dead_links(self.probe.as_ref()).await
    }

    /// Recompute match scores for the tier-scored sources among the adapters.
    pub async fn recalibrate(&self) -> Result<usize, StoreError> {
        let sources: Vec<String> = self
            .adapters
            .iter()
            .filter(|a| a.tier_scored())
            .map(|a| a.source_name().to_string())
            .collect();
        tiers::recalibrate(&self.store, &sources).await
    }
}

fn post_pass_failed(errors: &mut Vec<String>, pass: &str, err: StoreError) -> usize {
    warn!(pass, error = %err, "post-pass failed");
    errors.push(format!("{pass}: {err}"));
    0
}

/// PocketBase store from configuration. An auth failure is logged and the
/// client continues unauthenticated.
pub async fn connect_store(config: &SyncConfig) -> Result<Arc<dyn RecordStore>> {
    let store = PocketBaseStore::new(config.pocketbase.clone())?;
    if !store.authenticate().await {
        warn!(url = %config.pocketbase.base_url, "record store authentication failed, continuing without token");
    }
    Ok(Arc::new(store))
}

/// Assemble the pipeline from `sources.yaml` and the configured services.
pub async fn pipeline_from_config(
    config: SyncConfig,
    store: Arc<dyn RecordStore>,
    probe: Arc<dyn LivenessProbe>,
) -> Result<SyncPipeline> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = SourceRegistry::load(&config.sources_file)
        .await
        .context("loading source registry")?;
    let adapters = registry
        .build_adapters(&config, Arc::clone(&store), Arc::clone(&clock))
        .await?;
    let enricher: Arc<dyn EnrichmentService> = match &config.anthropic_api_key {
        Some(key) => {
            let mut enricher = AnthropicEnricher::new(key.as_str(), ENRICHMENT_TIMEOUT)?;
            if let Some(model) = &config.anthropic_model {
                enricher = enricher.with_model(model);
            }
            Arc::new(enricher)
        }
        None => {
            info!("no model API key configured, using fallback enrichment");
            Arc::new(FallbackEnricher)
        }
    };
    Ok(SyncPipeline::new(config, store, adapters)?
        .with_enricher(enricher)
        .with_probe(probe)
        .with_clock(clock))
}
