//! Ingestion core: orchestrates source adapters, deduplication, enrichment,
//! flight-deal detection and record lifecycle against a record store.

pub mod blocklist;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dedup;
pub mod enrich;
pub mod flights;
pub mod lifecycle;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod scheduler;
pub mod tiers;

pub use blocklist::Blocklist;
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use coordinator::{RunCoordinator, RunGuard, RunStatus};
pub use dedup::{DedupEngine, FuzzyCheck};
pub use enrich::{AnthropicEnricher, EnrichmentError, EnrichmentService, FallbackEnricher};
pub use flights::{DealVerdict, FlightDealsAdapter, FlightQuote, FlightQuoteSource, PriceHistory};
pub use lifecycle::LifecycleManager;
pub use pipeline::{
    connect_store, pipeline_from_config, SkipReason, SourceOutcome, SyncPipeline,
    SyncRunSummary,
};
pub use registry::{SourceConfig, SourceKind, SourceRegistry};
pub use scheduler::{maybe_build_scheduler, run_guarded, run_status};

pub const CRATE_NAME: &str = "palmier-sync";
