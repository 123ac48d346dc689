//! Source adapter contract plus the generic listing adapters.

pub mod fixture;
pub mod jsonld;

use async_trait::async_trait;
use palmier_core::RawRecord;
use palmier_storage::FetchError;
use thiserror::Error;

pub use fixture::{load_fixture_records, FixtureAdapter};
pub use jsonld::{parse_listing_html, JsonLdAdapter};

pub const CRATE_NAME: &str = "palmier-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// One pluggable event source. Extraction is the adapter's business; the
/// pipeline only sees normalized raw records.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_name(&self) -> &str;

    /// Sports fixtures from this source get their score from the opponent tier table.
    fn tier_scored(&self) -> bool {
        false
    }

    async fn crawl(&self) -> Result<Vec<RawRecord>, AdapterError>;
}

pub(crate) fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
