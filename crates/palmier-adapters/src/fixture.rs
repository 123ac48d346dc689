//! Adapter replaying raw records from a JSON fixture file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use palmier_core::RawRecord;
use serde::Deserialize;

use crate::{AdapterError, SourceAdapter};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FixtureFile {
    Bundle { records: Vec<RawRecord> },
    Bare(Vec<RawRecord>),
}

/// Accepts either a bare array of records or `{"records": [...]}`.
pub async fn load_fixture_records(path: impl AsRef<Path>) -> Result<Vec<RawRecord>, AdapterError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| AdapterError::Io {
            path: path.display().to_string(),
            source,
        })?;
    let file: FixtureFile = serde_json::from_str(&text).map_err(|source| AdapterError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    Ok(match file {
        FixtureFile::Bundle { records } | FixtureFile::Bare(records) => records,
    })
}

#[derive(Debug, Clone)]
pub struct FixtureAdapter {
    source_name: String,
    path: PathBuf,
    tier_scored: bool,
}

impl FixtureAdapter {
    pub fn new(source_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            source_name: source_name.into(),
            path: path.into(),
            tier_scored: false,
        }
    }

    pub fn with_tier_scoring(mut self, tier_scored: bool) -> Self {
        self.tier_scored = tier_scored;
        self
    }
}

#[async_trait]
impl SourceAdapter for FixtureAdapter {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn tier_scored(&self) -> bool {
        self.tier_scored
    }

    async fn crawl(&self) -> Result<Vec<RawRecord>, AdapterError> {
        load_fixture_records(&self.path).await
    }
}
