//! `sources.yaml`: which adapters run, and how each is built.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use palmier_adapters::{FixtureAdapter, JsonLdAdapter, SourceAdapter};
use palmier_storage::{HttpClientConfig, HttpFetcher, RecordStore};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

use crate::clock::Clock;
use crate::config::{ConfigError, SyncConfig};
use crate::flights::{FixtureQuoteSource, FlightDealsAdapter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    JsonLd,
    Fixture,
    FlightDeals,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_name: String,
    pub kind: SourceKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub tier_scored: bool,
    #[serde(default)]
    pub listing_urls: Vec<String>,
    /// Records for `fixture`, quotes for `flight_deals`. Relative to the registry file.
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl SourceRegistry {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).await.map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_yaml(&text, &path.display().to_string(), base_dir)
    }

    pub fn from_yaml(text: &str, origin: &str, base_dir: PathBuf) -> Result<Self, ConfigError> {
        let mut registry: Self = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: origin.to_string(),
            source,
        })?;
        registry.base_dir = base_dir;
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            let name = source.source_name.trim();
            if name.is_empty() {
                return Err(ConfigError::Source(String::new(), "empty source_name".into()));
            }
            if !seen.insert(name) {
                return Err(ConfigError::Source(name.into(), "listed twice".into()));
            }
            match source.kind {
                SourceKind::JsonLd if source.listing_urls.is_empty() => {
                    return Err(ConfigError::Source(name.into(), "json_ld needs listing_urls".into()));
                }
                SourceKind::Fixture | SourceKind::FlightDeals if source.fixture_path.is_none() => {
                    return Err(ConfigError::Source(name.into(), "fixture_path is required".into()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Enabled sources whose matches are scored from the opponent table.
    pub fn tier_scored_sources(&self) -> Vec<String> {
        self.enabled()
            .filter(|s| s.tier_scored)
            .map(|s| s.source_name.clone())
            .collect()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Build one adapter per enabled source, in file order.
    pub async fn build_adapters(
        &self,
        config: &SyncConfig,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Vec<Box<dyn SourceAdapter>>> {
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig {
            user_agent: config.user_agent.clone(),
            ..Default::default()
        })?);

        let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
        for source in self.enabled() {
            let fixture = source.fixture_path.as_deref().map(|p| self.resolve(p));
            let adapter: Box<dyn SourceAdapter> = match (source.kind, fixture) {
                (SourceKind::JsonLd, _) => Box::new(
                    JsonLdAdapter::new(&source.source_name, source.listing_urls.clone(), Arc::clone(&fetcher))
                        .with_tier_scoring(source.tier_scored),
                ),
                (SourceKind::Fixture, Some(path)) => Box::new(
                    FixtureAdapter::new(&source.source_name, path).with_tier_scoring(source.tier_scored),
                ),
                (SourceKind::FlightDeals, Some(path)) => {
                    let quotes = FixtureQuoteSource::from_file(&path)
                        .await
                        .with_context(|| format!("loading quotes for {}", source.source_name))?;
                    Box::new(
                        FlightDealsAdapter::new(
                            Arc::new(quotes),
                            Arc::clone(&store),
                            Arc::clone(&clock),
                            config.deal_threshold_percent,
                            config.deal_min_history,
                        )
                        .with_enabled(config.flight_crawl_enabled),
                    )
                }
                (kind, None) => anyhow::bail!("source {} ({kind:?}) has no fixture_path", source.source_name),
            };
            info!(source = %source.source_name, kind = ?source.kind, "adapter registered");
            adapters.push(adapter);
        }
        Ok(adapters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use palmier_storage::MemoryStore;

    const YAML: &str = r#"
sources:
  - source_name: nice_agenda
    kind: json_ld
    listing_urls: ["https://agenda.example/nice"]
  - source_name: ogc_nice
    kind: fixture
    tier_scored: true
    fixture_path: fixtures/ogc.json
  - source_name: archived
    kind: fixture
    enabled: false
    tier_scored: true
    fixture_path: fixtures/old.json
"#;

    #[test]
    fn parses_and_filters_enabled_sources() {
        let registry = SourceRegistry::from_yaml(YAML, "inline", PathBuf::from("/srv")).unwrap();
        assert_eq!(registry.sources.len(), 3);
        let enabled: Vec<_> = registry.enabled().map(|s| s.source_name.as_str()).collect();
        assert_eq!(enabled, vec!["nice_agenda", "ogc_nice"]);
        assert_eq!(registry.tier_scored_sources(), vec!["ogc_nice".to_string()]);
        assert_eq!(
            registry.resolve(Path::new("fixtures/ogc.json")),
            PathBuf::from("/srv/fixtures/ogc.json")
        );
    }

    #[test]
    fn rejects_incomplete_sources() {
        let missing_urls = "sources:\n  - source_name: a\n    kind: json_ld\n";
        assert!(matches!(
            SourceRegistry::from_yaml(missing_urls, "inline", PathBuf::new()),
            Err(ConfigError::Source(name, _)) if name == "a"
        ));
        let twice = "sources:\n  - {source_name: a, kind: fixture, fixture_path: a.json}\n  - {source_name: a, kind: fixture, fixture_path: b.json}\n";
        assert!(SourceRegistry::from_yaml(twice, "inline", PathBuf::new()).is_err());
        assert!(matches!(
            SourceRegistry::from_yaml("sources:\n  - kind: bogus\n", "inline", PathBuf::new()),
            Err(ConfigError::Yaml { .. })
        ));
    }

    #[tokio::test]
    async fn builds_adapters_in_file_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("quotes.json"), r#"{"NCE-BCN": [{"price": 80}]}"#).unwrap();
        let path = dir.path().join("sources.yaml");
        std::fs::write(
            &path,
            "sources:\n  - {source_name: ogc_nice, kind: fixture, tier_scored: true, fixture_path: ogc.json}\n  - {source_name: flight_deals, kind: flight_deals, fixture_path: quotes.json}\n",
        )
        .unwrap();

        let registry = SourceRegistry::load(&path).await.unwrap();
        let adapters = registry
            .build_adapters(&SyncConfig::default(), Arc::new(MemoryStore::new()), Arc::new(SystemClock))
            .await
            .unwrap();
        let names: Vec<_> = adapters.iter().map(|a| a.source_name()).collect();
        assert_eq!(names, vec!["ogc_nice", "flight_deals"]);
        assert!(adapters[0].tier_scored());
        assert!(!adapters[1].tier_scored());
    }
}
