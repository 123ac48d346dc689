use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use palmier_storage::PocketBaseConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid blocklist pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("source `{0}`: {1}")]
    Source(String, String),
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub pocketbase: PocketBaseConfig,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: Option<String>,
    pub schedule_hour: u32,
    pub scheduler_enabled: bool,
    pub crawl_timeout: Duration,
    pub max_events_per_run: usize,
    pub deal_threshold_percent: f64,
    pub deal_min_history: usize,
    pub flight_crawl_enabled: bool,
    pub user_agent: String,
    pub sources_file: PathBuf,
    pub blocklist_extra: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pocketbase: PocketBaseConfig::default(),
            anthropic_api_key: None,
            anthropic_model: None,
            schedule_hour: 7,
            scheduler_enabled: false,
            crawl_timeout: Duration::from_secs(300),
            max_events_per_run: 200,
            deal_threshold_percent: 30.0,
            deal_min_history: 7,
            flight_crawl_enabled: true,
            user_agent: "palmier-bot/0.1".to_string(),
            sources_file: PathBuf::from("sources.yaml"),
            blocklist_extra: Vec::new(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| parse_flag(&v).unwrap_or(default))
        .unwrap_or(default)
}

pub(crate) fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub(crate) fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

impl SyncConfig {
    /// Read configuration from the environment. Malformed values fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let schedule_hour = env_parse("CRAWL_SCHEDULE_HOUR", defaults.schedule_hour);
        Self {
            pocketbase: PocketBaseConfig::from_env(),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            anthropic_model: std::env::var("ANTHROPIC_MODEL")
                .ok()
                .filter(|m| !m.trim().is_empty()),
            schedule_hour: if schedule_hour < 24 {
                schedule_hour
            } else {
                defaults.schedule_hour
            },
            scheduler_enabled: env_flag("PALMIER_SCHEDULER_ENABLED", defaults.scheduler_enabled),
            crawl_timeout: Duration::from_secs(env_parse(
                "CRAWL_TIMEOUT_SECONDS",
                defaults.crawl_timeout.as_secs(),
            )),
            max_events_per_run: env_parse("MAX_EVENTS_PER_CRAWL", defaults.max_events_per_run),
            deal_threshold_percent: env_parse(
                "FLIGHT_DEAL_THRESHOLD_PERCENT",
                defaults.deal_threshold_percent,
            ),
            deal_min_history: env_parse("FLIGHT_DEAL_MIN_HISTORY_DAYS", defaults.deal_min_history),
            flight_crawl_enabled: env_flag("FLIGHT_CRAWL_ENABLED", defaults.flight_crawl_enabled),
            user_agent: std::env::var("PALMIER_USER_AGENT").unwrap_or(defaults.user_agent),
            sources_file: std::env::var("PALMIER_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sources_file),
            blocklist_extra: std::env::var("PALMIER_BLOCKLIST_EXTRA")
                .map(|raw| split_patterns(&raw))
                .unwrap_or_default(),
        }
    }

    /// Six-field cron expression for the daily run.
    pub fn daily_cron(&self) -> String {
        format!("0 0 {} * * *", self.schedule_hour)
    }
}
