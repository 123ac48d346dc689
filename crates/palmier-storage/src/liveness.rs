//! Source-link liveness probe.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// URL fragments never probed: dynamically priced flight listings and
/// official club sites whose match pages appear late.
pub const DEFAULT_EXEMPTIONS: &[&str] = &["google.com/travel", "asmonaco.com", "ogcnice.com"];

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    fn is_exempt(&self, url: &str) -> bool;

    /// Raw reachability check, no exemptions applied.
    async fn probe(&self, url: &str) -> bool;

    /// Empty and exempt URLs count as alive.
    async fn is_alive(&self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() || self.is_exempt(url) {
            return true;
        }
        self.probe(url).await
    }
}

#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    client: reqwest::Client,
    exemptions: Vec<String>,
}

impl HttpLivenessProbe {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .context("building liveness client")?;
        Ok(Self {
            client,
            exemptions: DEFAULT_EXEMPTIONS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn with_exemptions(mut self, exemptions: Vec<String>) -> Self {
        self.exemptions = exemptions;
        self
    }
}

/// HEAD verdict: alive below 400 or on 429; `None` asks for a GET retry (405).
pub fn head_verdict(status: StatusCode) -> Option<bool> {
    if status.as_u16() < 400 || status == StatusCode::TOO_MANY_REQUESTS {
        Some(true)
    } else if status == StatusCode::METHOD_NOT_ALLOWED {
        None
    } else {
        Some(false)
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    fn is_exempt(&self, url: &str) -> bool {
        self.exemptions.iter().any(|pattern| url.contains(pattern.as_str()))
    }

    async fn probe(&self, url: &str) -> bool {
        let head = match self.client.head(url).send().await {
            Ok(resp) => resp.status(),
            Err(err) => {
                debug!(url, error = %err, "liveness HEAD failed");
                return false;
            }
        };
        if let Some(alive) = head_verdict(head) {
            return alive;
        }
        match self.client.get(url).send().await {
            Ok(resp) => resp.status().as_u16() < 400,
            Err(err) => {
                debug!(url, error = %err, "liveness GET failed");
                false
            }
        }
    }
}

/// Probe that reports every link alive; for dry runs and offline fixtures.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeAlive;

#[async_trait]
impl LivenessProbe for AssumeAlive {
    fn is_exempt(&self, _url: &str) -> bool {
        true
    }

    async fn probe(&self, _url: &str) -> bool {
        true
    }
}
