//! Per-record enrichment: tags, interest score, summary.
//!
//! Enrichment never fails from the pipeline's point of view. Every service
//! answers with a value; the LLM client degrades to the fixed fallbacks on
//! any error and logs it.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use palmier_core::tags::catalog_reference;
use palmier_core::{Enrichment, RawRecord, TagSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub const FALLBACK_SCORE: u8 = 50;
pub const FALLBACK_SUMMARY_CHARS: usize = 200;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";

const TAG_MAX_TOKENS: u32 = 500;
const SCORE_MAX_TOKENS: u32 = 10;
const SUMMARY_MAX_TOKENS: u32 = 150;

#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn tag(&self, record: &RawRecord) -> TagSet;
    async fn score(&self, record: &RawRecord, tags: &TagSet) -> u8;
    async fn summarize(&self, record: &RawRecord) -> String;
}

/// Tags, then score (which sees the tags), then summary.
pub async fn enrich(service: &dyn EnrichmentService, record: &RawRecord) -> Enrichment {
    let tags = service.tag(record).await;
    let interest_score = service.score(record, &tags).await.min(100);
    let summary = service.summarize(record).await;
    Enrichment {
        tags,
        interest_score,
        summary,
    }
}

pub fn fallback_summary(description: &str) -> String {
    description.chars().take(FALLBACK_SUMMARY_CHARS).collect()
}

/// Fixed values used when no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackEnricher;

#[async_trait]
impl EnrichmentService for FallbackEnricher {
    async fn tag(&self, _record: &RawRecord) -> TagSet {
        TagSet::default()
    }

    async fn score(&self, _record: &RawRecord, _tags: &TagSet) -> u8 {
        FALLBACK_SCORE
    }

    async fn summarize(&self, record: &RawRecord) -> String {
        fallback_summary(&record.description)
    }
}

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model returned no text")]
    EmptyResponse,
    #[error("model returned malformed tags: {0}")]
    Tags(#[from] serde_json::Error),
    #[error("no score in model output `{0}`")]
    NoScore(String),
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Strip an optional Markdown code fence and validate against the catalog.
pub fn parse_tags(text: &str) -> Result<TagSet, EnrichmentError> {
    let mut body = text.trim();
    if body.contains("```") {
        body = body.split("```").nth(1).unwrap_or_default();
        body = body.strip_prefix("json").unwrap_or(body).trim();
    }
    let object: serde_json::Map<String, Value> = serde_json::from_str(body)?;
    Ok(TagSet::validated(object.into_iter().map(|(category, codes)| {
        let codes: Vec<String> = codes
            .as_array()
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        (category, codes)
    })))
}

/// Every digit of the reply joined, the first three kept, clamped to 0..=100.
/// "Score: 72/100" reads as 721 and clamps to 100.
pub fn parse_score(text: &str) -> Result<u8, EnrichmentError> {
    let digits: String = text.chars().filter(char::is_ascii_digit).take(3).collect();
    let value: u16 = digits
        .parse()
        .map_err(|_| EnrichmentError::NoScore(text.trim().to_string()))?;
    Ok(value.min(100) as u8)
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.trim().is_empty() {
        placeholder
    } else {
        value
    }
}

fn event_block(record: &RawRecord) -> String {
    format!(
        "- Title: {}\n- Description: {}\n- Date: {}\n- Venue: {}, {}\n- Price: {}",
        record.title,
        or_placeholder(&record.description, "not available"),
        record.date_start.format("%Y-%m-%d %H:%M"),
        or_placeholder(&record.location.name, "not specified"),
        or_placeholder(&record.location.city, "Nice"),
        record.price_info(),
    )
}

pub fn tag_prompt(record: &RawRecord) -> String {
    format!(
        "You categorize events in Nice and on the French Riviera.\n\n\
         Event:\n{}\n\n\
         Available tag categories and their codes:\n{}\n\n\
         Budget tags: only use \"free\" when the title or description says the event is free. \
         When the price is \"unknown\", do not use \"free\".\n\n\
         Reply with ONLY a JSON object. Each key is a category, each value a list of codes \
         (at most 5 per category, only the relevant ones), for example \
         {{\"type\": [\"party\", \"dj_set\"], \"energy\": [\"high\"], \"exclusivity\": []}}.",
        event_block(record),
        catalog_reference(),
    )
}

pub fn score_prompt(record: &RawRecord, tags: &TagSet) -> String {
    let codes = tags.all_codes();
    let tag_line = if codes.is_empty() {
        "none".to_string()
    } else {
        codes.join(", ")
    };
    format!(
        "Rate how interesting this event is for a 25-year-old young professional living in Nice.\n\n\
         Loves (80-100): electro nights, DJ sets, music festivals, rooftops and cocktail bars, \
         Monaco GP, Formula E and motorsport, football matches (Ligue 1, Champions League), \
         poker nights, jet-ski and water sports, karting, cheap flights from Nice, dinner-party \
         restaurants, exclusive or limited events, stand-up comedy, street food markets.\n\
         Likes (60-79): date-night restaurants, climbing and bouldering, paintball, treetop \
         adventure, quad and other fun outdoor activities, padel, Christmas markets in season.\n\
         Neutral (40-59): afterworks, local markets, jazz concerts, creative workshops, classical \
         exhibitions, opera and classical music, popular science talks.\n\
         Low (25-39): hiking and trail running, film archive screenings.\n\
         Dislikes (0-20): contemporary art, contemporary theatre, yoga, wellness and meditation, \
         societal conferences, local heritage talks, senior activities, wedding and baby fairs, \
         jumble sales, hard techno, hardstyle and gabber, parenting workshops, school open days, \
         political demonstrations, charity events with no fun angle.\n\
         Bonus: exclusive or limited +10, good value or free +5, today or last minute +5.\n\n\
         Event:\n{}\n- Tags: {}\n\n\
         Reply with ONLY an integer between 0 and 100.",
        event_block(record),
        tag_line,
    )
}

pub fn summary_prompt(record: &RawRecord) -> String {
    format!(
        "Summarize this event in 2-3 short, catchy sentences, the way you would tell a \
         25-year-old friend about it. Be concise and make them want to go. Write in French.\n\n\
         Event:\n{}\n\n\
         Reply with ONLY the summary, no quotes and no preamble.",
        event_block(record),
    )
}

/// Messages API client for the three enrichment prompts.
#[derive(Debug, Clone)]
pub struct AnthropicEnricher {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl AnthropicEnricher {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building enrichment client")?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: ANTHROPIC_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, EnrichmentError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens,
            messages: vec![WireMessage {
                role: "user",
                content: prompt,
            }],
        };
        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichmentError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let reply: MessagesResponse = response.json().await?;
        reply
            .content
            .into_iter()
            .find_map(|block| match block {
                ResponseBlock::Text { text } => Some(text.trim().to_string()),
                ResponseBlock::Other => None,
            })
            .filter(|text| !text.is_empty())
            .ok_or(EnrichmentError::EmptyResponse)
    }
}

#[async_trait]
impl EnrichmentService for AnthropicEnricher {
    async fn tag(&self, record: &RawRecord) -> TagSet {
        let result = match self.complete(&tag_prompt(record), TAG_MAX_TOKENS).await {
            Ok(text) => parse_tags(&text),
            Err(err) => Err(err),
        };
        result.unwrap_or_else(|err| {
            warn!(title = %record.title, error = %err, "tagging failed, using empty tags");
            TagSet::default()
        })
    }

    async fn score(&self, record: &RawRecord, tags: &TagSet) -> u8 {
        let result = match self.complete(&score_prompt(record, tags), SCORE_MAX_TOKENS).await {
            Ok(text) => parse_score(&text),
            Err(err) => Err(err),
        };
        result.unwrap_or_else(|err| {
            warn!(title = %record.title, error = %err, "scoring failed, using fallback score");
            FALLBACK_SCORE
        })
    }

    async fn summarize(&self, record: &RawRecord) -> String {
        match self.complete(&summary_prompt(record), SUMMARY_MAX_TOKENS).await {
            Ok(text) => text,
            Err(err) => {
                warn!(title = %record.title, error = %err, "summary failed, using description");
                fallback_summary(&record.description)
            }
        }
    }
}
