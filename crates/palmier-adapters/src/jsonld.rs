//! Listing adapter for pages that publish `schema.org/Event` JSON-LD blocks.

use std::sync::Arc;

use async_trait::async_trait;
use palmier_core::{datetime, Location, RawRecord, PRICE_UNKNOWN};
use palmier_storage::HttpFetcher;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{text_or_none, AdapterError, SourceAdapter};

pub struct JsonLdAdapter {
    source_name: String,
    listing_urls: Vec<String>,
    tier_scored: bool,
    fetcher: Arc<HttpFetcher>,
}

impl JsonLdAdapter {
    pub fn new(source_name: impl Into<String>, listing_urls: Vec<String>, fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            source_name: source_name.into(),
            listing_urls,
            tier_scored: false,
            fetcher,
        }
    }

    pub fn with_tier_scoring(mut self, tier_scored: bool) -> Self {
        self.tier_scored = tier_scored;
        self
    }
}

#[async_trait]
impl SourceAdapter for JsonLdAdapter {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn tier_scored(&self) -> bool {
        self.tier_scored
    }

    async fn crawl(&self) -> Result<Vec<RawRecord>, AdapterError> {
        let mut records = Vec::new();
        let mut last_error = None;
        let mut pages_ok = 0usize;

        for url in &self.listing_urls {
            match self.fetcher.fetch_text(&self.source_name, url).await {
                Ok(page) => {
                    let parsed = parse_listing_html(&page.body)?;
                    debug!(source = %self.source_name, url = %url, events = parsed.len(), "parsed listing page");
                    records.extend(parsed);
                    pages_ok += 1;
                }
                Err(err) => {
                    warn!(source = %self.source_name, url = %url, error = %err, "listing page fetch failed");
                    last_error = Some(err);
                }
            }
        }

        if pages_ok == 0 {
            if let Some(err) = last_error {
                return Err(err.into());
            }
        }
        info!(source = %self.source_name, events = records.len(), "listing crawl complete");
        Ok(records)
    }
}

/// Extract every event from the JSON-LD blocks of an HTML page. Blocks that
/// are not valid JSON and nodes lacking a name or start date are skipped, as
/// are cancelled events.
pub fn parse_listing_html(html: &str) -> Result<Vec<RawRecord>, AdapterError> {
    let document = Html::parse_document(html);
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#)
        .map_err(|e| AdapterError::Message(e.to_string()))?;

    let mut records = Vec::new();
    for script in document.select(&selector) {
        let text = script.text().collect::<String>();
        let value: Value = match serde_json::from_str(text.trim()) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "skipping unparsable JSON-LD block");
                continue;
            }
        };
        let mut nodes = Vec::new();
        collect_event_nodes(&value, &mut nodes);
        records.extend(nodes.into_iter().filter_map(event_from_node));
    }
    Ok(records)
}

fn collect_event_nodes<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_event_nodes(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_event_nodes(graph, out);
            }
            if is_event_type(map.get("@type")) {
                out.push(value);
            } else if let Some(Value::Array(entries)) = map.get("itemListElement") {
                for entry in entries {
                    collect_event_nodes(entry.get("item").unwrap_or(entry), out);
                }
            }
        }
        _ => {}
    }
}

// Event, MusicEvent, SportsEvent, TheaterEvent ...
fn is_event_type(kind: Option<&Value>) -> bool {
    match kind {
        Some(Value::String(s)) => s.ends_with("Event"),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .any(|k| k.as_str().is_some_and(|s| s.ends_with("Event"))),
        _ => false,
    }
}

fn first(value: &Value) -> &Value {
    match value {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    }
}

fn json_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn json_num(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

fn clean_text(raw: &str) -> String {
    let decoded = if raw.contains('<') {
        Html::parse_fragment(raw)
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        html_escape::decode_html_entities(raw).to_string()
    };
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn event_from_node(node: &Value) -> Option<RawRecord> {
    if json_str(node, "eventStatus").is_some_and(|s| s.contains("EventCancelled")) {
        return None;
    }
    let title = text_or_none(&clean_text(json_str(node, "name")?))?;
    let date_start = datetime::parse(json_str(node, "startDate")?)?;

    let mut record = RawRecord::new(title, date_start);
    record.description = json_str(node, "description").map(clean_text).unwrap_or_default();
    record.date_end = json_str(node, "endDate").and_then(datetime::parse);
    record.location = node.get("location").map(|l| location(first(l))).unwrap_or_default();
    record.source_url = json_str(node, "url").unwrap_or_default().trim().to_string();
    record.image_url = node.get("image").map(image_url).unwrap_or_default();
    apply_offers(node, &mut record);
    Some(record)
}

fn location(value: &Value) -> Location {
    match value {
        Value::String(name) => Location {
            name: clean_text(name),
            ..Location::default()
        },
        Value::Object(_) => {
            let address = value.get("address").map(first);
            let (street, city) = match address {
                Some(Value::String(s)) => (clean_text(s), String::new()),
                Some(addr @ Value::Object(_)) => (
                    json_str(addr, "streetAddress").map(clean_text).unwrap_or_default(),
                    json_str(addr, "addressLocality").map(clean_text).unwrap_or_default(),
                ),
                _ => (String::new(), String::new()),
            };
            let geo = value.get("geo");
            Location {
                name: json_str(value, "name").map(clean_text).unwrap_or_default(),
                city,
                address: street,
                latitude: geo.and_then(|g| json_num(g.get("latitude"))),
                longitude: geo.and_then(|g| json_num(g.get("longitude"))),
            }
        }
        _ => Location::default(),
    }
}

fn image_url(value: &Value) -> String {
    match first(value) {
        Value::String(url) => url.trim().to_string(),
        obj @ Value::Object(_) => json_str(obj, "url").unwrap_or_default().trim().to_string(),
        _ => String::new(),
    }
}

fn apply_offers(node: &Value, record: &mut RawRecord) {
    let offers: Vec<&Value> = match node.get("offers") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(offer @ Value::Object(_)) => vec![offer],
        _ => Vec::new(),
    };

    let mut low: Option<f64> = None;
    let mut high: Option<f64> = None;
    for offer in &offers {
        let offer_low = json_num(offer.get("lowPrice")).or_else(|| json_num(offer.get("price")));
        let offer_high = json_num(offer.get("highPrice")).or(offer_low);
        if let Some(p) = offer_low {
            low = Some(low.map_or(p, |l| l.min(p)));
        }
        if let Some(p) = offer_high {
            high = Some(high.map_or(p, |h| h.max(p)));
        }
        if let Some(currency) = json_str(offer, "priceCurrency").and_then(text_or_none) {
            record.currency = currency;
        }
    }
    record.sold_out = !offers.is_empty()
        && offers
            .iter()
            .all(|o| json_str(o, "availability").is_some_and(|a| a.contains("SoldOut")));

    if node.get("isAccessibleForFree").and_then(Value::as_bool) == Some(true) && low.is_none() {
        low = Some(0.0);
        high = Some(0.0);
    }
    record.price_min = low.unwrap_or(PRICE_UNKNOWN);
    record.price_max = high.or(low).unwrap_or(PRICE_UNKNOWN);
}
