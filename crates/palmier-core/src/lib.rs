//! Core record model and normalization rules for the Palmier event catalog.

pub mod datetime;
pub mod normalize;
pub mod tags;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub use normalize::{event_hash, normalize_match_title};
pub use tags::{TagCategory, TagSet};

pub const CRATE_NAME: &str = "palmier-core";

/// Price sentinel meaning "the source did not publish a price".
pub const PRICE_UNKNOWN: f64 = -1.0;

/// Scores at or above this value mark a record as featured.
pub const FEATURED_THRESHOLD: u8 = 80;

pub fn is_featured_score(score: u8) -> bool {
    score >= FEATURED_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

/// Normalized listing handed from a source adapter to the pipeline.
///
/// Raw records carry no identity; the canonical hash is derived from
/// `(title, date_start, location.name)` when the record is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "datetime::serde_store")]
    pub date_start: NaiveDateTime,
    #[serde(default, with = "datetime::serde_store_opt")]
    pub date_end: Option<NaiveDateTime>,
    #[serde(default)]
    pub location: Location,
    #[serde(default = "unknown_price")]
    pub price_min: f64,
    #[serde(default = "unknown_price")]
    pub price_max: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub sold_out: bool,
}

fn unknown_price() -> f64 {
    PRICE_UNKNOWN
}

fn default_currency() -> String {
    "EUR".to_string()
}

impl RawRecord {
    pub fn new(title: impl Into<String>, date_start: NaiveDateTime) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            date_start,
            date_end: None,
            location: Location::default(),
            price_min: PRICE_UNKNOWN,
            price_max: PRICE_UNKNOWN,
            currency: default_currency(),
            source_url: String::new(),
            image_url: String::new(),
            sold_out: false,
        }
    }

    pub fn hash(&self) -> String {
        event_hash(&self.title, &self.date_start, &self.location.name)
    }

    /// Title and description joined, the text blocklist rules run against.
    pub fn combined_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }

    pub fn price_known(&self) -> bool {
        !(self.price_min < 0.0 || (self.price_min == 0.0 && self.price_max == 0.0))
    }

    /// Human price range used in enrichment prompts; keeps "unknown" apart from "free".
    pub fn price_info(&self) -> String {
        if !self.price_known() {
            return "unknown".to_string();
        }
        format!(
            "{} - {} {}",
            format_price(self.price_min.max(0.0)),
            format_price(self.price_max.max(self.price_min)),
            self.currency
        )
    }
}

fn format_price(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Draft,
    Published,
    Expired,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Status only ever moves forward; expired and cancelled are terminal.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Published)
                | (Self::Draft | Self::Published, Self::Expired)
                | (Self::Draft | Self::Published, Self::Cancelled)
        )
    }
}

/// Enrichment output attached to a raw record before persistence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Enrichment {
    pub tags: TagSet,
    pub interest_score: u8,
    pub summary: String,
}

/// Persisted catalog entry, stored flat in the `events` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub summary: String,
    #[serde(with = "datetime::serde_store")]
    pub date_start: NaiveDateTime,
    #[serde(default, with = "datetime::serde_store_opt")]
    pub date_end: Option<NaiveDateTime>,
    #[serde(default)]
    pub location_name: String,
    #[serde(default)]
    pub location_city: String,
    #[serde(default)]
    pub location_address: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "unknown_price")]
    pub price_min: f64,
    #[serde(default = "unknown_price")]
    pub price_max: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub sold_out: bool,
    #[serde(flatten)]
    pub tags: TagSet,
    #[serde(default)]
    pub interest_score: u8,
    #[serde(default)]
    pub is_featured: bool,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(with = "datetime::serde_store")]
    pub crawled_at: NaiveDateTime,
    #[serde(default)]
    pub hash: String,
}

impl EventRecord {
    /// Build the published record for a freshly enriched raw record.
    pub fn from_raw(
        raw: RawRecord,
        source_name: &str,
        enrichment: Enrichment,
        crawled_at: NaiveDateTime,
    ) -> Self {
        let hash = raw.hash();
        let score = enrichment.interest_score.min(100);
        Self {
            id: String::new(),
            title: raw.title,
            description: raw.description,
            summary: enrichment.summary,
            date_start: raw.date_start,
            date_end: raw.date_end,
            location_name: raw.location.name,
            location_city: raw.location.city,
            location_address: raw.location.address,
            latitude: raw.location.latitude,
            longitude: raw.location.longitude,
            price_min: raw.price_min,
            price_max: raw.price_max,
            currency: raw.currency,
            source_url: raw.source_url,
            source_name: source_name.to_string(),
            image_url: raw.image_url,
            sold_out: raw.sold_out,
            tags: enrichment.tags,
            interest_score: score,
            is_featured: is_featured_score(score),
            status: EventStatus::Published,
            crawled_at,
            hash,
        }
    }

    pub fn set_score(&mut self, score: u8) {
        self.interest_score = score.min(100);
        self.is_featured = is_featured_score(self.interest_score);
    }
}

/// One observed round-trip price for a monitored route. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightPriceSample {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub route: String,
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub destination_city: String,
    #[serde(with = "datetime::serde_store")]
    pub departure_date: NaiveDateTime,
    #[serde(with = "datetime::serde_store")]
    pub return_date: NaiveDateTime,
    pub price: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub airline: Option<String>,
    #[serde(default)]
    pub flight_duration: Option<u32>,
    #[serde(default)]
    pub is_direct: Option<bool>,
    #[serde(default)]
    pub source_url: String,
    #[serde(with = "datetime::serde_store")]
    pub crawled_at: NaiveDateTime,
}

pub fn route_code(origin: &str, destination: &str) -> String {
    format!("{origin}-{destination}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlStatus {
    #[default]
    Success,
    Error,
}

/// Audit entry written once per adapter per pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlLog {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub source: String,
    #[serde(with = "datetime::serde_store")]
    pub started_at: NaiveDateTime,
    #[serde(default, with = "datetime::serde_store_opt")]
    pub finished_at: Option<NaiveDateTime>,
    pub status: CrawlStatus,
    #[serde(default)]
    pub events_found: u32,
    #[serde(default)]
    pub events_new: u32,
    #[serde(default)]
    pub error_message: String,
}

impl CrawlLog {
    pub fn started(source: impl Into<String>, started_at: NaiveDateTime) -> Self {
        Self {
            id: String::new(),
            source: source.into(),
            started_at,
            finished_at: None,
            status: CrawlStatus::Success,
            events_found: 0,
            events_new: 0,
            error_message: String::new(),
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = CrawlStatus::Error;
        self.error_message = message.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn featured_flag_follows_score() {
        let raw = RawRecord::new("Rooftop opening", at(2026, 6, 1, 19));
        let record = EventRecord::from_raw(
            raw,
            "nicefr",
            Enrichment {
                interest_score: 80,
                ..Default::default()
            },
            at(2026, 5, 1, 7),
        );
        assert!(record.is_featured);
        assert_eq!(record.status, EventStatus::Published);
        assert_eq!(record.hash.len(), 16);

        let mut lower = record.clone();
        lower.set_score(79);
        assert!(!lower.is_featured);
    }

    #[test]
    fn status_never_moves_backward() {
        assert!(EventStatus::Published.can_transition_to(EventStatus::Expired));
        assert!(EventStatus::Draft.can_transition_to(EventStatus::Cancelled));
        assert!(!EventStatus::Expired.can_transition_to(EventStatus::Published));
        assert!(!EventStatus::Cancelled.can_transition_to(EventStatus::Expired));
        assert!(!EventStatus::Published.can_transition_to(EventStatus::Draft));
    }

    #[test]
    fn price_info_separates_unknown_from_free() {
        let mut raw = RawRecord::new("Jazz on the beach", at(2026, 7, 1, 21));
        assert_eq!(raw.price_info(), "unknown");
        raw.price_min = 0.0;
        raw.price_max = 0.0;
        assert_eq!(raw.price_info(), "unknown");
        raw.price_max = 25.0;
        assert_eq!(raw.price_info(), "0 - 25 EUR");
        raw.price_min = 12.5;
        assert_eq!(raw.price_info(), "12.50 - 25 EUR");
    }

    #[test]
    fn event_record_serializes_flat_tag_fields() {
        let mut tags = TagSet::default();
        tags.insert(TagCategory::Type, "concert");
        let record = EventRecord::from_raw(
            RawRecord::new("Concert", at(2026, 6, 1, 20)),
            "shotgun",
            Enrichment {
                tags,
                interest_score: 60,
                summary: "Live set".into(),
            },
            at(2026, 5, 1, 7),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["tags_type"], serde_json::json!(["concert"]));
        assert_eq!(value["tags_exclusivity"], serde_json::json!([]));
        assert_eq!(value["status"], "published");
        assert_eq!(value["date_start"], "2026-06-01 20:00:00.000Z");
        assert!(value.get("id").is_none());

        let back: EventRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn event_record_accepts_store_shaped_json() {
        let value = serde_json::json!({
            "id": "abc123def456ghi",
            "collectionId": "pbc_1687431684",
            "title": "OGC Nice vs Lyon (Ligue 1)",
            "date_start": "2026-03-01 20:45:00.000Z",
            "date_end": "",
            "crawled_at": "2026-02-20T07:00:00",
            "tags_type": ["sport_match"],
            "interest_score": 85,
            "status": "published",
            "created": "2026-02-20 07:00:01.000Z"
        });
        let record: EventRecord = serde_json::from_value(value).unwrap();
        assert_eq!(record.id, "abc123def456ghi");
        assert_eq!(record.date_end, None);
        assert_eq!(record.date_start, at(2026, 3, 1, 20) + chrono::Duration::minutes(45));
        assert!(record.tags.contains(TagCategory::Type, "sport_match"));
        assert_eq!(record.price_min, PRICE_UNKNOWN);
    }
}
