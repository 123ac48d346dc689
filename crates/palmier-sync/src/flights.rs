//! Flight price history, deal detection, and the weekend-deal source.
//!
//! Every quote the adapter keeps is appended to `flight_prices`; a quote is a
//! deal when it sits at least `threshold` percent under the trailing 30-day
//! average of its route. Only the best few deals become catalog records.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use metrics::counter;
use palmier_adapters::{AdapterError, SourceAdapter};
use palmier_core::datetime::{day_start, to_store};
use palmier_core::{route_code, FlightPriceSample, Location, RawRecord};
use palmier_storage::{decode, encode, list_all, Filter, RecordStore, Sort, StoreError, FLIGHT_PRICES};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::clock::Clock;
use crate::metrics::DEALS_DETECTED;

pub const DEAL_WINDOW_DAYS: i64 = 30;
pub const ORIGIN: &str = "NCE";
pub const FLIGHT_SOURCE_NAME: &str = "flight_deals";
pub const AIRPORT_NAME: &str = "Aéroport Nice Côte d'Azur (NCE)";

/// Monitored destinations and the city name used in record titles.
pub const ROUTES: &[(&str, &str)] = &[
    ("BCN", "Barcelone"),
    ("FCO", "Rome"),
    ("LHR", "Londres"),
    ("LIS", "Lisbonne"),
    ("AMS", "Amsterdam"),
    ("RAK", "Marrakech"),
];

const MIN_PLAUSIBLE_PRICE: f64 = 25.0;
const MAX_PLAUSIBLE_PRICE: f64 = 800.0;
const QUOTES_PER_ROUTE: usize = 5;
const MAX_DEALS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DealVerdict {
    pub is_deal: bool,
    pub average: Option<f64>,
    pub discount: Option<f64>,
}

/// Deal rule over an already loaded history window. The gate counts raw
/// samples; zero prices are left out of the average.
pub fn evaluate_deal(
    history: &[FlightPriceSample],
    price: f64,
    threshold_percent: f64,
    min_history: usize,
) -> DealVerdict {
    if history.len() < min_history {
        return DealVerdict::default();
    }
    let prices: Vec<f64> = history.iter().map(|s| s.price).filter(|p| *p != 0.0).collect();
    if prices.is_empty() {
        return DealVerdict::default();
    }
    let average = prices.iter().sum::<f64>() / prices.len() as f64;
    if average <= 0.0 {
        return DealVerdict {
            average: Some(average),
            ..DealVerdict::default()
        };
    }
    let discount = (average - price) / average * 100.0;
    DealVerdict {
        is_deal: discount >= threshold_percent,
        average: Some(average),
        discount: Some(discount),
    }
}

/// Per-route price time series in the `flight_prices` collection.
pub struct PriceHistory {
    store: Arc<dyn RecordStore>,
}

impl PriceHistory {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub async fn store_sample(&self, sample: &FlightPriceSample) -> Result<(), StoreError> {
        self.store.create(FLIGHT_PRICES, encode(sample)?).await?;
        Ok(())
    }

    /// Samples of `route` crawled within the trailing window, newest first.
    pub async fn history(
        &self,
        route: &str,
        window_days: i64,
        now: NaiveDateTime,
    ) -> Result<Vec<FlightPriceSample>, StoreError> {
        let cutoff = now - chrono::Duration::days(window_days);
        let filter = Filter::eq("route", route).and(Filter::gte("crawled_at", to_store(&cutoff)));
        let records = list_all(
            self.store.as_ref(),
            FLIGHT_PRICES,
            Some(filter),
            vec![Sort::desc("crawled_at")],
        )
        .await?;
        Ok(records
            .into_iter()
            .filter_map(|record| match decode::<FlightPriceSample>(record) {
                Ok(sample) => Some(sample),
                Err(err) => {
                    debug!(route, error = %err, "skipping unreadable price sample");
                    None
                }
            })
            .collect())
    }

    pub async fn average_over_window(
        &self,
        route: &str,
        window_days: i64,
        now: NaiveDateTime,
    ) -> Result<Option<f64>, StoreError> {
        let samples = self.history(route, window_days, now).await?;
        let prices: Vec<f64> = samples.iter().map(|s| s.price).filter(|p| *p != 0.0).collect();
        if prices.is_empty() {
            return Ok(None);
        }
        Ok(Some(prices.iter().sum::<f64>() / prices.len() as f64))
    }

    pub async fn detect_deal(
        &self,
        price: f64,
        route: &str,
        threshold_percent: f64,
        min_history: usize,
        now: NaiveDateTime,
    ) -> Result<DealVerdict, StoreError> {
        let samples = self.history(route, DEAL_WINDOW_DAYS, now).await?;
        Ok(evaluate_deal(&samples, price, threshold_percent, min_history))
    }
}

/// One round-trip offer for the target weekend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlightQuote {
    pub price: f64,
    #[serde(default)]
    pub airline: Option<String>,
    #[serde(default)]
    pub is_direct: Option<bool>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

#[async_trait]
pub trait FlightQuoteSource: Send + Sync {
    async fn quotes(
        &self,
        origin: &str,
        destination: &str,
        departure: NaiveDate,
        return_date: NaiveDate,
    ) -> Result<Vec<FlightQuote>, AdapterError>;
}

/// Quotes keyed by route code (`"NCE-BCN"`), loaded from a JSON object file.
#[derive(Debug, Clone, Default)]
pub struct FixtureQuoteSource {
    quotes: HashMap<String, Vec<FlightQuote>>,
}

impl FixtureQuoteSource {
    pub fn new(quotes: HashMap<String, Vec<FlightQuote>>) -> Self {
        Self { quotes }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, AdapterError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| AdapterError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let quotes = serde_json::from_str(&text).map_err(|source| AdapterError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { quotes })
    }
}

#[async_trait]
impl FlightQuoteSource for FixtureQuoteSource {
    async fn quotes(
        &self,
        origin: &str,
        destination: &str,
        _departure: NaiveDate,
        _return_date: NaiveDate,
    ) -> Result<Vec<FlightQuote>, AdapterError> {
        Ok(self
            .quotes
            .get(&route_code(origin, destination))
            .cloned()
            .unwrap_or_default())
    }
}

/// Friday and Sunday of the next weekend; on a Friday, the following one.
pub fn next_weekend(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let weekday = today.weekday().num_days_from_monday() as i64;
    let mut until_friday = (4 - weekday).rem_euclid(7);
    if until_friday == 0 {
        until_friday = 7;
    }
    let friday = today + chrono::Duration::days(until_friday);
    (friday, friday + chrono::Duration::days(2))
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn varint_field(out: &mut Vec<u8>, field: u64, value: u64) {
    put_varint(out, field << 3);
    put_varint(out, value);
}

fn bytes_field(out: &mut Vec<u8>, field: u64, bytes: &[u8]) {
    put_varint(out, (field << 3) | 2);
    put_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn airport(code: &str) -> Vec<u8> {
    let mut out = Vec::new();
    varint_field(&mut out, 1, 1);
    bytes_field(&mut out, 2, code.as_bytes());
    out
}

fn leg(date: NaiveDate, from: &str, to: &str) -> Vec<u8> {
    let mut out = Vec::new();
    bytes_field(&mut out, 2, date.format("%Y-%m-%d").to_string().as_bytes());
    bytes_field(&mut out, 13, &airport(from));
    bytes_field(&mut out, 14, &airport(to));
    out
}

/// `tfs` query value of a Google Flights round-trip search.
pub fn build_tfs(departure: NaiveDate, return_date: NaiveDate, origin: &str, destination: &str) -> String {
    let mut out = Vec::new();
    varint_field(&mut out, 1, 28);
    varint_field(&mut out, 2, 2);
    bytes_field(&mut out, 3, &leg(departure, origin, destination));
    bytes_field(&mut out, 3, &leg(return_date, destination, origin));
    URL_SAFE_NO_PAD.encode(out)
}

pub fn google_flights_url(departure: NaiveDate, return_date: NaiveDate, origin: &str, destination: &str) -> String {
    format!(
        "https://www.google.com/travel/flights/search?tfs={}&hl=fr&gl=fr&curr=EUR",
        build_tfs(departure, return_date, origin, destination)
    )
}

/// Plausible quotes, cheapest first, one per distinct price.
pub fn select_quotes(mut quotes: Vec<FlightQuote>) -> Vec<FlightQuote> {
    quotes.retain(|q| (MIN_PLAUSIBLE_PRICE..=MAX_PLAUSIBLE_PRICE).contains(&q.price));
    quotes.sort_by(|a, b| a.price.total_cmp(&b.price));
    quotes.dedup_by(|a, b| a.price == b.price);
    quotes.truncate(QUOTES_PER_ROUTE);
    quotes
}

#[derive(Debug, Clone)]
struct FlightDeal {
    destination: &'static str,
    city: &'static str,
    quote: FlightQuote,
    average: f64,
    discount: f64,
    url: String,
}

fn deal_record(deal: &FlightDeal, friday: NaiveDate, sunday: NaiveDate) -> RawRecord {
    let direct = if deal.quote.is_direct == Some(true) { " direct" } else { "" };
    let airline = deal
        .quote
        .airline
        .as_deref()
        .filter(|a| !a.trim().is_empty())
        .map(|a| format!(" ({a})"))
        .unwrap_or_default();

    let mut record = RawRecord::new(
        format!(
            "Vol Nice→{} {:.0}€ A/R (−{:.0}%)",
            deal.city, deal.quote.price, deal.discount
        ),
        day_start(friday),
    );
    record.description = format!(
        "Vol{direct} Nice ({ORIGIN}) → {} ({}){airline}. Prix actuel : {:.0}€ A/R, soit {:.0}% sous la moyenne de {:.0}€. Dates : {} – {}.",
        deal.city,
        deal.destination,
        deal.quote.price,
        deal.discount,
        deal.average,
        friday.format("%d/%m"),
        sunday.format("%d/%m"),
    );
    record.date_end = Some(day_start(sunday));
    record.location = Location {
        name: AIRPORT_NAME.to_string(),
        city: "Nice".to_string(),
        ..Location::default()
    };
    record.price_min = deal.quote.price;
    record.price_max = deal.quote.price;
    record.source_url = deal.url.clone();
    record
}

/// Weekend flight deals out of Nice. Feeds the price history as a side
/// effect of every crawl, deal or not.
pub struct FlightDealsAdapter {
    quotes: Arc<dyn FlightQuoteSource>,
    history: PriceHistory,
    clock: Arc<dyn Clock>,
    threshold_percent: f64,
    min_history: usize,
    enabled: bool,
    delay: (Duration, Duration),
}

impl FlightDealsAdapter {
    pub fn new(
        quotes: Arc<dyn FlightQuoteSource>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        threshold_percent: f64,
        min_history: usize,
    ) -> Self {
        Self {
            quotes,
            history: PriceHistory::new(store),
            clock,
            threshold_percent,
            min_history,
            enabled: true,
            delay: (Duration::from_secs(2), Duration::from_secs(5)),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Bounds of the randomized pause between two routes.
    pub fn with_delay(mut self, min: Duration, max: Duration) -> Self {
        self.delay = (min, max.max(min));
        self
    }

    async fn pause(&self) {
        let (min, max) = self.delay;
        if max.is_zero() {
            return;
        }
        let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }

    async fn scan_route(
        &self,
        destination: &'static str,
        city: &'static str,
        friday: NaiveDate,
        sunday: NaiveDate,
        now: NaiveDateTime,
    ) -> Vec<FlightDeal> {
        let route = route_code(ORIGIN, destination);
        let quotes = match self.quotes.quotes(ORIGIN, destination, friday, sunday).await {
            Ok(quotes) => select_quotes(quotes),
            Err(err) => {
                warn!(%route, error = %err, "quote lookup failed");
                return Vec::new();
            }
        };
        let url = google_flights_url(friday, sunday, ORIGIN, destination);

        let mut deals = Vec::new();
        for quote in quotes {
            let sample = FlightPriceSample {
                id: String::new(),
                route: route.clone(),
                origin: ORIGIN.to_string(),
                destination: destination.to_string(),
                destination_city: city.to_string(),
                departure_date: day_start(friday),
                return_date: day_start(sunday),
                price: quote.price,
                currency: "EUR".to_string(),
                airline: quote.airline.clone(),
                flight_duration: quote.duration_minutes,
                is_direct: quote.is_direct,
                source_url: url.clone(),
                crawled_at: now,
            };
            if let Err(err) = self.history.store_sample(&sample).await {
                warn!(%route, price = quote.price, error = %err, "failed to store price sample");
            }

            let verdict = match self
                .history
                .detect_deal(quote.price, &route, self.threshold_percent, self.min_history, now)
                .await
            {
                Ok(verdict) => verdict,
                Err(err) => {
                    warn!(%route, error = %err, "price history lookup failed");
                    continue;
                }
            };
            if let (true, Some(average), Some(discount)) = (verdict.is_deal, verdict.average, verdict.discount) {
                counter!(DEALS_DETECTED).increment(1);
                info!(%route, price = quote.price, average, discount, "flight deal");
                deals.push(FlightDeal {
                    destination,
                    city,
                    quote,
                    average,
                    discount,
                    url: url.clone(),
                });
            }
        }
        deals
    }
}

#[async_trait]
impl SourceAdapter for FlightDealsAdapter {
    fn source_name(&self) -> &str {
        FLIGHT_SOURCE_NAME
    }

    async fn crawl(&self) -> Result<Vec<RawRecord>, AdapterError> {
        if !self.enabled {
            info!("flight crawl disabled");
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let (friday, sunday) = next_weekend(now.date());

        let mut deals = Vec::new();
        for (index, &(destination, city)) in ROUTES.iter().enumerate() {
            if index > 0 {
                self.pause().await;
            }
            let span = info_span!("flight_route", destination);
            deals.extend(
                self.scan_route(destination, city, friday, sunday, now)
                    .instrument(span)
                    .await,
            );
        }

        deals.sort_by(|a, b| b.discount.total_cmp(&a.discount));
        deals.truncate(MAX_DEALS);
        Ok(deals.iter().map(|d| deal_record(d, friday, sunday)).collect())
    }
}
