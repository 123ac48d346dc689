//! Duplicate detection: exact hash lookup, same-day title match, batch purge.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use metrics::counter;
use palmier_core::datetime::{self, day_start, to_store};
use palmier_core::{event_hash, normalize_match_title};
use palmier_storage::{first, list_all, record_id, Filter, Record, RecordStore, StoreError, EVENTS};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::metrics::FUZZY_FAIL_OPEN;

/// Outcome of the same-day title check.
#[derive(Debug)]
pub enum FuzzyCheck {
    Match { existing_id: String },
    NoMatch,
    /// The lookup failed; the record is let through.
    FailedOpen(StoreError),
}

impl FuzzyCheck {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Match { .. })
    }
}

pub struct DedupEngine {
    store: Arc<dyn RecordStore>,
    fail_open: AtomicU64,
}

fn same_day(day: NaiveDate) -> Filter {
    let next = day.succ_opt().unwrap_or(day);
    Filter::gte("date_start", to_store(&day_start(day)))
        .and(Filter::lt("date_start", to_store(&day_start(next))))
}

fn title_of(record: &Record) -> &str {
    record.get("title").and_then(Value::as_str).unwrap_or_default()
}

fn start_of(record: &Record) -> Option<NaiveDateTime> {
    record
        .get("date_start")
        .and_then(Value::as_str)
        .and_then(datetime::parse)
}

fn score_of(record: &Record) -> f64 {
    record
        .get("interest_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

impl DedupEngine {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            fail_open: AtomicU64::new(0),
        }
    }

    /// Whether a record with the same canonical hash is already stored.
    pub async fn exactly_exists(
        &self,
        title: &str,
        date_start: &NaiveDateTime,
        location_name: &str,
    ) -> Result<bool, StoreError> {
        let hash = event_hash(title, date_start, location_name);
        let existing = first(self.store.as_ref(), EVENTS, Filter::eq("hash", hash)).await?;
        Ok(existing.is_some())
    }

    /// Look for a stored record on the same calendar day whose normalized
    /// title equals the candidate's. An empty normalized title never matches.
    pub async fn fuzzy_match(&self, title: &str, date_start: &NaiveDateTime) -> FuzzyCheck {
        let candidate = normalize_match_title(title);
        if candidate.is_empty() {
            return FuzzyCheck::NoMatch;
        }

        let filter = same_day(date_start.date());
        match list_all(self.store.as_ref(), EVENTS, Some(filter), Vec::new()).await {
            Ok(records) => records
                .iter()
                .find(|r| normalize_match_title(title_of(r)) == candidate)
                .map(|r| FuzzyCheck::Match {
                    existing_id: record_id(r).unwrap_or_default().to_string(),
                })
                .unwrap_or(FuzzyCheck::NoMatch),
            Err(err) => {
                self.fail_open.fetch_add(1, Ordering::Relaxed);
                counter!(FUZZY_FAIL_OPEN).increment(1);
                warn!(title, error = %err, "same-day title lookup failed, letting record through");
                FuzzyCheck::FailedOpen(err)
            }
        }
    }

    pub async fn fuzzy_match_exists(&self, title: &str, date_start: &NaiveDateTime) -> bool {
        self.fuzzy_match(title, date_start).await.is_duplicate()
    }

    /// Number of fuzzy lookups that failed open since this engine was built.
    pub fn fail_open_count(&self) -> u64 {
        self.fail_open.load(Ordering::Relaxed)
    }

    /// Collapse every (normalized title, calendar day) group to its highest
    /// scored record. Ties keep the first record in store order. Returns the
    /// number of records deleted; individual delete failures are skipped.
    pub async fn purge_duplicates(&self) -> Result<usize, StoreError> {
        let records = list_all(self.store.as_ref(), EVENTS, None, Vec::new()).await?;

        let mut groups: BTreeMap<(String, NaiveDate), Vec<&Record>> = BTreeMap::new();
        for record in &records {
            let title = normalize_match_title(title_of(record));
            let Some(start) = start_of(record) else {
                continue;
            };
            if title.is_empty() || record_id(record).is_none() {
                continue;
            }
            groups.entry((title, start.date())).or_default().push(record);
        }

        let mut deleted = 0;
        for ((title, day), members) in groups.into_iter().filter(|(_, m)| m.len() > 1) {
            let keep = members
                .iter()
                .enumerate()
                .fold(0, |best, (i, r)| if score_of(r) > score_of(members[best]) { i } else { best });
            debug!(%title, %day, count = members.len(), "duplicate group");

            for (i, record) in members.iter().enumerate() {
                if i == keep {
                    continue;
                }
                let Some(id) = record_id(record) else { continue };
                match self.store.delete(EVENTS, id).await {
                    Ok(()) => deleted += 1,
                    Err(err) => warn!(event_id = id, error = %err, "failed to delete duplicate"),
                }
            }
        }

        info!(deleted, "duplicate purge complete");
        Ok(deleted)
    }
}
