//! Opponent-tier scoring for football fixtures.
//!
//! Matches from tier-scored sources ignore the enrichment score entirely:
//! `score = min(100, 70 + bonus(opponent))`. The score is a pure function of
//! the title, so it can be recomputed at any time.

use std::sync::Arc;

use palmier_core::tags::SPORT_MATCH;
use palmier_core::{is_featured_score, EventStatus};
use palmier_storage::{list_all, record_id, Filter, Record, RecordStore, StoreError, EVENTS};
use serde_json::{json, Value};
use tracing::{info, warn};

pub const MATCH_BASE_SCORE: u8 = 70;

/// Ligue 1 clubs and their common aliases, strongest tier first.
/// Substring fallback walks this list in order.
const TIER_TABLE: &[(&str, u8)] = &[
    ("psg", 1),
    ("paris", 1),
    ("paris saint-germain", 1),
    ("paris sg", 1),
    ("marseille", 1),
    ("om", 1),
    ("olympique de marseille", 1),
    ("monaco", 1),
    ("as monaco", 1),
    ("lyon", 1),
    ("ol", 1),
    ("olympique lyonnais", 1),
    ("lille", 2),
    ("losc", 2),
    ("lens", 2),
    ("rc lens", 2),
    ("rennes", 2),
    ("stade rennais", 2),
    ("nice", 2),
    ("ogc nice", 2),
    ("strasbourg", 3),
    ("rc strasbourg", 3),
    ("toulouse", 3),
    ("tfc", 3),
    ("nantes", 3),
    ("fc nantes", 3),
    ("reims", 3),
    ("stade de reims", 3),
    ("brest", 3),
    ("stade brestois", 3),
    ("montpellier", 4),
    ("mhsc", 4),
    ("le havre", 4),
    ("hac", 4),
    ("auxerre", 4),
    ("aja", 4),
    ("angers", 4),
    ("sco", 4),
    ("st-etienne", 4),
    ("saint-etienne", 4),
    ("asse", 4),
];

pub fn tier_bonus(tier: u8) -> u8 {
    match tier {
        1 => 15,
        2 => 10,
        3 => 5,
        _ => 0,
    }
}

pub fn opponent_tier(name: &str) -> Option<u8> {
    let key = name.trim().to_lowercase();
    if key.is_empty() {
        return None;
    }
    if let Some((_, tier)) = TIER_TABLE.iter().find(|(known, _)| *known == key) {
        return Some(*tier);
    }
    TIER_TABLE
        .iter()
        .find(|(known, _)| key.contains(known) || known.contains(key.as_str()))
        .map(|(_, tier)| *tier)
}

pub fn opponent_bonus(name: &str) -> u8 {
    opponent_tier(name).map_or(0, tier_bonus)
}

/// Opponent named in `"<Home> vs <Opponent> (<Competition>)"`. Also accepts
/// `vs.` and ` - ` separators.
pub fn extract_opponent(title: &str) -> Option<String> {
    let lowered = title.to_lowercase();
    let rest = [" vs. ", " vs ", " - "]
        .iter()
        .filter_map(|sep| lowered.find(sep).map(|at| (at, sep.len())))
        .min_by_key(|(at, _)| *at)
        .map(|(at, len)| &lowered[at + len..])?;
    let opponent = match rest.find('(') {
        Some(paren) => &rest[..paren],
        None => rest,
    }
    .trim();
    if opponent.is_empty() {
        None
    } else {
        Some(opponent.to_string())
    }
}

pub fn match_score(title: &str) -> u8 {
    let bonus = extract_opponent(title).map_or(0, |o| opponent_bonus(&o));
    MATCH_BASE_SCORE.saturating_add(bonus).min(100)
}

fn record_title(record: &Record) -> &str {
    record.get("title").and_then(Value::as_str).unwrap_or_default()
}

/// Recompute fixture scores for every published match from the given
/// sources. Only records whose score actually changes are written; status is
/// never touched. Returns the number of records updated.
pub async fn recalibrate(
    store: &Arc<dyn RecordStore>,
    tier_scored_sources: &[String],
) -> Result<usize, StoreError> {
    if tier_scored_sources.is_empty() {
        return Ok(0);
    }
    let sources = tier_scored_sources
        .iter()
        .map(|s| Filter::eq("source_name", s.as_str()))
        .reduce(Filter::or)
        .unwrap_or(Filter::And(Vec::new()));
    let filter = Filter::eq("status", EventStatus::Published.as_str())
        .and(Filter::contains("tags_type", SPORT_MATCH))
        .and(sources);

    let records = list_all(store.as_ref(), EVENTS, Some(filter), Vec::new()).await?;
    let mut updated = 0;
    for record in &records {
        let Some(id) = record_id(record) else { continue };
        // `~` is a substring match; require the exact code.
        let tagged = record
            .get("tags_type")
            .and_then(Value::as_array)
            .is_some_and(|codes| codes.iter().any(|c| c.as_str() == Some(SPORT_MATCH)));
        if !tagged {
            continue;
        }
        let score = match_score(record_title(record));
        let current = record.get("interest_score").and_then(Value::as_u64);
        let featured = record.get("is_featured").and_then(Value::as_bool);
        if current == Some(u64::from(score)) && featured == Some(is_featured_score(score)) {
            continue;
        }
        let patch = json!({"interest_score": score, "is_featured": is_featured_score(score)});
        let Value::Object(patch) = patch else { continue };
        match store.update(EVENTS, id, patch).await {
            Ok(_) => updated += 1,
            Err(err) => warn!(event_id = id, error = %err, "score recalibration failed"),
        }
    }
    info!(updated, scanned = records.len(), "match scores recalibrated");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_lookup_exact_then_substring() {
        assert_eq!(opponent_tier("PSG"), Some(1));
        assert_eq!(opponent_tier(" Olympique Lyonnais "), Some(1));
        assert_eq!(opponent_tier("Stade Rennais FC"), Some(2));
        assert_eq!(opponent_tier("Toulouse"), Some(3));
        assert_eq!(opponent_tier("AJ Auxerre"), Some(4));
        assert_eq!(opponent_tier("Real Madrid"), None);
        assert_eq!(opponent_tier(""), None);
    }

    #[test]
    fn opponent_is_read_from_the_title() {
        assert_eq!(
            extract_opponent("OGC Nice vs Olympique Lyonnais (Ligue 1)").as_deref(),
            Some("olympique lyonnais")
        );
        assert_eq!(extract_opponent("AS Monaco vs. Brest").as_deref(), Some("brest"));
        assert_eq!(extract_opponent("OGC Nice - PSG (Coupe de France)").as_deref(), Some("psg"));
        assert_eq!(extract_opponent("Nice Jazz Festival"), None);
    }

    #[test]
    fn match_scores() {
        assert_eq!(match_score("OGC Nice vs PSG (Ligue 1)"), 85);
        assert_eq!(match_score("OGC Nice vs Stade Rennais (Ligue 1)"), 80);
        assert_eq!(match_score("OGC Nice vs Stade de Reims (Ligue 1)"), 75);
        assert_eq!(match_score("OGC Nice vs Le Havre (Ligue 1)"), 70);
        assert_eq!(match_score("OGC Nice vs Real Madrid (Amical)"), 70);
        assert_eq!(match_score("Derby day"), 70);
        let title = "AS Monaco vs Marseille (Ligue 1)";
        assert_eq!(match_score(title), match_score(title));
    }
}
