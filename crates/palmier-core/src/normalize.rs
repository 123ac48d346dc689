//! Identity hashing and title normalization for duplicate detection.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::datetime::isoformat;

/// Length of the persisted hash, in hex characters (64 bits of the digest).
pub const HASH_LEN: usize = 16;

// A number directly followed by a currency symbol, and everything after it:
// "vol nice→rome 121€ a/r (−50%)" loses "121€ a/r (−50%)".
static PRICE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\d+(?:[.,]\d+)?\s*[€$£].*$").expect("valid price suffix regex"));

static SOLD_OUT_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*[\(\[]\s*(?:sold[\s-]?out|complet)\s*[\)\]]\s*$").expect("valid sold-out regex")
});

const TRAILING_SEPARATORS: &[char] = &['-', '–', '—', '|', ':', ',', '·', '/'];

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical record hash over `title|isoformat(date_start)|location_name`,
/// with title and location lowercased and trimmed.
pub fn event_hash(title: &str, date_start: &NaiveDateTime, location_name: &str) -> String {
    let raw = format!(
        "{}|{}|{}",
        title.trim().to_lowercase(),
        isoformat(date_start),
        location_name.trim().to_lowercase()
    );
    let mut digest = sha256_hex(raw.as_bytes());
    digest.truncate(HASH_LEN);
    digest
}

/// Title form compared by the same-day fuzzy check and the purge pass.
///
/// Lowercased and trimmed, with any trailing sold-out marker, trailing
/// price/discount suffix, and trailing separators removed.
pub fn normalize_match_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let without_marker = SOLD_OUT_SUFFIX.replace(&lowered, "");
    let without_price = PRICE_SUFFIX.replace(&without_marker, "");
    without_price
        .trim_end_matches(|c: char| c.is_whitespace() || TRAILING_SEPARATORS.contains(&c))
        .trim_start()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn evening() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(20, 0, 0)
            .unwrap()
    }

    #[test]
    fn hash_is_case_and_whitespace_insensitive() {
        assert_eq!(event_hash(" A ", &evening(), " B "), event_hash("a", &evening(), "b"));
        assert_eq!(
            event_hash("DJ Night", &evening(), "Le Shelter"),
            event_hash("  dj night", &evening(), "LE SHELTER  ")
        );
    }

    #[test]
    fn hash_is_sixteen_lowercase_hex_chars() {
        let hash = event_hash("DJ Night", &evening(), "Le Shelter");
        assert_eq!(hash.len(), HASH_LEN);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, event_hash("DJ Night", &evening(), "Le Shelter"));
    }

    #[test]
    fn hash_covers_title_date_and_location() {
        let base = event_hash("DJ Night", &evening(), "Le Shelter");
        assert_ne!(base, event_hash("DJ Nights", &evening(), "Le Shelter"));
        assert_ne!(base, event_hash("DJ Night", &(evening() + chrono::Duration::hours(1)), "Le Shelter"));
        assert_ne!(base, event_hash("DJ Night", &evening(), "Le Ghost"));
    }

    #[test]
    fn hash_matches_known_digest_prefix() {
        let expected = &sha256_hex(b"dj night|2026-03-01T20:00:00|le shelter")[..HASH_LEN];
        assert_eq!(event_hash("DJ Night", &evening(), "Le Shelter"), expected);
    }

    #[test]
    fn match_title_strips_price_and_discount_suffix() {
        assert_eq!(
            normalize_match_title("Vol Nice→Rome 121€ A/R (−50%)"),
            "vol nice→rome"
        );
        assert_eq!(
            normalize_match_title("Vol Nice→Rome 89 € A/R (−62%)"),
            "vol nice→rome"
        );
        assert_eq!(normalize_match_title("Brunch party - 25,50€"), "brunch party");
    }

    #[test]
    fn match_title_strips_sold_out_marker_and_separators() {
        assert_eq!(normalize_match_title("DJ Night (sold out)"), "dj night");
        assert_eq!(normalize_match_title("DJ Night [SOLD-OUT]"), "dj night");
        assert_eq!(normalize_match_title("  DJ Night | "), "dj night");
        assert_eq!(normalize_match_title("Soirée Complet (complet)"), "soirée complet");
    }

    #[test]
    fn match_title_keeps_numbers_without_currency() {
        assert_eq!(normalize_match_title("2 Many DJs"), "2 many djs");
        assert_eq!(normalize_match_title("Top 50 Party"), "top 50 party");
    }

    #[test]
    fn match_title_can_normalize_to_empty() {
        assert_eq!(normalize_match_title("   "), "");
        assert_eq!(normalize_match_title("15€"), "");
    }
}
