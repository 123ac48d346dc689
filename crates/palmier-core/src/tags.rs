//! Tag catalog: ten independent categories, each with a fixed code set.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagCategory {
    Type,
    Vibe,
    Energy,
    Budget,
    Time,
    Exclusivity,
    Location,
    Audience,
    Deals,
    Meta,
}

pub const SPORT_MATCH: &str = "sport_match";
pub const SOLD_OUT: &str = "sold_out";

impl TagCategory {
    pub const ALL: [TagCategory; 10] = [
        Self::Type,
        Self::Vibe,
        Self::Energy,
        Self::Budget,
        Self::Time,
        Self::Exclusivity,
        Self::Location,
        Self::Audience,
        Self::Deals,
        Self::Meta,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Vibe => "vibe",
            Self::Energy => "energy",
            Self::Budget => "budget",
            Self::Time => "time",
            Self::Exclusivity => "exclusivity",
            Self::Location => "location",
            Self::Audience => "audience",
            Self::Deals => "deals",
            Self::Meta => "meta",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Store field holding this category, e.g. `tags_vibe`.
    pub fn field(self) -> String {
        format!("tags_{}", self.as_str())
    }

    pub fn codes(self) -> &'static [&'static str] {
        match self {
            Self::Type => &[
                "party",
                "bar_rooftop",
                "dj_set",
                "concert",
                "show",
                "conference",
                "poker_games",
                SPORT_MATCH,
                "motorsport",
                "watersport",
                "outdoor",
                "gaming",
                "cinema",
                "food",
                "travel",
            ],
            Self::Vibe => &[
                "festive",
                "chill",
                "premium",
                "dancing",
                "afterwork",
                "intellectual",
                "select",
                "sunset",
                "date",
                "friends",
                "late_night",
            ],
            Self::Energy => &["high", "intense", "low", "relax"],
            Self::Budget => &["free", "budget", "premium", "value", "worth_it"],
            Self::Time => &[
                "today",
                "this_week",
                "this_month",
                "last_minute",
                "plan_ahead",
                "one_time",
                "recurring",
            ],
            Self::Exclusivity => &[
                "selling_fast",
                "limited",
                "rare",
                "one_shot",
                "underground",
                SOLD_OUT,
            ],
            Self::Location => &[
                "nice_centre",
                "seaside",
                "monaco",
                "cannes",
                "antibes",
                "nearby",
                "road_trip",
            ],
            Self::Audience => &[
                "young_pro",
                "student",
                "afterwork_crowd",
                "electro",
                "cocktail",
                "adrenaline",
                "explorer",
                "poker_player",
            ],
            Self::Deals => &[
                "cheap_flight",
                "below_average",
                "short_window",
                "deal_detected",
                "quick_escape",
            ],
            Self::Meta => &[
                "high_interest",
                "recommended",
                "trending",
                "popular",
                "experimental",
            ],
        }
    }

    pub fn is_valid_code(self, code: &str) -> bool {
        self.codes().contains(&code)
    }
}

/// Per-category code sets. Each list is kept free of duplicates; order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagSet {
    #[serde(rename = "tags_type", default)]
    pub kind: Vec<String>,
    #[serde(rename = "tags_vibe", default)]
    pub vibe: Vec<String>,
    #[serde(rename = "tags_energy", default)]
    pub energy: Vec<String>,
    #[serde(rename = "tags_budget", default)]
    pub budget: Vec<String>,
    #[serde(rename = "tags_time", default)]
    pub time: Vec<String>,
    #[serde(rename = "tags_exclusivity", default)]
    pub exclusivity: Vec<String>,
    #[serde(rename = "tags_location", default)]
    pub location: Vec<String>,
    #[serde(rename = "tags_audience", default)]
    pub audience: Vec<String>,
    #[serde(rename = "tags_deals", default)]
    pub deals: Vec<String>,
    #[serde(rename = "tags_meta", default)]
    pub meta: Vec<String>,
}

impl TagSet {
    pub fn get(&self, category: TagCategory) -> &[String] {
        match category {
            TagCategory::Type => &self.kind,
            TagCategory::Vibe => &self.vibe,
            TagCategory::Energy => &self.energy,
            TagCategory::Budget => &self.budget,
            TagCategory::Time => &self.time,
            TagCategory::Exclusivity => &self.exclusivity,
            TagCategory::Location => &self.location,
            TagCategory::Audience => &self.audience,
            TagCategory::Deals => &self.deals,
            TagCategory::Meta => &self.meta,
        }
    }

    fn get_mut(&mut self, category: TagCategory) -> &mut Vec<String> {
        match category {
            TagCategory::Type => &mut self.kind,
            TagCategory::Vibe => &mut self.vibe,
            TagCategory::Energy => &mut self.energy,
            TagCategory::Budget => &mut self.budget,
            TagCategory::Time => &mut self.time,
            TagCategory::Exclusivity => &mut self.exclusivity,
            TagCategory::Location => &mut self.location,
            TagCategory::Audience => &mut self.audience,
            TagCategory::Deals => &mut self.deals,
            TagCategory::Meta => &mut self.meta,
        }
    }

    pub fn contains(&self, category: TagCategory, code: &str) -> bool {
        self.get(category).iter().any(|c| c == code)
    }

    /// Adds `code` unless already present. Returns whether the set changed.
    pub fn insert(&mut self, category: TagCategory, code: impl Into<String>) -> bool {
        let code = code.into();
        let codes = self.get_mut(category);
        if codes.contains(&code) {
            return false;
        }
        codes.push(code);
        true
    }

    pub fn is_empty(&self) -> bool {
        TagCategory::ALL.iter().all(|c| self.get(*c).is_empty())
    }

    pub fn is_sport_match(&self) -> bool {
        self.contains(TagCategory::Type, SPORT_MATCH)
    }

    /// Build a set from loosely typed `(category, codes)` pairs, dropping
    /// unknown categories and codes outside the catalog.
    pub fn validated<I, C>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, C)>,
        C: IntoIterator<Item = String>,
    {
        let mut set = Self::default();
        for (name, codes) in entries {
            let Some(category) = TagCategory::parse(&name) else {
                continue;
            };
            for code in codes {
                let code = code.trim().to_ascii_lowercase();
                if category.is_valid_code(&code) {
                    set.insert(category, code);
                }
            }
        }
        set
    }

    pub fn all_codes(&self) -> Vec<&str> {
        TagCategory::ALL
            .iter()
            .flat_map(|c| self.get(*c).iter().map(String::as_str))
            .collect()
    }
}

/// One line per category listing its codes, used in tagging prompts.
pub fn catalog_reference() -> String {
    TagCategory::ALL
        .iter()
        .map(|c| format!("- {}: {}", c.as_str(), c.codes().join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let mut tags = TagSet::default();
        assert!(tags.insert(TagCategory::Exclusivity, SOLD_OUT));
        assert!(!tags.insert(TagCategory::Exclusivity, SOLD_OUT));
        assert_eq!(tags.exclusivity, vec![SOLD_OUT.to_string()]);
    }

    #[test]
    fn validated_drops_unknown_categories_and_codes() {
        let tags = TagSet::validated(vec![
            ("type".to_string(), vec!["concert".to_string(), "opera".to_string()]),
            ("Vibe".to_string(), vec!["chill".to_string(), "chill".to_string()]),
            ("mood".to_string(), vec!["happy".to_string()]),
        ]);
        assert_eq!(tags.kind, vec!["concert".to_string()]);
        assert_eq!(tags.vibe, vec!["chill".to_string()]);
        assert_eq!(tags.all_codes(), vec!["concert", "chill"]);
    }

    #[test]
    fn every_category_has_its_store_field() {
        assert_eq!(TagCategory::Type.field(), "tags_type");
        assert_eq!(TagCategory::Meta.field(), "tags_meta");
        assert!(catalog_reference().contains("- deals: cheap_flight"));
    }
}
