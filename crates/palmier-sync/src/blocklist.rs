use regex::{Regex, RegexBuilder};

use crate::config::ConfigError;

/// Topics the audience does not want in the catalog. Matched
/// case-insensitively against title and description.
pub const DEFAULT_PATTERNS: &[&str] = &[
    r"\bart\s+contemporain\b",
    r"\bcontemporary\s+art\b",
    r"\bvernissage\b",
    r"\byoga\b",
    r"\bm[ée]ditation\b",
    r"\bbien[\s-]?[êe]tre\b",
    r"\bwellness\b",
    r"\bsophrologie\b",
    r"\bseniors?\b",
    r"\bthé\s+dansant\b",
    r"\bsalon\s+du\s+mariage\b",
    r"\bwedding\s+fair\b",
    r"\bsalon\s+(?:du\s+)?b[ée]b[ée]\b",
    r"\bbrocante\b",
    r"\bvide[\s-]?greniers?\b",
    r"\bhard\s*techno\b",
    r"\bhardstyle\b",
    r"\bgabber\b",
    r"\bmanifestation\b",
    r"\brassemblement\s+politique\b",
    r"\bmeeting\s+politique\b",
    r"\bportes?\s+ouvertes?\b",
];

#[derive(Debug, Clone)]
pub struct Blocklist {
    rules: Vec<Regex>,
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

impl Blocklist {
    pub fn new<I, S>(patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = patterns
            .into_iter()
            .map(|p| compile(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Default topics plus extra patterns from configuration.
    pub fn with_defaults(extra: &[String]) -> Result<Self, ConfigError> {
        Self::new(
            DEFAULT_PATTERNS
                .iter()
                .copied()
                .chain(extra.iter().map(String::as_str)),
        )
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// First rule matching `text`, if any.
    pub fn matching_rule(&self, text: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| rule.is_match(text))
            .map(Regex::as_str)
    }

    pub fn is_blocked(&self, text: &str) -> bool {
        self.matching_rule(text).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
