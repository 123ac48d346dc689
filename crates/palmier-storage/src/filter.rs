//! Typed filter and sort model.
//!
//! Filters render to the PocketBase query syntax (`status = "published" &&
//! date_start < "2026-03-01 00:00:00.000Z"`) and are evaluated directly by the
//! in-memory store with the same semantics: strings compare lexicographically,
//! numbers numerically, a missing field reads as its zero value.

use std::cmp::Ordering;

use serde_json::Value;

use crate::Record;

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Num(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Num(value as f64)
    }
}

impl From<u8> for FilterValue {
    fn from(value: u8) -> Self {
        Self::Num(f64::from(value))
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl FilterValue {
    fn render(&self) -> String {
        match self {
            Self::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Self::Num(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Self::Num(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }

    /// Order a stored value against this operand. `None` when the types differ.
    fn compare(&self, stored: Option<&Value>) -> Option<Ordering> {
        match self {
            Self::Str(s) => {
                let stored = match stored {
                    None | Some(Value::Null) => "",
                    Some(Value::String(v)) => v.as_str(),
                    Some(_) => return None,
                };
                Some(stored.cmp(s.as_str()))
            }
            Self::Num(n) => {
                let stored = match stored {
                    None | Some(Value::Null) => 0.0,
                    Some(Value::Number(v)) => v.as_f64()?,
                    Some(_) => return None,
                };
                stored.partial_cmp(n)
            }
            Self::Bool(b) => {
                let stored = match stored {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(v)) => *v,
                    Some(_) => return None,
                };
                Some(stored.cmp(b))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, FilterValue),
    Ne(String, FilterValue),
    Gte(String, FilterValue),
    Gt(String, FilterValue),
    Lt(String, FilterValue),
    Lte(String, FilterValue),
    /// `~`: case-insensitive substring on strings, any-element match on arrays.
    Contains(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::Ne(field.to_string(), value.into())
    }

    pub fn gte(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::Gte(field.to_string(), value.into())
    }

    pub fn gt(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::Gt(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::Lt(field.to_string(), value.into())
    }

    pub fn lte(field: &str, value: impl Into<FilterValue>) -> Self {
        Self::Lte(field.to_string(), value.into())
    }

    pub fn contains(field: &str, needle: &str) -> Self {
        Self::Contains(field.to_string(), needle.to_string())
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Eq(f, v) => format!("{f} = {}", v.render()),
            Self::Ne(f, v) => format!("{f} != {}", v.render()),
            Self::Gte(f, v) => format!("{f} >= {}", v.render()),
            Self::Gt(f, v) => format!("{f} > {}", v.render()),
            Self::Lt(f, v) => format!("{f} < {}", v.render()),
            Self::Lte(f, v) => format!("{f} <= {}", v.render()),
            Self::Contains(f, needle) => {
                format!("{f} ~ {}", FilterValue::Str(needle.clone()).render())
            }
            Self::And(parts) => render_group(parts, " && "),
            Self::Or(parts) => render_group(parts, " || "),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Eq(f, v) => v.compare(record.get(f)) == Some(Ordering::Equal),
            Self::Ne(f, v) => v.compare(record.get(f)) != Some(Ordering::Equal),
            Self::Gte(f, v) => matches!(
                v.compare(record.get(f)),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Gt(f, v) => v.compare(record.get(f)) == Some(Ordering::Greater),
            Self::Lt(f, v) => v.compare(record.get(f)) == Some(Ordering::Less),
            Self::Lte(f, v) => matches!(
                v.compare(record.get(f)),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Contains(f, needle) => contains(record.get(f), needle),
            Self::And(parts) => parts.iter().all(|p| p.matches(record)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(record)),
        }
    }
}

fn render_group(parts: &[Filter], joiner: &str) -> String {
    parts
        .iter()
        .map(|part| match part {
            Filter::And(_) | Filter::Or(_) => format!("({})", part.render()),
            leaf => leaf.render(),
        })
        .collect::<Vec<_>>()
        .join(joiner)
}

fn contains(stored: Option<&Value>, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    match stored {
        Some(Value::String(s)) => s.to_lowercase().contains(&needle),
        Some(Value::Array(items)) => items.iter().any(|item| {
            item.as_str()
                .is_some_and(|s| s.to_lowercase().contains(&needle))
        }),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            descending: true,
        }
    }

    pub fn render(&self) -> String {
        if self.descending {
            format!("-{}", self.field)
        } else {
            self.field.clone()
        }
    }

    pub fn render_all(sorts: &[Sort]) -> String {
        sorts.iter().map(Sort::render).collect::<Vec<_>>().join(",")
    }

    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let ordering = compare_values(a.get(&self.field), b.get(&self.field));
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn renders_pocketbase_syntax() {
        let filter = Filter::eq("status", "published")
            .and(Filter::gte("date_start", "2026-03-01 00:00:00.000Z"))
            .and(Filter::eq("source_url", "").or(Filter::contains("tags_type", "sport_match")));
        assert_eq!(
            filter.render(),
            r#"status = "published" && date_start >= "2026-03-01 00:00:00.000Z" && (source_url = "" || tags_type ~ "sport_match")"#
        );
        assert_eq!(Filter::gte("interest_score", 80u8).render(), "interest_score >= 80");
        assert_eq!(Filter::eq("title", "say \"hi\"").render(), r#"title = "say \"hi\"""#);
    }

    #[test]
    fn evaluates_comparisons_with_zero_value_defaults() {
        let r = record(json!({
            "status": "published",
            "interest_score": 72,
            "date_start": "2026-03-01 20:45:00.000Z",
            "tags_type": ["sport_match", "outdoor"],
            "title": "OGC Nice vs Lyon"
        }));
        assert!(Filter::eq("status", "published").matches(&r));
        assert!(Filter::ne("status", "expired").matches(&r));
        assert!(Filter::gte("interest_score", 72i64).matches(&r));
        assert!(!Filter::gt("interest_score", 72i64).matches(&r));
        assert!(Filter::lt("date_start", "2026-03-02 00:00:00.000Z").matches(&r));
        assert!(Filter::lte("date_start", "2026-03-01 20:45:00.000Z").matches(&r));
        assert!(Filter::contains("tags_type", "SPORT").matches(&r));
        assert!(Filter::contains("title", "nice vs").matches(&r));
        assert!(Filter::eq("source_url", "").matches(&r));
        assert!(!Filter::eq("interest_score", "72").matches(&r));
        assert!(Filter::eq("x", 1i64).or(Filter::eq("status", "published")).matches(&r));
    }

    #[test]
    fn sorts_missing_values_first() {
        let a = record(json!({"score": 10}));
        let b = record(json!({}));
        assert_eq!(Sort::asc("score").compare(&a, &b), Ordering::Greater);
        assert_eq!(Sort::desc("score").compare(&a, &b), Ordering::Less);
        assert_eq!(
            Sort::render_all(&[Sort::desc("started_at"), Sort::asc("source")]),
            "-started_at,source"
        );
    }
}
