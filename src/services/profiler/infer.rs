use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use super::types::{ProfileThresholds, SemanticType};
use crate::models::{Column, Value};

/// Tokens accepted as a two-valued boolean set (case-insensitive).
pub const BOOLEAN_TOKENS: [&str; 4] = ["true", "false", "yes", "no"];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
    "%d-%m-%Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"];

static DATE_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,4}[-/]\d{1,2}[-/]\d{1,4}(?:[ T]\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:?\d{2})?)?$")
        .expect("date shape pattern is valid")
});

/// Parses a timestamp written in one of the accepted date/datetime layouts.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if !DATE_SHAPE.is_match(s) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn as_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Timestamp(t) => Some(*t),
        Value::Text(s) => parse_datetime(s),
        _ => None,
    }
}

pub fn as_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Text(s) => {
            let lowered = s.trim().to_ascii_lowercase();
            match lowered.as_str() {
                "true" | "yes" => Some(true),
                "false" | "no" => Some(false),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Infers the semantic type of a column: boolean, then datetime, then numeric,
/// then categorical by distinct ratio, text otherwise. An all-missing column is text.
pub fn infer_type(column: &Column, n_rows: usize, thresholds: &ProfileThresholds) -> SemanticType {
    let mut present = column.values.iter().filter(|v| !v.is_missing()).peekable();
    if present.peek().is_none() {
        return SemanticType::Text;
    }

    let present: Vec<&Value> = present.collect();
    if present.iter().all(|v| as_boolean(v).is_some()) {
        return SemanticType::Boolean;
    }
    if present.iter().all(|v| as_datetime(v).is_some()) {
        return SemanticType::Datetime;
    }
    if present.iter().all(|v| v.as_f64().is_some()) {
        return SemanticType::Numeric;
    }

    let ratio = column.distinct_count() as f64 / n_rows.max(1) as f64;
    if ratio < thresholds.categorical_ratio {
        SemanticType::Categorical
    } else {
        SemanticType::Text
    }
}
