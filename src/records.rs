//! Raw records as delivered by the scraping collaborator.
//!
//! Missing values arrive in many shapes: JSON `null`, an absent key, an empty
//! string, or the legacy literal `"NULL"`. All of them become `None` here, so
//! nothing past this module ever sees a sentinel string.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Legacy in-band marker for a missing value.
pub const LEGACY_MISSING: &str = "NULL";

/// One scraped paper, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "scalar")]
    pub title: Option<String>,

    /// Ordered; position 0 is the primary author.
    #[serde(default, deserialize_with = "author_list")]
    pub authors: Vec<String>,

    /// `None` when the source delivered no concept list at all.
    #[serde(default, deserialize_with = "list")]
    pub concepts: Option<Vec<String>>,

    #[serde(default, deserialize_with = "scalar")]
    pub doi: Option<String>,

    #[serde(default, alias = "pdate", deserialize_with = "scalar")]
    pub publication_date: Option<String>,

    #[serde(default, deserialize_with = "scalar")]
    pub publisher: Option<String>,

    #[serde(default, alias = "type", alias = "ptype", deserialize_with = "scalar")]
    pub publication_type: Option<String>,

    #[serde(default, deserialize_with = "scalar")]
    pub venue: Option<String>,

    #[serde(default, alias = "openalex_id", deserialize_with = "scalar")]
    pub external_id: Option<String>,

    #[serde(default, deserialize_with = "list")]
    pub referenced_works: Option<Vec<String>>,
}

impl RawRecord {
    /// Publication date normalised to `YYYY-MM-DD`, if it can be read.
    pub fn normalized_date(&self) -> Option<String> {
        let raw = self.publication_date.as_deref()?;
        match parse_publication_date(raw) {
            Some(date) => Some(date.format("%Y-%m-%d").to_string()),
            None => {
                log::warn!(
                    "unreadable publication date {:?} for {:?}, storing NULL",
                    raw,
                    self.title.as_deref().unwrap_or("<untitled>")
                );
                None
            }
        }
    }
}

/// A batch of raw records from one source (usually one file).
#[derive(Debug, Clone, Default)]
pub struct RawBatch {
    pub source: String,
    pub records: Vec<RawRecord>,
    /// Entries the loader had to drop as malformed.
    pub upstream_failures: usize,
}

impl RawBatch {
    pub fn new(source: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            source: source.into(),
            records,
            upstream_failures: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Accepts `YYYY-MM-DD` or a bare year (read as January 1st).
pub fn parse_publication_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if raw.len() == 4 && raw.bytes().all(|b| b.is_ascii_digit()) {
        let year: i32 = raw.parse().ok()?;
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

fn clean(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == LEGACY_MISSING {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ScalarValue {
    fn into_text(self) -> String {
        match self {
            ScalarValue::Text(s) => s,
            ScalarValue::Int(n) => n.to_string(),
            ScalarValue::Float(n) => n.to_string(),
            ScalarValue::Bool(b) => b.to_string(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListValue {
    Items(Vec<Option<ScalarValue>>),
    Marker(String),
}

fn scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<ScalarValue> = Option::deserialize(deserializer)?;
    Ok(value.and_then(|v| clean(v.into_text())))
}

fn list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<ListValue> = Option::deserialize(deserializer)?;
    match value {
        None => Ok(None),
        Some(ListValue::Marker(marker)) => match clean(marker) {
            None => Ok(None),
            Some(other) => Err(serde::de::Error::custom(format!(
                "expected a list or a missing marker, found {:?}",
                other
            ))),
        },
        Some(ListValue::Items(items)) => Ok(Some(
            items
                .into_iter()
                .flatten()
                .filter_map(|v| clean(v.into_text()))
                .collect(),
        )),
    }
}

fn author_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(list(deserializer)?.unwrap_or_default())
}
