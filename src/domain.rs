use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MalqError;

/// Rating stored for entries the catalog has not scored yet.
pub const NO_RATING: f64 = -1.0;

pub const TERMINAL_STATUS: &str = "finished_airing";

const NOT_AVAILABLE: &str = "n/a";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(u64);

impl EntryId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn catalog_url(self) -> String {
        format!("https://myanimelist.net/anime/{}", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = MalqError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| MalqError::MalformedInput(format!("not an entry id: {value}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub name: String,
    pub is_complete: bool,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default = "no_rating")]
    pub rating: f64,
    #[serde(default)]
    pub start_period: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip)]
    pub related_entries: Vec<RelatedEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelatedEntry {
    pub entry: Entry,
    pub relation_kind: String,
}

fn no_rating() -> f64 {
    NO_RATING
}

impl Entry {
    /// Missing optional keys fall back to their sentinels. When `with_related`
    /// is set, the record's related list is converted one level deep; related
    /// entries never carry relations of their own.
    pub fn from_record(raw: &Value, with_related: bool) -> Result<Self, MalqError> {
        let id = raw
            .get("id")
            .and_then(Value::as_u64)
            .map(EntryId)
            .ok_or_else(|| MalqError::MalformedRecord("missing numeric id".to_string()))?;

        let related_entries = if with_related {
            related_from_record(raw)?
        } else {
            Vec::new()
        };

        Ok(Self {
            id,
            name: display_name(raw),
            is_complete: raw.get("status").and_then(Value::as_str) == Some(TERMINAL_STATUS),
            length: raw
                .get("num_episodes")
                .and_then(Value::as_u64)
                .and_then(|value| u32::try_from(value).ok()),
            rating: raw
                .get("mean")
                .and_then(Value::as_f64)
                .unwrap_or(NO_RATING),
            start_period: start_period(raw),
            tags: raw
                .get("genres")
                .and_then(Value::as_array)
                .map(|genres| {
                    genres
                        .iter()
                        .filter_map(|genre| genre.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            related_entries,
        })
    }

    pub fn has_rating(&self) -> bool {
        self.rating >= 0.0
    }

    pub fn without_related(&self) -> Self {
        Self {
            related_entries: Vec::new(),
            ..self.clone()
        }
    }
}

fn display_name(raw: &Value) -> String {
    let localized = raw
        .get("alternative_titles")
        .and_then(|titles| titles.get("en"))
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty());
    localized
        .or_else(|| raw.get("title").and_then(Value::as_str))
        .unwrap_or(NOT_AVAILABLE)
        .to_string()
}

fn start_period(raw: &Value) -> Option<String> {
    let season = raw.get("start_season")?;
    let year = season.get("year").and_then(Value::as_u64)?;
    match season.get("season").and_then(Value::as_str) {
        Some(name) => Some(format!("{name} {year}")),
        None => Some(year.to_string()),
    }
}

fn related_from_record(raw: &Value) -> Result<Vec<RelatedEntry>, MalqError> {
    let Some(items) = raw.get("related_anime").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    items
        .iter()
        .map(|item| {
            let node = item
                .get("node")
                .ok_or_else(|| MalqError::MalformedRecord("related item without node".to_string()))?;
            let relation_kind = item
                .get("relation_type_formatted")
                .or_else(|| item.get("relation_type"))
                .and_then(Value::as_str)
                .unwrap_or(NOT_AVAILABLE)
                .to_string();
            Ok(RelatedEntry {
                entry: Entry::from_record(node, false)?,
                relation_kind,
            })
        })
        .collect()
}

/// Rating descending. Unrated entries (`NO_RATING`) land after every rated one.
pub fn by_rating_desc(a: &Entry, b: &Entry) -> Ordering {
    b.rating.total_cmp(&a.rating)
}

pub fn sort_by_rating(entries: &mut [Entry]) {
    entries.sort_by(by_rating_desc);
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.is_complete { '✓' } else { 'X' };
        let rating = if self.has_rating() {
            self.rating.to_string()
        } else {
            NOT_AVAILABLE.to_string()
        };
        let length = self
            .length
            .map(|value| value.to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        // OSC 8 hyperlink: ESC ] 8 ;; url ST text ESC ] 8 ;; ST
        write!(
            f,
            "\x1b]8;;{}\x1b\\{marker} : {} | rated {rating} | {length} episodes\x1b]8;;\x1b\\",
            self.id.catalog_url(),
            self.name
        )
    }
}

impl fmt::Display for RelatedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.relation_kind, self.entry)
    }
}
