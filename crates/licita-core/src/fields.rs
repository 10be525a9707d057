//! Tolerant scalar fields: codes, monetary amounts, and dates.
//!
//! Producers of the feed are inconsistent about date layouts and decimal
//! separators. None of the parsers here fail: an unparseable value keeps its
//! raw text and falls back to a zero sentinel so the enclosing entry still
//! decodes.

use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use tracing::trace;

use crate::FeedError;
use crate::xml::XmlNode;

/// A coded value with its code-list attributes (`listURI`, `name`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Code {
    pub value: String,
    pub list_uri: String,
    pub name: String,
    pub scheme_name: String,
    pub language_id: String,
    pub list_version_id: String,
}

impl Code {
    pub fn from_node(node: &XmlNode) -> Self {
        let attr = |name: &str| node.attr(name).unwrap_or_default().to_string();
        Self {
            value: node.text().to_string(),
            list_uri: attr("listURI"),
            name: attr("name"),
            scheme_name: attr("schemeName"),
            language_id: attr("languageID"),
            list_version_id: attr("listVersionID"),
        }
    }

    /// Code at `path` below `node`, or an empty code when absent.
    pub fn at(node: &XmlNode, path: &[&str]) -> Self {
        node.at(path).map(Self::from_node).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// A monetary amount as published, plus its best-effort numeric value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Amount {
    pub currency: String,
    pub raw: String,
    /// `0.0` when `raw` is empty or not a number.
    pub value: f64,
}

impl Amount {
    pub fn parse(currency: &str, raw: &str) -> Self {
        let raw = raw.trim();
        let value = if raw.is_empty() {
            0.0
        } else {
            raw.replace(',', ".").parse::<f64>().unwrap_or_else(|_| {
                trace!(raw, "unparseable amount");
                0.0
            })
        };
        Self {
            currency: currency.to_string(),
            raw: raw.to_string(),
            value,
        }
    }

    pub fn from_node(node: &XmlNode) -> Self {
        Self::parse(node.attr("currencyID").unwrap_or_default(), node.text())
    }

    pub fn at(node: &XmlNode, path: &[&str]) -> Self {
        node.at(path).map(Self::from_node).unwrap_or_default()
    }
}

static DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4}-\d{2}-\d{2})").expect("static regex"));

/// A calendar date (`xsd:date`), tolerant of zone suffixes and full timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateOnly {
    /// Midnight of the date in UTC; [`DateTime::<Utc>::MIN_UTC`] when invalid.
    pub time: DateTime<Utc>,
    pub valid: bool,
    pub raw: String,
}

impl Default for DateOnly {
    fn default() -> Self {
        Self {
            time: DateTime::<Utc>::MIN_UTC,
            valid: false,
            raw: String::new(),
        }
    }
}

impl DateOnly {
    /// Try each layout in turn: plain date, date with zone, RFC 3339,
    /// naive timestamp, and finally any leading `YYYY-MM-DD`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let mut date = Self {
            raw: raw.to_string(),
            ..Self::default()
        };
        if raw.is_empty() {
            return date;
        }

        let parsed = parse_plain_date(raw)
            .or_else(|| parse_zoned_date(raw))
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            })
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                    .ok()
                    .map(|t| t.and_utc())
            })
            .or_else(|| {
                DATE_PREFIX
                    .captures(raw)
                    .and_then(|caps| parse_plain_date(&caps[1]))
            });

        match parsed {
            Some(time) => {
                date.time = time;
                date.valid = true;
            }
            None => trace!(raw, "unparseable date, left invalid"),
        }
        date
    }

    pub fn at(node: &XmlNode, path: &[&str]) -> Self {
        node.at(path)
            .map(|n| Self::parse(n.text()))
            .unwrap_or_default()
    }

    /// The parsed instant, if the date was valid.
    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.valid.then_some(self.time)
    }
}

fn parse_plain_date(s: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// `2024-10-07Z` or `2024-10-07+02:00`: midnight in the given offset.
fn parse_zoned_date(s: &str) -> Option<DateTime<Utc>> {
    if s.len() <= 10 || !s.is_char_boundary(10) {
        return None;
    }
    let (date, zone) = s.split_at(10);
    let midnight = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)?;
    let offset = if zone == "Z" {
        FixedOffset::east_opt(0)?
    } else {
        parse_offset(zone)?
    };
    offset
        .from_local_datetime(&midnight)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let (sign, rest) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    if hours.len() != 2 || minutes.len() != 2 {
        return None;
    }
    let secs = hours.parse::<i32>().ok()? * 3600 + minutes.parse::<i32>().ok()? * 60;
    FixedOffset::east_opt(sign * secs)
}

/// Parse an RFC 3339 timestamp (`updated`, `when`), with or without fractions.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, FeedError> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| FeedError::InvalidTimestamp(raw.to_string()))
}
