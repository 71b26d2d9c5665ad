//! Season Derivation and Free-Text Query Analysis
//!
//! Maps a request date onto the Indian cropping calendar (Kharif / Rabi /
//! Zaid), and pulls structured facts out of the farmer's free-text question:
//! an explicitly mentioned month, or a crop named in a "when do I plant X"
//! style phrasing. An explicit month in the query overrides the
//! date-derived season for the rest of the request.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::AdvisorError;
use crate::normalize::title_case;

/// Cropping season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Season {
    Kharif,
    Rabi,
    Zaid,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Kharif => "Kharif",
            Season::Rabi => "Rabi",
            Season::Zaid => "Zaid",
        }
    }

    /// Case-insensitive parse of a season token.
    pub fn parse(s: &str) -> Option<Season> {
        match s.trim().to_lowercase().as_str() {
            "kharif" => Some(Season::Kharif),
            "rabi" => Some(Season::Rabi),
            "zaid" => Some(Season::Zaid),
            _ => None,
        }
    }

    /// Canonical sowing window for the season.
    pub fn sowing_window(&self) -> &'static str {
        match self {
            Season::Kharif => "June–July",
            Season::Rabi => "October–December",
            Season::Zaid => "April–May",
        }
    }

    /// Canonical harvest window for the season.
    pub fn harvest_window(&self) -> &'static str {
        match self {
            Season::Kharif => "September–November",
            Season::Rabi => "February–April",
            Season::Zaid => "July–August",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display string with the season's month span and sowing/harvest windows.
pub fn season_months(season: Season) -> &'static str {
    match season {
        Season::Kharif => "June–October (sowing: June–July, harvesting: Sept–Nov)",
        Season::Rabi => "November–March (sowing: Oct–Dec, harvesting: Feb–Apr)",
        Season::Zaid => "April–May (sowing: Apr–May, harvesting: Jul–Aug)",
    }
}

const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"];

/// Parse a date string against the accepted layouts, then ISO date-time
/// forms as a fallback.
pub fn parse_date(date_str: &str) -> Option<NaiveDate> {
    let trimmed = date_str.trim();
    for layout in DATE_LAYOUTS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, layout) {
            return Some(d);
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.date_naive());
    }
    None
}

/// Month number → season. June–October is Kharif, April–May is Zaid,
/// everything else (November–March) is Rabi.
pub fn season_for_month(month: u32) -> Season {
    match month {
        6..=10 => Season::Kharif,
        4 | 5 => Season::Zaid,
        _ => Season::Rabi,
    }
}

/// Derive the season from a date string. An unparsable date surfaces as a
/// validation failure.
pub fn season_from_date(date_str: &str) -> Result<Season, AdvisorError> {
    let date = parse_date(date_str)
        .ok_or_else(|| AdvisorError::Validation(format!("unrecognized date: {:?}", date_str)))?;
    Ok(season_for_month(date.month()))
}

/// English month name for a date string, if it parses.
pub fn month_name_from_date(date_str: &str) -> Option<String> {
    parse_date(date_str).map(|d| d.format("%B").to_string())
}

const MONTH_NAMES: &[&str] = &[
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

static MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(january|february|march|april|june|july|august|september|october|november|december|jan|feb|mar|apr|may|jun|jul|aug|sept|sep|oct|nov|dec)\b",
    )
    .unwrap()
});

/// First month name or abbreviation mentioned in free text, as the full
/// English month name.
pub fn extract_month(text: &str) -> Option<&'static str> {
    let m = MONTH_RE.find(text)?;
    let prefix = m.as_str().to_lowercase();
    let prefix = &prefix[..3];
    MONTH_NAMES
        .iter()
        .find(|name| name.to_lowercase().starts_with(prefix))
        .copied()
}

/// Month name → season, aligned with `season_for_month`.
pub fn month_to_season(month_name: &str) -> Option<Season> {
    let idx = MONTH_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(month_name.trim()))?;
    Some(season_for_month(idx as u32 + 1))
}

/// "when should I plant X" style phrasings; group 1 captures the crop.
static CROP_QUESTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:what\s+month\s+do\s+i\s+grow|when\s+do\s+i\s+grow|when\s+should\s+i\s+(?:plant|grow)|when\s+to\s+(?:plant|grow)|what\s+month\s+is\s+best\s+to\s+grow)\s+([a-z0-9\s\-&]+?)(?:\s+in\b|\s*\?|$)",
    )
    .unwrap()
});

static CROP_TRAILER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:in|this|next|now|here|there)\b.*$").unwrap());

static CROP_PUNCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s\-&]").unwrap());

/// Crop name mentioned in a "when do I grow X" style question, title-cased
/// for display. None when the query doesn't match any known phrasing.
pub fn extract_crop_name(text: &str) -> Option<String> {
    let caps = CROP_QUESTION_RE.captures(text.trim())?;
    let raw = caps.get(1)?.as_str();
    let no_trailer = CROP_TRAILER_RE.replace(raw, "");
    let cleaned = CROP_PUNCT_RE.replace_all(no_trailer.trim(), "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    Some(title_case(cleaned))
}

/// Season facts derived once per request from the request date, possibly
/// overridden later by an explicit month in the free-text query.
#[derive(Debug, Clone, Serialize)]
pub struct SeasonContext {
    pub season: Season,
    pub season_months: String,
    pub month_name: String,
}

impl SeasonContext {
    pub fn from_date(date_str: &str) -> Result<Self, AdvisorError> {
        let season = season_from_date(date_str)?;
        let month_name = month_name_from_date(date_str).unwrap_or_default();
        Ok(SeasonContext {
            season,
            season_months: season_months(season).to_string(),
            month_name,
        })
    }

    /// If the query names an explicit month, that month and its season
    /// supersede the date-derived values. Returns true when an override
    /// was applied.
    pub fn apply_query_override(&mut self, query: &str) -> bool {
        let Some(month) = extract_month(query) else {
            return false;
        };
        self.month_name = month.to_string();
        if let Some(season) = month_to_season(month) {
            self.season = season;
            self.season_months =
                format!("{} / {}", season.sowing_window(), season.harvest_window());
        }
        true
    }
}
