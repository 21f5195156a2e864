//! Canonical `YYYYMMDD` day stamps for capture directories and artifacts.
//!
//! A name that matches the strict `YYYY-MM-DD` pattern always wins over the
//! entry's modification time: names survive copies and syncs, mtimes do not.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Days, Local, NaiveDate, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::SystemTime;

static NAME_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DayStamp(u32);

impl DayStamp {
    pub const fn new(yyyymmdd: u32) -> Self {
        Self(yyyymmdd)
    }
}

impl fmt::Display for DayStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameDate {
    Parsed(DayStamp),
    Unparsed,
}

/// Parse a strict `YYYY-MM-DD` name. No calendar validation: `2024-13-40`
/// parses to `20241340`.
pub fn parse_name(name: &str) -> NameDate {
    if !NAME_DATE_RE.is_match(name) {
        return NameDate::Unparsed;
    }
    let digits = name.replace('-', "");
    match digits.parse::<u32>() {
        Ok(value) => NameDate::Parsed(DayStamp(value)),
        Err(_) => NameDate::Unparsed,
    }
}

/// Name used for classification: the file stem, so `2024-03-05.mp4` and the
/// directory `2024-03-05` classify alike.
pub fn entry_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn stamp_for_date(date: NaiveDate) -> DayStamp {
    match parse_name(&date.format("%Y-%m-%d").to_string()) {
        NameDate::Parsed(stamp) => stamp,
        NameDate::Unparsed => {
            let raw = date.format("%Y%m%d").to_string();
            DayStamp(raw.parse::<u32>().unwrap_or(0))
        }
    }
}

fn date_minus_days(date: NaiveDate, days: u64) -> NaiveDate {
    date.checked_sub_days(Days::new(days))
        .unwrap_or(NaiveDate::MIN)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Clock {
    #[default]
    Local,
    Zone(Tz),
}

impl Clock {
    pub fn from_timezone(name: &str) -> Result<Self> {
        let trimmed = name.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }
        let tz = trimmed
            .parse::<Tz>()
            .map_err(|err| anyhow!("unknown timezone `{trimmed}`: {err}"))?;
        Ok(Self::Zone(tz))
    }

    fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Local => instant.with_timezone(&Local).date_naive(),
            Self::Zone(tz) => instant.with_timezone(tz).date_naive(),
        }
    }

    pub fn today(&self) -> DayStamp {
        stamp_for_date(self.date_of(Utc::now()))
    }

    pub fn today_minus_days(&self, days: u64) -> DayStamp {
        stamp_for_date(date_minus_days(self.date_of(Utc::now()), days))
    }

    pub fn stamp_for_mtime(&self, mtime: SystemTime) -> DayStamp {
        stamp_for_date(self.date_of(DateTime::<Utc>::from(mtime)))
    }

    pub fn classify(&self, name: &str, fallback_mtime: SystemTime) -> DayStamp {
        match parse_name(name) {
            NameDate::Parsed(stamp) => stamp,
            NameDate::Unparsed => self.stamp_for_mtime(fallback_mtime),
        }
    }

    /// Classify `name`, reading the mtime of `path` only when the name does
    /// not carry a date.
    pub fn classify_entry(&self, name: &str, path: &Path) -> Result<DayStamp> {
        if let NameDate::Parsed(stamp) = parse_name(name) {
            return Ok(stamp);
        }
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|err| crate::error::MeyemError::filesystem(path, err))?;
        Ok(self.stamp_for_mtime(modified))
    }
}
