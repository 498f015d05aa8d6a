use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use super::status::PermitStatus;

/// One purchased parking permit as read from its receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermitRecord {
    pub permit_number: String,
    pub plate_number: String,
    pub valid_from: PermitTimestamp,
    pub valid_to: PermitTimestamp,
    #[serde(default)]
    pub barcode_value: Option<String>,
    #[serde(default)]
    pub barcode_label: Option<String>,
    #[serde(default)]
    pub amount_paid: Option<String>,
}

impl PermitRecord {
    /// Last instant the permit is honoured: the end of its `valid_to` day.
    pub fn expires_at(&self) -> NaiveDateTime {
        self.valid_to.date().and_time(end_of_day())
    }

    pub fn status_at(&self, now: NaiveDateTime) -> PermitStatus {
        PermitStatus::classify(self, now)
    }

    /// Whole calendar days from `today` until the `valid_to` day; negative
    /// once expired.
    pub fn days_remaining(&self, today: NaiveDate) -> i64 {
        (self.valid_to.date() - today).num_days()
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// Required fields of a [`PermitRecord`], named as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermitField {
    PermitNumber,
    PlateNumber,
    ValidFrom,
    ValidTo,
}

impl PermitField {
    pub const fn required() -> [Self; 4] {
        [
            Self::PermitNumber,
            Self::PlateNumber,
            Self::ValidFrom,
            Self::ValidTo,
        ]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PermitNumber => "permitNumber",
            Self::PlateNumber => "plateNumber",
            Self::ValidFrom => "validFrom",
            Self::ValidTo => "validTo",
        }
    }
}

impl fmt::Display for PermitField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receipt date with an optional hour:minute, e.g. `Nov 7, 2025: 18:00`.
///
/// Times are kept exactly as printed on the receipt; no timezone is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PermitTimestamp {
    at: NaiveDateTime,
    has_time: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a permit date (expected e.g. 'Nov 7, 2025: 18:00')")]
pub struct TimestampError {
    pub value: String,
}

impl PermitTimestamp {
    pub fn new(date: NaiveDate, time: Option<NaiveTime>) -> Self {
        Self {
            at: date.and_time(time.unwrap_or(NaiveTime::MIN)),
            has_time: time.is_some(),
        }
    }

    /// Accepts `Mon D, YYYY`, optionally followed by `: HH:MM` or `HH:MM`
    /// (24-hour) or `at H:MM AM|PM`. Full month names, `Nov.`, `Sept` and a
    /// missing comma are tolerated.
    pub fn parse(raw: &str) -> Result<Self, TimestampError> {
        let error = || TimestampError {
            value: raw.trim().to_string(),
        };
        let trimmed = raw.trim();

        let (date_part, time) = if let Some(index) = find_ignore_case(trimmed, " at ") {
            let (date_part, rest) = trimmed.split_at(index);
            let compact: String = rest[4..].split_whitespace().collect();
            let time = NaiveTime::parse_from_str(&compact, "%I:%M%p").map_err(|_| error())?;
            (date_part, Some(time))
        } else if let Some((date_part, clock)) = split_clock(trimmed) {
            let time = NaiveTime::parse_from_str(clock, "%H:%M").map_err(|_| error())?;
            (date_part, Some(time))
        } else {
            (trimmed, None)
        };

        let date_text = date_part.replace(',', " ");
        let mut tokens = date_text.split_whitespace();
        let month = tokens.next().map(normalize_month).ok_or_else(error)?;
        let date_text = std::iter::once(month.as_str())
            .chain(tokens)
            .collect::<Vec<_>>()
            .join(" ");
        let date = NaiveDate::parse_from_str(&date_text, "%B %d %Y").map_err(|_| error())?;

        Ok(Self::new(date, time))
    }

    pub fn date(&self) -> NaiveDate {
        self.at.date()
    }

    pub fn time(&self) -> Option<NaiveTime> {
        self.has_time.then(|| self.at.time())
    }

    pub fn as_naive(&self) -> NaiveDateTime {
        self.at
    }
}

/// Splits a trailing `H:MM` clock off the date, along with any `:` between
/// the two.
fn split_clock(value: &str) -> Option<(&str, &str)> {
    let colon = value.rfind(':')?;
    let hour_start = value[..colon]
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .len();
    if hour_start == colon {
        return None;
    }
    let date_part = value[..hour_start].trim_end().trim_end_matches(':');
    Some((date_part, &value[hour_start..]))
}

/// `Nov.` and `Sept` are printed on some receipts; chrono only knows `Nov`
/// and `Sep`.
fn normalize_month(token: &str) -> String {
    let token = token.trim_end_matches('.');
    if token.eq_ignore_ascii_case("sept") {
        return "Sep".to_string();
    }
    token.to_string()
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(needle)
}

impl fmt::Display for PermitTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_time {
            write!(f, "{}", self.at.format("%b %-d, %Y: %H:%M"))
        } else {
            write!(f, "{}", self.at.format("%b %-d, %Y"))
        }
    }
}

impl FromStr for PermitTimestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PermitTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PermitTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
