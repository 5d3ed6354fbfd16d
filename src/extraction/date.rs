use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

// A word, whitespace, then one or two digits not followed by a third.
static MONTH_DAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([A-Za-z]+)\s+([0-9]{1,2})(?:[^0-9]|$)").expect("valid month/day regex")
});

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no month and day found in message")]
pub struct DateNotFound;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDate {
    pub date: NaiveDate,
    /// Exact text the date was read from, trailing delimiter included.
    pub matched: String,
}

impl ResolvedDate {
    pub fn iso(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

/// Finds the first "Month Day" fragment and pins it to `today`'s year, or the
/// next one when that day has already passed.
///
/// Only the first fragment is considered. If its word is not a month the
/// whole lookup fails rather than moving on to later fragments.
pub fn resolve_date(message: &str, today: NaiveDate) -> Result<ResolvedDate, DateNotFound> {
    let caps = MONTH_DAY_RE.captures(message).ok_or(DateNotFound)?;
    let matched = caps.get(0).ok_or(DateNotFound)?.as_str();
    let month_word = caps.get(1).ok_or(DateNotFound)?.as_str();
    let day_text = caps.get(2).ok_or(DateNotFound)?.as_str();

    let month = month_number(month_word).ok_or(DateNotFound)?;
    let day: u32 = day_text.parse().map_err(|_| DateNotFound)?;

    let this_year = NaiveDate::from_ymd_opt(today.year(), month, day).ok_or(DateNotFound)?;
    let date = if this_year < today {
        NaiveDate::from_ymd_opt(today.year() + 1, month, day).ok_or(DateNotFound)?
    } else {
        this_year
    };

    Ok(ResolvedDate {
        date,
        matched: matched.to_string(),
    })
}

/// 1-based month for a full English month name or a prefix of at least three
/// letters (`Mar`, `Sept`), ignoring case.
pub fn month_number(word: &str) -> Option<u32> {
    if word.len() < 3 {
        return None;
    }
    let lowered = word.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|name| name.starts_with(&lowered))
        .map(|idx| idx as u32 + 1)
}

/// Removes the first occurrence of the matched fragment and trims the rest.
pub fn strip_fragment(message: &str, matched: &str) -> String {
    message.replacen(matched, "", 1).trim().to_string()
}
