use std::fmt;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Placeholder for a performance time nobody has announced yet.
pub const TBD: &str = "TBD";

static ISO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").expect("valid iso date regex"));
static ARTIST_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]{1,64}$").expect("valid artist id regex"));

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct GigRecord {
    pub date: String, // YYYY-MM-DD
    pub venue: String,
    pub city: String,
    pub time: String, // "9:00 PM" or TBD
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("date {0:?} is not a YYYY-MM-DD calendar date")]
    InvalidDate(String),
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
}

impl GigRecord {
    pub fn new(
        date: impl Into<String>,
        venue: impl Into<String>,
        city: impl Into<String>,
        time: impl Into<String>,
    ) -> Self {
        Self {
            date: date.into(),
            venue: venue.into(),
            city: city.into(),
            time: time.into(),
        }
    }

    /// The single gate every record passes before it is stored or served.
    ///
    /// `time` may be [`TBD`]; venue and city must carry real text.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.parsed_date().is_none() {
            return Err(RecordError::InvalidDate(self.date.clone()));
        }
        for (name, value) in [
            ("venue", &self.venue),
            ("city", &self.city),
            ("time", &self.time),
        ] {
            if value.trim().is_empty() {
                return Err(RecordError::EmptyField(name));
            }
        }
        Ok(())
    }

    pub fn parsed_date(&self) -> Option<NaiveDate> {
        if !ISO_DATE_RE.is_match(&self.date) {
            return None;
        }
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()
    }

    pub fn is_time_tbd(&self) -> bool {
        self.time.trim().eq_ignore_ascii_case(TBD)
    }
}

/// Tenant key. Also a directory name on disk, so the alphabet is closed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtistId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid artist id {0:?}")]
pub struct InvalidArtistId(pub String);

impl ArtistId {
    /// Accepts `metro_jethros` as well as the URL slug `metro-jethros`.
    pub fn parse(raw: &str) -> Result<Self, InvalidArtistId> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        if ARTIST_ID_RE.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(InvalidArtistId(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn slug(&self) -> String {
        self.0.replace('_', "-")
    }
}

impl TryFrom<String> for ArtistId {
    type Error = InvalidArtistId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ArtistId> for String {
    fn from(value: ArtistId) -> Self {
        value.0
    }
}

impl fmt::Display for ArtistId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn can_edit(self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct UpcomingGig {
    pub days_until: i64,
    #[serde(flatten)]
    pub gig: GigRecord,
}

/// Gigs on or after `today`, soonest first. Ties keep insertion order.
pub fn upcoming(gigs: Vec<GigRecord>, today: NaiveDate) -> Vec<UpcomingGig> {
    let mut items: Vec<UpcomingGig> = gigs
        .into_iter()
        .filter_map(|gig| {
            if let Err(err) = gig.validate() {
                warn!(?gig, "skipping stored gig: {err}");
                return None;
            }
            let date = gig.parsed_date()?;
            let days_until = date.signed_duration_since(today).num_days();
            (days_until >= 0).then_some(UpcomingGig { days_until, gig })
        })
        .collect();
    items.sort_by_key(|item| item.days_until);
    items
}
