//! Turning free-text gig announcements into [`GigRecord`]s.
//!
//! The date is read locally (see [`date`]); venue, city and time come from a
//! completion service (see [`fields`]). [`GigPipeline`] strings the two
//! together and commits the result.
//!
//! [`GigRecord`]: crate::models::GigRecord

pub mod date;
pub mod fields;
pub mod pipeline;

use std::fmt;

use chrono::NaiveDate;
use chrono_tz::Tz;
use thiserror::Error;

use crate::config;
use crate::db::StoreError;
use crate::llm::CompletionError;
use crate::models::{ArtistId, RecordError};

pub use date::{resolve_date, DateNotFound, ResolvedDate};
pub use fields::{parse_fields, ExtractedFields};
pub use pipeline::GigPipeline;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("could not find a month and day in the message")]
    DateNotFound,
    #[error("AI response was not a single JSON object")]
    MalformedAiResponse { raw: String },
    #[error("AI response is missing {}", .missing.join(", "))]
    IncompleteExtraction { missing: Vec<&'static str> },
    #[error("extracted gig is invalid: {0}")]
    InvalidRecord(#[from] RecordError),
    #[error("AI service timed out")]
    AiServiceTimeout,
    #[error("AI service unavailable: {0}")]
    AiServiceUnavailable(String),
    #[error("failed to store gig: {0}")]
    Storage(#[from] StoreError),
}

impl ExtractError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::DateNotFound => "date_not_found",
            ExtractError::MalformedAiResponse { .. } => "malformed_ai_response",
            ExtractError::IncompleteExtraction { .. } => "incomplete_extraction",
            ExtractError::InvalidRecord(_) => "invalid_record",
            ExtractError::AiServiceTimeout => "ai_service_timeout",
            ExtractError::AiServiceUnavailable(_) => "ai_service_unavailable",
            ExtractError::Storage(_) => "storage",
        }
    }

    /// Failures where resubmitting the same text may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractError::AiServiceTimeout | ExtractError::AiServiceUnavailable(_)
        )
    }
}

impl From<DateNotFound> for ExtractError {
    fn from(_: DateNotFound) -> Self {
        ExtractError::DateNotFound
    }
}

impl From<CompletionError> for ExtractError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Timeout => ExtractError::AiServiceTimeout,
            CompletionError::Unavailable(reason) => ExtractError::AiServiceUnavailable(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSource {
    Web { username: String },
    Mail { uid: u32 },
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageSource::Web { username } => write!(f, "web:{username}"),
            MessageSource::Mail { uid } => write!(f, "mail:{uid}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub message: String,
    pub artist: ArtistId,
    pub today: NaiveDate,
    pub source: MessageSource,
}

impl ExtractionRequest {
    pub fn new(
        message: impl Into<String>,
        artist: ArtistId,
        today: NaiveDate,
        source: MessageSource,
    ) -> Self {
        Self {
            message: message.into(),
            artist,
            today,
            source,
        }
    }

    /// Request dated "today" in `tz`.
    pub fn dated_now(
        message: impl Into<String>,
        artist: ArtistId,
        tz: Tz,
        source: MessageSource,
    ) -> Self {
        Self::new(message, artist, config::today_in(tz), source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_errors_map_to_retryable_kinds() {
        let timeout = ExtractError::from(CompletionError::Timeout);
        assert_eq!(timeout.kind(), "ai_service_timeout");
        assert!(timeout.is_retryable());

        let down = ExtractError::from(CompletionError::Unavailable("HTTP 503".into()));
        assert_eq!(down.kind(), "ai_service_unavailable");
        assert!(down.is_retryable());

        assert!(!ExtractError::DateNotFound.is_retryable());
    }

    #[test]
    fn incomplete_message_lists_fields() {
        let err = ExtractError::IncompleteExtraction {
            missing: vec!["venue", "city"],
        };
        assert_eq!(err.to_string(), "AI response is missing venue, city");
    }

    #[test]
    fn sources_render_for_logs() {
        assert_eq!(MessageSource::Mail { uid: 42 }.to_string(), "mail:42");
        assert_eq!(
            MessageSource::Web {
                username: "jon".into()
            }
            .to_string(),
            "web:jon"
        );
    }
}
