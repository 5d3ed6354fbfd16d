use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{date, fields, ExtractError, ExtractionRequest};
use crate::activity::{self, ActivityLog, PARSER_INPUT_CHARS, PARSER_OUTPUT_CHARS};
use crate::db::GigStore;
use crate::llm::CompletionService;
use crate::models::GigRecord;
use crate::utils::truncate_for_log;

/// Date normalization, AI field extraction, validation and commit.
///
/// Holds no state of its own between calls; the same text submitted twice
/// yields two stored gigs.
#[derive(Clone)]
pub struct GigPipeline {
    completion: Arc<dyn CompletionService>,
    store: Arc<dyn GigStore>,
    parser_log: Option<Arc<ActivityLog>>,
}

/// One run through the stages, keeping whatever the model replied even when
/// a later stage rejects it.
struct Attempt {
    raw: Option<String>,
    result: Result<GigRecord, ExtractError>,
}

impl GigPipeline {
    pub fn new(completion: Arc<dyn CompletionService>, store: Arc<dyn GigStore>) -> Self {
        Self {
            completion,
            store,
            parser_log: None,
        }
    }

    /// Every outcome, committed or not, is also appended to `log`.
    pub fn with_parser_log(mut self, log: Arc<ActivityLog>) -> Self {
        self.parser_log = Some(log);
        self
    }

    pub fn store(&self) -> &Arc<dyn GigStore> {
        &self.store
    }

    /// Runs everything up to validation without storing anything.
    pub async fn extract(&self, request: &ExtractionRequest) -> Result<GigRecord, ExtractError> {
        let attempt = self.attempt(request).await;
        self.finish(request, &attempt).await;
        attempt.result
    }

    /// Extracts and appends exactly one gig to the artist's list.
    pub async fn process(&self, request: &ExtractionRequest) -> Result<GigRecord, ExtractError> {
        let mut attempt = self.attempt(request).await;
        if let Ok(gig) = &attempt.result {
            if let Err(err) = self.store.append(&request.artist, gig.clone()).await {
                attempt.result = Err(err.into());
            }
        }

        if let Ok(gig) = &attempt.result {
            info!(
                source = %request.source,
                artist = %request.artist,
                date = %gig.date,
                venue = %gig.venue,
                city = %gig.city,
                time = %gig.time,
                "gig committed"
            );
        }
        self.finish(request, &attempt).await;
        attempt.result
    }

    async fn attempt(&self, request: &ExtractionRequest) -> Attempt {
        let mut raw = None;
        let result = self.run_stages(request, &mut raw).await;
        Attempt { raw, result }
    }

    async fn run_stages(
        &self,
        request: &ExtractionRequest,
        raw_reply: &mut Option<String>,
    ) -> Result<GigRecord, ExtractError> {
        let resolved = date::resolve_date(&request.message, request.today)?;
        debug!(
            source = %request.source,
            date = %resolved.iso(),
            matched = %resolved.matched,
            "date resolved"
        );

        let stripped = date::strip_fragment(&request.message, &resolved.matched);
        let raw = fields::request_fields(self.completion.as_ref(), &stripped).await?;
        debug!(
            source = %request.source,
            output = %truncate_for_log(&raw, PARSER_OUTPUT_CHARS),
            "fields returned"
        );
        let extracted = fields::parse_fields(raw_reply.insert(raw))?;

        let gig = GigRecord {
            date: resolved.iso(),
            venue: extracted.venue,
            city: extracted.city,
            time: extracted.time,
        };
        gig.validate()?;
        Ok(gig)
    }

    async fn finish(&self, request: &ExtractionRequest, attempt: &Attempt) {
        let output = match &attempt.result {
            Ok(gig) => serde_json::to_string(gig).unwrap_or_else(|err| err.to_string()),
            Err(err) => {
                log_rejection(request, err, attempt.raw.as_deref());
                match &attempt.raw {
                    Some(raw) => format!("{}: {err} | reply: {raw}", err.kind()),
                    None => format!("{}: {err}", err.kind()),
                }
            }
        };
        if let Some(log) = &self.parser_log {
            let source = request.source.to_string();
            let entry = activity::parser_entry(
                &source,
                request.artist.as_str(),
                &request.message,
                &output,
            );
            log.record(&entry).await;
        }
    }
}

fn log_rejection(request: &ExtractionRequest, err: &ExtractError, raw: Option<&str>) {
    warn!(
        source = %request.source,
        artist = %request.artist,
        kind = err.kind(),
        input = %truncate_for_log(&request.message, PARSER_INPUT_CHARS),
        output = %raw.map(|raw| truncate_for_log(raw, PARSER_OUTPUT_CHARS)).unwrap_or_default(),
        error = %err,
        "gig extraction rejected"
    );
}
