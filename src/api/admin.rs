use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::extract::{ApiJson, ApiPath};
use super::{ApiError, AppState};
use crate::activity;
use crate::auth::Session;
use crate::db::GigStore;
use crate::extraction::{ExtractionRequest, MessageSource};
use crate::models::{GigRecord, TBD};

#[derive(Debug, Deserialize)]
pub(super) struct MessageBody {
    message: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct ManualGig {
    date: String,
    venue: String,
    city: String,
    #[serde(default)]
    time: Option<String>,
}

impl ManualGig {
    fn into_record(self) -> GigRecord {
        let time = self
            .time
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| TBD.to_string());
        GigRecord::new(self.date.trim(), self.venue.trim(), self.city.trim(), time)
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct RestoreBody {
    gig: GigRecord,
}

/// Stored gig with its position. Records that fail validation are still
/// listed so they can be fixed or deleted by index.
#[derive(Debug, Serialize)]
pub(super) struct IndexedGig {
    index: usize,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    problem: Option<String>,
    #[serde(flatten)]
    gig: GigRecord,
}

impl IndexedGig {
    fn new(index: usize, gig: GigRecord) -> Self {
        let problem = gig.validate().err().map(|err| err.to_string());
        Self {
            index,
            valid: problem.is_none(),
            problem,
            gig,
        }
    }
}

async fn audit(state: &AppState, session: &Session, action: &str) {
    let entry = activity::access_entry(
        &session.username,
        session.artist.as_str(),
        session.role.as_str(),
        action,
    );
    state.access_log.record(&entry).await;
}

fn web_request(
    state: &AppState,
    session: &Session,
    body: MessageBody,
) -> Result<ExtractionRequest, ApiError> {
    if body.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    Ok(ExtractionRequest::dated_now(
        body.message,
        session.artist.clone(),
        state.tz,
        MessageSource::Web {
            username: session.username.clone(),
        },
    ))
}

pub(super) async fn me(session: Session) -> Json<Session> {
    Json(session)
}

pub(super) async fn list_gigs(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<Vec<IndexedGig>>, ApiError> {
    let gigs = state.store().list(&session.artist).await?;
    audit(&state, &session, "listed gigs of").await;
    let items: Vec<IndexedGig> = gigs
        .into_iter()
        .enumerate()
        .map(|(index, gig)| IndexedGig::new(index, gig))
        .collect();
    for item in items.iter().filter(|item| !item.valid) {
        warn!(
            artist = %session.artist,
            index = item.index,
            problem = item.problem.as_deref().unwrap_or_default(),
            "stored gig is invalid"
        );
    }
    Ok(Json(items))
}

/// Parser log entries for the session's artist, as plain text.
pub(super) async fn parser_log(
    State(state): State<AppState>,
    session: Session,
) -> Result<String, ApiError> {
    if let Err(err) = session.require_editor(&session.artist) {
        audit(&state, &session, "denied parser log of").await;
        return Err(err.into());
    }
    let contents = state
        .parser_log
        .read()
        .await
        .map_err(|err| ApiError::Internal(format!("failed to read parser log: {err}")))?;
    audit(&state, &session, "viewed parser log of").await;
    Ok(activity::parser_entries_for(&contents, session.artist.as_str()))
}

/// Extraction preview; nothing is stored.
pub(super) async fn parse_gig(
    State(state): State<AppState>,
    session: Session,
    ApiJson(body): ApiJson<MessageBody>,
) -> Result<Json<GigRecord>, ApiError> {
    session.require_editor(&session.artist)?;
    let request = web_request(&state, &session, body)?;
    let gig = state.pipeline.extract(&request).await?;
    Ok(Json(gig))
}

pub(super) async fn parse_and_add(
    State(state): State<AppState>,
    session: Session,
    ApiJson(body): ApiJson<MessageBody>,
) -> Result<(StatusCode, Json<GigRecord>), ApiError> {
    session.require_editor(&session.artist)?;
    let request = web_request(&state, &session, body)?;
    let gig = state.pipeline.process(&request).await?;
    Ok((StatusCode::CREATED, Json(gig)))
}

pub(super) async fn save_gig(
    State(state): State<AppState>,
    session: Session,
    ApiJson(body): ApiJson<ManualGig>,
) -> Result<(StatusCode, Json<GigRecord>), ApiError> {
    session.require_editor(&session.artist)?;
    let gig = body.into_record();
    gig.validate()?;
    state.store().append(&session.artist, gig.clone()).await?;
    info!(user = %session.username, artist = %session.artist, date = %gig.date, venue = %gig.venue, "gig saved");
    audit(&state, &session, "saved a gig for").await;
    Ok((StatusCode::CREATED, Json(gig)))
}

pub(super) async fn replace_gig(
    State(state): State<AppState>,
    session: Session,
    ApiPath(index): ApiPath<usize>,
    ApiJson(body): ApiJson<ManualGig>,
) -> Result<Json<Value>, ApiError> {
    session.require_editor(&session.artist)?;
    let gig = body.into_record();
    gig.validate()?;
    let previous = state
        .store()
        .replace(&session.artist, index, gig.clone())
        .await?;
    info!(user = %session.username, artist = %session.artist, index, "gig updated");
    audit(&state, &session, &format!("updated gig {index} of")).await;
    Ok(Json(json!({ "gig": gig, "previous": previous })))
}

pub(super) async fn delete_gig(
    State(state): State<AppState>,
    session: Session,
    ApiPath(index): ApiPath<usize>,
) -> Result<Json<Value>, ApiError> {
    session.require_editor(&session.artist)?;
    let deleted = state.store().remove(&session.artist, index).await?;
    info!(user = %session.username, artist = %session.artist, index, venue = %deleted.venue, "gig deleted");
    audit(&state, &session, &format!("deleted gig {index} of")).await;
    Ok(Json(json!({ "deleted_gig": deleted })))
}

/// Undo for a delete: the gig goes back on the end of the list.
pub(super) async fn restore_gig(
    State(state): State<AppState>,
    session: Session,
    ApiJson(body): ApiJson<RestoreBody>,
) -> Result<(StatusCode, Json<GigRecord>), ApiError> {
    session.require_editor(&session.artist)?;
    body.gig.validate()?;
    state
        .store()
        .append(&session.artist, body.gig.clone())
        .await?;
    info!(user = %session.username, artist = %session.artist, date = %body.gig.date, "gig restored");
    audit(&state, &session, "restored a gig for").await;
    Ok((StatusCode::CREATED, Json(body.gig)))
}
