use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{AppendHeaders, Html, IntoResponse},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::extract::{ApiJson, ApiPath};
use super::{ApiError, AppState};
use crate::auth;
use crate::db::GigStore;
use crate::models::{self, ArtistId, UpcomingGig};
use crate::views;

#[derive(Debug, Deserialize)]
pub(super) struct LoginRequest {
    username: String,
    password: String,
}

pub(super) async fn health() -> &'static str {
    "ok"
}

async fn upcoming_for(state: &AppState, raw: &str) -> Result<(ArtistId, Vec<UpcomingGig>), ApiError> {
    let artist = ArtistId::parse(raw).map_err(|_| ApiError::UnknownArtist(raw.to_string()))?;
    let gigs = state.store().list(&artist).await?;
    let items = models::upcoming(gigs, state.today());
    Ok((artist, items))
}

pub(super) async fn gigs_json(
    State(state): State<AppState>,
    ApiPath(artist): ApiPath<String>,
) -> Result<Json<Vec<UpcomingGig>>, ApiError> {
    let (_, items) = upcoming_for(&state, &artist).await?;
    Ok(Json(items))
}

pub(super) async fn gigs_page(
    State(state): State<AppState>,
    ApiPath(artist): ApiPath<String>,
) -> Result<Html<String>, ApiError> {
    let (artist, items) = upcoming_for(&state, &artist).await?;
    Ok(Html(views::render_gig_page(&artist, &items)))
}

pub(super) async fn login(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = match state.users.authenticate(body.username.trim(), &body.password) {
        Ok(user) => user,
        Err(err) => {
            warn!(username = %body.username, "login rejected");
            return Err(err.into());
        }
    };
    let token = state.tokens.issue(user)?;
    info!(username = %user.username, artist = %user.artist, "login");

    let cookie = auth::session_cookie(&token, state.tokens.ttl());
    Ok((
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(json!({
            "token": token,
            "username": user.username,
            "role": user.role,
            "artist": user.artist,
        })),
    ))
}

pub(super) async fn logout() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        AppendHeaders([(header::SET_COOKIE, auth::cleared_cookie())]),
    )
}
