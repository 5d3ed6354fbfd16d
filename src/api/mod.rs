//! HTTP surface: the public gig listings plus the authenticated admin API.

mod admin;
mod error;
mod extract;
mod public;

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use chrono::NaiveDate;
use chrono_tz::Tz;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use error::ApiError;

use crate::activity::ActivityLog;
use crate::auth::{self, AuthError, Session, TokenIssuer, UserDirectory};
use crate::config;
use crate::db::GigStore;
use crate::extraction::GigPipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: GigPipeline,
    pub users: Arc<UserDirectory>,
    pub tokens: Arc<TokenIssuer>,
    pub tz: Tz,
    pub parser_log: Arc<ActivityLog>,
    pub access_log: Arc<ActivityLog>,
}

impl AppState {
    pub fn new(
        pipeline: GigPipeline,
        users: Arc<UserDirectory>,
        tokens: Arc<TokenIssuer>,
        tz: Tz,
        parser_log: Arc<ActivityLog>,
        access_log: Arc<ActivityLog>,
    ) -> Self {
        Self {
            pipeline,
            users,
            tokens,
            tz,
            parser_log,
            access_log,
        }
    }

    fn store(&self) -> &Arc<dyn GigStore> {
        self.pipeline.store()
    }

    fn today(&self) -> NaiveDate {
        config::today_in(self.tz)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = auth::token_from_headers(&parts.headers).ok_or(AuthError::MissingToken)?;
        Ok(state.tokens.verify(&token)?)
    }
}

pub fn build_router(state: AppState, cors_origin: Option<HeaderValue>) -> Router {
    let router = Router::new()
        .route("/health", get(public::health))
        .route("/gigs/:artist", get(public::gigs_page))
        .route("/api/gigs/:artist", get(public::gigs_json))
        .route("/login", post(public::login))
        .route("/logout", post(public::logout))
        .route("/api/me", get(admin::me))
        .route("/api/admin/gigs", get(admin::list_gigs).post(admin::save_gig))
        .route("/api/admin/gigs/restore", post(admin::restore_gig))
        .route(
            "/api/admin/gigs/:index",
            put(admin::replace_gig).delete(admin::delete_gig),
        )
        .route("/api/admin/parse-gig", post(admin::parse_gig))
        .route("/api/admin/parse-and-add", post(admin::parse_and_add))
        .route("/api/admin/logs", get(admin::parser_log))
        .layer(TraceLayer::new_for_http());

    let router = match cors_origin {
        Some(origin) => router.layer(
            CorsLayer::new()
                .allow_origin(origin)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
                .allow_credentials(true),
        ),
        None => router,
    };

    router.with_state(state)
}
