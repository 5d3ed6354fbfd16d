//! Gig listings per artist, fed by free-text announcements.
//!
//! Announcements arrive through the admin API or a watched mailbox and go
//! through [`extraction::GigPipeline`] before landing in the artist's list.

pub mod activity;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod extraction;
pub mod llm;
pub mod mail;
pub mod models;
pub mod utils;
pub mod views;

#[cfg(test)]
mod test_support;

use std::{path::Path, sync::Arc, time::Duration};

use activity::ActivityLog;
use anyhow::Context;
use axum::http::HeaderValue;
use tracing::{error, info};

use api::AppState;
use auth::{TokenIssuer, UserDirectory};
use config::AppConfig;
use db::{GigStore, JsonGigStore};
use extraction::GigPipeline;
use llm::{CompletionService, LlmClient};
use models::ArtistId;

/// Serves the HTTP API, plus the mail poller when IMAP is enabled, until
/// ctrl-c.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let root = config.data_root();
    let tz = config.tz()?;
    let secret = config.jwt_secret()?;

    let store: Arc<dyn GigStore> = Arc::new(JsonGigStore::new(root.clone()));
    let completion: Arc<dyn CompletionService> =
        Arc::new(LlmClient::from_config(&config.llm).context("failed to build LLM client")?);
    let parser_log = Arc::new(ActivityLog::new(utils::parser_log_path(&root)));
    let access_log = Arc::new(ActivityLog::new(utils::access_log_path(&root)));
    let pipeline = GigPipeline::new(completion, store).with_parser_log(parser_log.clone());

    let users = UserDirectory::load(&utils::users_path(&root))?;
    let tokens = TokenIssuer::new(secret, Duration::from_secs(config.token_ttl_secs));
    info!(
        data_dir = %root.display(),
        users = users.len(),
        timezone = %tz,
        model = %config.llm.model,
        parser_log = %utils::parser_log_path(&root).display(),
        "gig board starting"
    );

    let poller = if config.imap.enabled {
        let settings = config.imap.settings()?;
        Some(mail::spawn_poller(settings, pipeline.clone(), tz))
    } else {
        None
    };

    let cors = config
        .cors_origin
        .as_deref()
        .map(HeaderValue::from_str)
        .transpose()
        .context("invalid CORS origin")?;

    let state = AppState::new(
        pipeline,
        Arc::new(users),
        Arc::new(tokens),
        tz,
        parser_log,
        access_log,
    );
    let app = api::build_router(state, cors);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(poller) = poller {
        poller.abort();
    }
    info!("gig board stopped");
    Ok(())
}

/// Seeds `artist` from a legacy bare-array gigs file.
pub async fn import_legacy(config: &AppConfig, artist: &ArtistId, path: &Path) -> anyhow::Result<usize> {
    let store = JsonGigStore::new(config.data_root());
    let count = store
        .import_legacy(artist, path)
        .await
        .with_context(|| format!("failed to import {}", path.display()))?;
    info!(
        data_dir = %store.root().display(),
        %artist,
        count,
        "legacy gigs imported"
    );
    Ok(count)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
