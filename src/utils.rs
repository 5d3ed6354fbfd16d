use dirs::data_dir;
use std::{
    io,
    path::{Path, PathBuf},
};

use crate::models::ArtistId;

const APP_DIR: &str = "gig-board";

pub fn default_data_root() -> PathBuf {
    let base = data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    base.join(APP_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join("config.json")
}

pub fn users_path(root: &Path) -> PathBuf {
    root.join("users.json")
}

pub fn artist_dir(root: &Path, artist: &ArtistId) -> PathBuf {
    root.join("artists").join(artist.as_str())
}

pub fn gigs_path(root: &Path, artist: &ArtistId) -> PathBuf {
    artist_dir(root, artist).join("gigs.json")
}

pub async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

pub fn parser_log_path(root: &Path) -> PathBuf {
    root.join("logs").join("parser.log")
}

pub fn access_log_path(root: &Path) -> PathBuf {
    root.join("logs").join("access.log")
}

pub fn clean_text(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `input` to at most `max` characters for log lines, marking the cut.
pub fn truncate_for_log(input: &str, max: usize) -> String {
    let trimmed = input.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
