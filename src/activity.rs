//! Append-only text logs kept under the data directory: every parser outcome
//! and every admin access.

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::warn;

use crate::utils::{self, truncate_for_log};

pub const PARSER_INPUT_CHARS: usize = 300;
pub const PARSER_OUTPUT_CHARS: usize = 500;

pub struct ActivityLog {
    path: PathBuf,
    write: Mutex<()>,
}

impl ActivityLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &str) -> io::Result<()> {
        let _guard = self.write.lock().await;
        utils::ensure_parent(&self.path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await
    }

    /// Appends, logging instead of failing; callers never block on the log.
    pub async fn record(&self, entry: &str) {
        if let Err(err) = self.append(entry).await {
            warn!(path = %self.path.display(), "failed to write activity log: {err}");
        }
    }

    /// Whole log; an absent file reads as empty.
    pub async fn read(&self) -> io::Result<String> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(err),
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

const ENTRY_END: &str = "\n---\n";

pub fn parser_entry(source: &str, artist: &str, input: &str, output: &str) -> String {
    format!(
        "[{}] [{}] [{artist}]\nInput: {}\nOutput: {}\n{ENTRY_END}",
        timestamp(),
        source.to_uppercase(),
        truncate_for_log(input, PARSER_INPUT_CHARS),
        truncate_for_log(output, PARSER_OUTPUT_CHARS),
    )
}

/// Parser entries whose header names `artist`, in log order.
pub fn parser_entries_for(contents: &str, artist: &str) -> String {
    let tag = format!("[{artist}]");
    contents
        .split_inclusive(ENTRY_END)
        .filter(|entry| entry.lines().next().is_some_and(|header| header.ends_with(&tag)))
        .collect()
}

pub fn access_entry(username: &str, artist: &str, role: &str, action: &str) -> String {
    format!("[{}] {username} {action} {artist} as {role}\n", timestamp())
}
