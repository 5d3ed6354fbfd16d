use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ArtistId;
use crate::utils;

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_TIMEZONE: &str = "America/Chicago";
const DEFAULT_TOKEN_TTL_SECS: u64 = 60 * 60;

const DEFAULT_LLM_ENDPOINT: &str = "https://api.openai.com/v1";
const DEFAULT_LLM_MODEL: &str = "gpt-4";
const DEFAULT_LLM_TEMPERATURE: f32 = 0.2;
const DEFAULT_LLM_MAX_TOKENS: u32 = 300;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 20;

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_IMAP_FOLDER: &str = "INBOX";
const DEFAULT_IMAP_SUBJECT: &str = "gig";
const DEFAULT_IMAP_INTERVAL_SECS: u64 = 2 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: PathBuf, reason: String },
    #[error("unknown timezone {0}")]
    Timezone(String),
    #[error("jwt secret is not configured (set JWT_SECRET)")]
    MissingJwtSecret,
    #[error("imap is enabled but {0} is not configured")]
    MissingImapSetting(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub bind: String,
    pub timezone: String,
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: u64,
    pub cors_origin: Option<String>,
    pub llm: LlmConfig,
    pub imap: ImapConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImapConfig {
    pub enabled: bool,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub folder: String,
    pub subject: String,
    /// Tenant that mailed-in gigs are filed under.
    pub artist: Option<String>,
    pub interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            bind: DEFAULT_BIND.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            jwt_secret: None,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            cors_origin: None,
            llm: LlmConfig::default(),
            imap: ImapConfig::default(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            temperature: DEFAULT_LLM_TEMPERATURE,
            max_tokens: DEFAULT_LLM_MAX_TOKENS,
            timeout_secs: DEFAULT_LLM_TIMEOUT_SECS,
        }
    }
}

impl Default for ImapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: None,
            port: DEFAULT_IMAP_PORT,
            user: None,
            password: None,
            folder: DEFAULT_IMAP_FOLDER.to_string(),
            subject: DEFAULT_IMAP_SUBJECT.to_string(),
            artist: None,
            interval_secs: DEFAULT_IMAP_INTERVAL_SECS,
        }
    }
}

impl AppConfig {
    /// Reads the JSON config file, then layers the process environment on top.
    ///
    /// An explicitly named file must exist; the default location may be absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => read_config(path)?,
            None => {
                let path = utils::config_path(&utils::default_data_root());
                if path.exists() {
                    read_config(&path)?
                } else {
                    AppConfig::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("GIGS_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(bind) = lookup("GIGS_BIND") {
            self.bind = bind;
        }
        if let Some(tz) = lookup("GIGS_TIMEZONE") {
            self.timezone = tz;
        }
        if let Some(secret) = lookup("JWT_SECRET") {
            self.jwt_secret = Some(secret);
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            self.cors_origin = Some(origin);
        }

        if let Some(endpoint) = lookup("LLM_ENDPOINT") {
            self.llm.endpoint = endpoint;
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(value) = lookup("LLM_TEMPERATURE") {
            self.llm.temperature = parse_value("LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = lookup("LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_value("LLM_MAX_TOKENS", &value)?;
        }
        if let Some(value) = lookup("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_value("LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = lookup("IMAP_ENABLED") {
            self.imap.enabled = matches!(value.trim(), "1" | "true" | "yes");
        }
        if let Some(host) = lookup("IMAP_HOST") {
            self.imap.host = Some(host);
        }
        if let Some(value) = lookup("IMAP_PORT") {
            self.imap.port = parse_value("IMAP_PORT", &value)?;
        }
        if let Some(user) = lookup("IMAP_USER") {
            self.imap.user = Some(user);
        }
        if let Some(password) = lookup("IMAP_PASSWORD") {
            self.imap.password = Some(password);
        }
        if let Some(folder) = lookup("IMAP_FOLDER") {
            self.imap.folder = folder;
        }
        if let Some(subject) = lookup("IMAP_SUBJECT") {
            self.imap.subject = subject;
        }
        if let Some(artist) = lookup("IMAP_ARTIST") {
            self.imap.artist = Some(artist);
        }
        if let Some(value) = lookup("IMAP_INTERVAL_SECS") {
            self.imap.interval_secs = parse_value("IMAP_INTERVAL_SECS", &value)?;
        }
        Ok(())
    }

    pub fn data_root(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(utils::default_data_root)
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|err| ConfigError::Timezone(format!("{}: {err}", self.timezone)))
    }

    pub fn jwt_secret(&self) -> Result<&str, ConfigError> {
        self.jwt_secret
            .as_deref()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
            .ok_or(ConfigError::MissingJwtSecret)
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Connection settings resolved from an enabled [`ImapConfig`].
#[derive(Debug, Clone)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub folder: String,
    pub subject: String,
    pub artist: ArtistId,
    pub interval: Duration,
}

impl ImapConfig {
    pub fn settings(&self) -> Result<ImapSettings, ConfigError> {
        let host = non_empty(&self.host).ok_or(ConfigError::MissingImapSetting("IMAP_HOST"))?;
        let user = non_empty(&self.user).ok_or(ConfigError::MissingImapSetting("IMAP_USER"))?;
        let password =
            non_empty(&self.password).ok_or(ConfigError::MissingImapSetting("IMAP_PASSWORD"))?;
        let artist_raw =
            non_empty(&self.artist).ok_or(ConfigError::MissingImapSetting("IMAP_ARTIST"))?;
        let artist = ArtistId::parse(&artist_raw).map_err(|_| ConfigError::InvalidValue {
            key: "IMAP_ARTIST",
            value: artist_raw.clone(),
        })?;

        Ok(ImapSettings {
            host,
            port: self.port,
            user,
            password,
            folder: self.folder.clone(),
            subject: self.subject.clone(),
            artist,
            interval: Duration::from_secs(self.interval_secs.max(1)),
        })
    }
}

/// Current calendar date in `tz`.
pub fn today_in(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_value<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

fn read_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    serde_json::from_str(&contents).map_err(|err| ConfigError::Read {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"bind":"0.0.0.0:9000","llm":{"model":"gpt-4o-mini"}}"#).unwrap();

        let config = read_config(&path).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.llm.timeout_secs, DEFAULT_LLM_TIMEOUT_SECS);
        assert_eq!(config.imap.folder, "INBOX");
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            AppConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("JWT_SECRET", "s3cret"),
                ("LLM_TIMEOUT_SECS", "5"),
                ("IMAP_ENABLED", "true"),
                ("IMAP_PORT", "1993"),
            ]))
            .unwrap();
        assert_eq!(config.jwt_secret().unwrap(), "s3cret");
        assert_eq!(config.llm.timeout(), Duration::from_secs(5));
        assert!(config.imap.enabled);
        assert_eq!(config.imap.port, 1993);
    }

    #[test]
    fn bad_numbers_are_reported() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[("LLM_MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "LLM_MAX_TOKENS",
                ..
            }
        ));
    }

    #[test]
    fn blank_jwt_secret_is_missing() {
        let config = AppConfig {
            jwt_secret: Some("   ".into()),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.jwt_secret(),
            Err(ConfigError::MissingJwtSecret)
        ));
    }

    #[test]
    fn timezone_must_be_known() {
        let mut config = AppConfig::default();
        assert!(config.tz().is_ok());
        config.timezone = "Mars/Olympus".into();
        assert!(matches!(config.tz(), Err(ConfigError::Timezone(_))));
    }

    #[test]
    fn imap_settings_require_credentials_and_artist() {
        let mut imap = ImapConfig {
            enabled: true,
            host: Some("imap.mail.me.com".into()),
            user: Some("band@example.com".into()),
            password: Some("pw".into()),
            ..ImapConfig::default()
        };
        assert!(matches!(
            imap.settings(),
            Err(ConfigError::MissingImapSetting("IMAP_ARTIST"))
        ));

        imap.artist = Some("metro-jethros".into());
        let settings = imap.settings().unwrap();
        assert_eq!(settings.artist.as_str(), "metro_jethros");
        assert_eq!(settings.interval, Duration::from_secs(120));
        assert_eq!(settings.subject, "gig");
    }
}
