use std::{fs, path::Path, time::Duration};

use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::warn;

use crate::models::{ArtistId, Role};

pub const TOKEN_COOKIE: &str = "token";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("access token required")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("failed to load users: {0}")]
    Users(String),
    #[error("failed to sign token: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    /// Lowercase hex SHA-256 of the password.
    pub password_sha256: String,
    pub role: Role,
    pub artist: ArtistId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UserDirectory {
    #[serde(default)]
    users: Vec<UserRecord>,
}

impl UserDirectory {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self { users }
    }

    /// Loads `{"users": [...]}`. A missing file yields an empty directory.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        if !path.exists() {
            warn!(path = %path.display(), "users file not found; nobody can log in");
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|err| AuthError::Users(err.to_string()))?;
        serde_json::from_str(&contents).map_err(|err| AuthError::Users(err.to_string()))
    }

    pub fn authenticate(&self, username: &str, password: &str) -> Result<&UserRecord, AuthError> {
        let user = self
            .users
            .iter()
            .find(|user| user.username == username)
            .ok_or(AuthError::InvalidCredentials)?;
        if user.password_sha256.to_ascii_lowercase() != password_digest(password) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(user)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

pub fn password_digest(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    artist: ArtistId,
    exp: i64,
}

/// Who a request belongs to, as carried by its token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub username: String,
    pub role: Role,
    pub artist: ArtistId,
}

impl Session {
    /// Editing is limited to admins of the artist in question.
    pub fn require_editor(&self, artist: &ArtistId) -> Result<(), AuthError> {
        if &self.artist != artist {
            return Err(AuthError::Forbidden(format!(
                "session is scoped to {}",
                self.artist
            )));
        }
        if !self.role.can_edit() {
            return Err(AuthError::Forbidden("admin role required".to_string()));
        }
        Ok(())
    }
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user: &UserRecord) -> Result<String, AuthError> {
        let exp = Utc::now().timestamp() + self.ttl.as_secs() as i64;
        self.issue_expiring(user, exp)
    }

    fn issue_expiring(&self, user: &UserRecord, exp: i64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: user.username.clone(),
            role: user.role,
            artist: user.artist.clone(),
            exp,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AuthError::Signing(err.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Session, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;
        Ok(Session {
            username: data.claims.sub,
            role: data.claims.role,
            artist: data.claims.artist,
        })
    }
}

/// Bearer token first, then the `token` cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

pub fn session_cookie(token: &str, ttl: Duration) -> String {
    format!(
        "{TOKEN_COOKIE}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={}",
        ttl.as_secs()
    )
}

pub fn cleared_cookie() -> String {
    format!("{TOKEN_COOKIE}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0")
}
