use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use tracing::error;

use crate::auth::AuthError;
use crate::db::StoreError;
use crate::extraction::ExtractError;
use crate::models::RecordError;

/// Everything a handler can fail with, rendered as
/// `{"error": kind, "message": text, ...details}`.
#[derive(Debug)]
pub enum ApiError {
    Extract(ExtractError),
    Auth(AuthError),
    Store(StoreError),
    Invalid(RecordError),
    UnknownArtist(String),
    BadRequest(String),
    /// Body or path the extractors could not read.
    Rejected {
        status: StatusCode,
        kind: &'static str,
        message: String,
    },
    Internal(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            kind: "invalid_body",
            message: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Rejected {
            status: rejection.status(),
            kind: "invalid_path",
            message: rejection.body_text(),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        ApiError::Extract(err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(reason) => ApiError::Invalid(reason),
            other => ApiError::Store(other),
        }
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        ApiError::Invalid(err)
    }
}

struct ErrorBody {
    status: StatusCode,
    kind: &'static str,
    message: String,
    details: Map<String, Value>,
}

impl ErrorBody {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            details: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }
}

fn extract_body(err: ExtractError) -> ErrorBody {
    let kind = err.kind();
    match err {
        ExtractError::DateNotFound => ErrorBody::new(StatusCode::BAD_REQUEST, kind, err.to_string()),
        ExtractError::MalformedAiResponse { ref raw } => {
            let raw = raw.clone();
            ErrorBody::new(StatusCode::BAD_GATEWAY, kind, err.to_string()).with("raw", Value::String(raw))
        }
        ExtractError::IncompleteExtraction { ref missing } => {
            let missing = json!(missing);
            ErrorBody::new(StatusCode::UNPROCESSABLE_ENTITY, kind, err.to_string())
                .with("missing", missing)
        }
        ExtractError::InvalidRecord(ref reason) => {
            error!("extraction produced an invalid gig: {reason}");
            ErrorBody::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                kind,
                "extracted gig failed validation",
            )
        }
        ExtractError::AiServiceTimeout => {
            ErrorBody::new(StatusCode::GATEWAY_TIMEOUT, kind, err.to_string())
        }
        ExtractError::AiServiceUnavailable(_) => {
            ErrorBody::new(StatusCode::BAD_GATEWAY, kind, "AI service unavailable")
        }
        ExtractError::Storage(ref source) => {
            error!("failed to store gig: {source}");
            ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, kind, "failed to store gig")
        }
    }
}

fn auth_body(err: AuthError) -> ErrorBody {
    match err {
        AuthError::InvalidCredentials => {
            ErrorBody::new(StatusCode::UNAUTHORIZED, "invalid_credentials", err.to_string())
        }
        AuthError::MissingToken => {
            ErrorBody::new(StatusCode::UNAUTHORIZED, "unauthorized", err.to_string())
        }
        AuthError::InvalidToken => {
            ErrorBody::new(StatusCode::UNAUTHORIZED, "invalid_token", err.to_string())
        }
        AuthError::Forbidden(_) => ErrorBody::new(StatusCode::FORBIDDEN, "forbidden", err.to_string()),
        AuthError::Users(_) | AuthError::Signing(_) => {
            error!("auth failure: {err}");
            ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "authentication failed")
        }
    }
}

fn store_body(err: StoreError) -> ErrorBody {
    match err {
        StoreError::IndexOutOfRange { index, .. } => {
            ErrorBody::new(StatusCode::NOT_FOUND, "gig_not_found", err.to_string())
                .with("index", json!(index))
        }
        StoreError::Invalid(reason) => {
            ErrorBody::new(StatusCode::BAD_REQUEST, "invalid_gig", reason.to_string())
        }
        StoreError::Io { .. } | StoreError::Corrupt { .. } => {
            error!("storage failure: {err}");
            ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "storage", "storage failure")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self {
            ApiError::Extract(err) => extract_body(err),
            ApiError::Auth(err) => auth_body(err),
            ApiError::Store(err) => store_body(err),
            ApiError::Invalid(reason) => {
                ErrorBody::new(StatusCode::BAD_REQUEST, "invalid_gig", reason.to_string())
            }
            ApiError::UnknownArtist(raw) => ErrorBody::new(
                StatusCode::NOT_FOUND,
                "unknown_artist",
                format!("no artist named {raw:?}"),
            ),
            ApiError::BadRequest(message) => {
                ErrorBody::new(StatusCode::BAD_REQUEST, "bad_request", message)
            }
            ApiError::Rejected {
                status,
                kind,
                message,
            } => ErrorBody::new(status, kind, message),
            ApiError::Internal(reason) => {
                error!("request failed: {reason}");
                ErrorBody::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
            }
        };

        let mut payload = Map::new();
        payload.insert("error".to_string(), Value::String(body.kind.to_string()));
        payload.insert("message".to_string(), Value::String(body.message));
        payload.extend(body.details);

        (body.status, Json(Value::Object(payload))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn internal_failures_hide_details() {
        let (status, body) = render(ApiError::Extract(ExtractError::InvalidRecord(
            RecordError::EmptyField("venue"),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "invalid_record");
        assert_eq!(body["message"], "extracted gig failed validation");

        let (status, body) = render(ApiError::Extract(ExtractError::AiServiceUnavailable(
            "HTTP 401: bad key sk-123".into(),
        )))
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(!body["message"].as_str().unwrap().contains("sk-123"));
    }

    #[tokio::test]
    async fn store_validation_is_a_client_error() {
        let (status, body) = render(ApiError::from(StoreError::Invalid(
            RecordError::EmptyField("city"),
        )))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_gig");
        assert_eq!(body["message"], "city must not be empty");
    }
}
