//! HTTP error mapping
//!
//! Every failure is answered as JSON `{error, code}`. Unknown users get
//! `404 user_not_found` so clients can restart onboarding.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rolecall_core::CoreError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.classify().0
    }

    pub fn code(&self) -> &'static str {
        self.classify().1
    }

    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Core(err) => match err {
                CoreError::UserNotFound { .. } => (StatusCode::NOT_FOUND, "user_not_found"),
                CoreError::OrgNotFound { .. } => (StatusCode::NOT_FOUND, "org_not_found"),
                CoreError::UnknownTier { .. } => (StatusCode::BAD_REQUEST, "unknown_tier"),
                CoreError::InvalidTimezone { .. } => (StatusCode::BAD_REQUEST, "invalid_timezone"),
                CoreError::InvalidSession { .. } => (StatusCode::BAD_REQUEST, "invalid_session"),
                CoreError::InvalidField { .. } => (StatusCode::BAD_REQUEST, "invalid_field"),
                CoreError::PersistenceUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "persistence_unavailable")
                }
                CoreError::FileRead { .. }
                | CoreError::FileWrite { .. }
                | CoreError::JsonParse { .. }
                | CoreError::Serialize(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
                CoreError::InvalidConfig { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "invalid_config")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
        }
        (status, Json(json!({ "error": self.to_string(), "code": code }))).into_response()
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
