use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pagemill_types::PagemillError;
use serde_json::json;

/// HTTP-facing wrapper around the shared error kinds.
///
/// Each kind carries its stable numeric code into the response body; driver
/// detail is attached only outside production mode.
#[derive(Debug)]
pub struct ApiError {
    inner: PagemillError,
    production: bool,
}

impl ApiError {
    pub fn new(inner: PagemillError, production: bool) -> Self {
        Self { inner, production }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.inner.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<PagemillError> for ApiError {
    fn from(inner: PagemillError) -> Self {
        // Production redaction is decided by the environment the binary runs
        // in; handlers construct via `new` when they carry the flag.
        let production = std::env::var("PAGEMILL_ENV")
            .map(|v| v == "production")
            .unwrap_or(false);
        Self { inner, production }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.inner.code();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
                tracing::error!(code, error = %self.inner, "Request failed");
            }
            _ => {
                tracing::warn!(code, error = %self.inner, "Request rejected");
            }
        }

        let message = if self.production {
            // Kind-level message only; no driver detail leaks.
            match &self.inner {
                PagemillError::DbConnection { .. } | PagemillError::DbQuery { .. } => {
                    "storage error".to_string()
                }
                PagemillError::InternalServer { .. } => "internal server error".to_string(),
                other => other.to_string(),
            }
        } else {
            self.inner.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "retryable": self.inner.is_retryable(),
                "status": status.as_u16(),
            }
        }));

        (status, body).into_response()
    }
}

/// Result type alias for handler functions.
pub type ApiResult<T> = Result<T, ApiError>;
