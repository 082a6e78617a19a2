//! Error types for the proxy.
//!
//! Every failure a client can see goes through `ProxyError`, which renders
//! as a JSON body `{ "error": <code>, "detail": <string|null> }`. Upstream
//! response bodies never leak into `detail`; they are logged instead.

use axum::Json;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

pub const RETRY_AFTER: &str = "retry-after";
pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Malformed or invalid client input.
    #[error("{0}")]
    BadRequest(String),

    /// Rate limit exceeded for the caller's identity.
    #[error("too many requests, retry in {retry_after}s")]
    TooManyRequests { retry_after: u64, limit: u32 },

    /// Upstream did not answer within the configured timeout.
    #[error("upstream request timed out")]
    UpstreamTimeout,

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    /// Upstream could not be reached or sent something unreadable.
    #[error("upstream request failed: {0}")]
    Upstream(String),

    /// No API key configured on the server.
    #[error("upstream API key is not configured")]
    NotConfigured,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub detail: Option<String>,
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamStatus(_) | ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "bad_request",
            ProxyError::TooManyRequests { .. } => "too_many_requests",
            ProxyError::UpstreamTimeout => "upstream_timeout",
            ProxyError::UpstreamStatus(_) | ProxyError::Upstream(_) => "upstream_error",
            ProxyError::NotConfigured => "not_configured",
            ProxyError::Internal(_) => "internal_error",
        }
    }

    // What the client is allowed to read about the failure
    fn public_detail(&self) -> Option<String> {
        match self {
            ProxyError::BadRequest(msg) => Some(msg.clone()),
            ProxyError::TooManyRequests { .. } => Some(self.to_string()),
            ProxyError::UpstreamTimeout => Some(self.to_string()),
            ProxyError::UpstreamStatus(_) | ProxyError::Upstream(_) => {
                Some("upstream service unavailable".to_string())
            }
            ProxyError::NotConfigured => Some("service is not configured".to_string()),
            ProxyError::Internal(_) => None,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match &self {
            ProxyError::Internal(msg) => tracing::error!(%msg, "internal server error"),
            ProxyError::NotConfigured => tracing::error!("request refused: no upstream API key"),
            _ => {}
        }

        let body = ErrorBody {
            error: self.code().to_string(),
            detail: self.public_detail(),
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let ProxyError::TooManyRequests { retry_after, limit } = self {
            let headers = response.headers_mut();
            headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from_static("0"));
        }

        response
    }
}

impl From<axum::extract::rejection::JsonRejection> for ProxyError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ProxyError::BadRequest(rejection.body_text())
    }
}
