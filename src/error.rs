use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Stable outward error taxonomy. Every upstream status maps to exactly one
/// kind; callers branch on the serialized code, never on upstream text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    AuthFailed,
    PaymentRequired,
    ModelLoading,
    RateLimited,
    ModelNotFound,
    InvalidRequest,
    ContextLimitExceeded,
    UpstreamUnavailable,
    UpstreamUnknown,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::AuthFailed => "AuthFailed",
            ErrorKind::PaymentRequired => "PaymentRequired",
            ErrorKind::ModelLoading => "ModelLoading",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::ModelNotFound => "ModelNotFound",
            ErrorKind::InvalidRequest => "InvalidRequest",
            ErrorKind::ContextLimitExceeded => "ContextLimitExceeded",
            ErrorKind::UpstreamUnavailable => "UpstreamUnavailable",
            ErrorKind::UpstreamUnknown => "UpstreamUnknown",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorKind::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::ModelLoading => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::ModelNotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidRequest | ErrorKind::ContextLimitExceeded => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::UpstreamUnavailable | ErrorKind::UpstreamUnknown => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    /// Whether re-issuing the same request is reasonable.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::ModelLoading | ErrorKind::RateLimited | ErrorKind::UpstreamUnavailable
        )
    }
}

#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub upstream_status: Option<u16>,
    pub detail: Option<String>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            upstream_status: None,
            detail: None,
        }
    }

    /// Auth rejections carry a fixed message so no verification detail
    /// leaks to the caller.
    pub fn auth_failed() -> Self {
        Self::new(ErrorKind::AuthFailed, "authentication failed")
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn upstream_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamUnavailable, message)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({
            "error": {
                "code": self.kind.code(),
                "message": self.message,
                "details": self.detail,
                "retryable": self.kind.retryable(),
            }
        });
        (self.kind.status(), Json(body)).into_response()
    }
}

/// Pure, total classification of an upstream HTTP outcome.
pub fn classify_upstream(status: u16, body: &str) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::AuthFailed,
        402 => ErrorKind::PaymentRequired,
        404 => ErrorKind::ModelNotFound,
        429 => ErrorKind::RateLimited,
        503 => ErrorKind::ModelLoading,
        400 if mentions_context_limit(body) => ErrorKind::ContextLimitExceeded,
        400 => ErrorKind::InvalidRequest,
        502 | 504 => ErrorKind::UpstreamUnavailable,
        _ => ErrorKind::UpstreamUnknown,
    }
}

pub fn map_upstream_error(status: u16, body: &str) -> AppError {
    let kind = classify_upstream(status, body);
    let message = match kind {
        ErrorKind::ModelLoading => {
            "upstream model is loading, try again shortly".to_string()
        }
        _ => format!("upstream error: {}", status),
    };
    let mut err = AppError::new(kind, message);
    err.upstream_status = Some(status);
    if !body.is_empty() {
        err.detail = Some(body.to_string());
    }
    err
}

/// A 400 on a chat-shaped payload whose body says the model is not a chat
/// model is a dialect mismatch, not a caller error.
pub fn is_dialect_mismatch(status: u16, body: &str) -> bool {
    status == 400 && body.to_ascii_lowercase().contains("not a chat model")
}

fn mentions_context_limit(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("context length") || lower.contains("context_length")
}
