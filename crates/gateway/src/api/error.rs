//! Shared HTTP error body for the Query/Session Engine (§7): every
//! user-visible failure is `{"error": {"kind", "message", "retryable"}}`,
//! never a bare string, so callers can branch on `kind` the same way a
//! tool caller branches on [`ki_domain::error::ToolErrorKind`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use ki_domain::error::ToolErrorKind;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: String,
    message: String,
    retryable: bool,
}

/// Build the standard error response for the given status/kind/message.
/// `kind` mirrors [`ToolErrorKind`]'s naming so the same vocabulary covers
/// both tool failures and HTTP-surface failures (§7's status-code table).
pub fn api_error(status: StatusCode, kind: ToolErrorKind, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: ErrorDetail {
                kind: kind.to_string(),
                message: message.into(),
                retryable: kind.is_retryable(),
            },
        }),
    )
        .into_response()
}

pub fn validation(message: impl Into<String>) -> Response {
    api_error(StatusCode::BAD_REQUEST, ToolErrorKind::Validation, message)
}

pub fn not_found(message: impl Into<String>) -> Response {
    api_error(StatusCode::NOT_FOUND, ToolErrorKind::NotFound, message)
}

pub fn unauthorized(message: impl Into<String>) -> Response {
    api_error(StatusCode::UNAUTHORIZED, ToolErrorKind::Unauthorized, message)
}

pub fn rate_limited(message: impl Into<String>) -> Response {
    api_error(StatusCode::TOO_MANY_REQUESTS, ToolErrorKind::Throttled, message)
}

/// A session already has a turn in flight plus a queued waiter.
pub fn busy(message: impl Into<String>) -> Response {
    api_error(StatusCode::TOO_MANY_REQUESTS, ToolErrorKind::Throttled, message)
}

pub fn timeout(message: impl Into<String>) -> Response {
    api_error(StatusCode::GATEWAY_TIMEOUT, ToolErrorKind::Timeout, message)
}

pub fn internal(message: impl Into<String>) -> Response {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, ToolErrorKind::Upstream, message)
}
