//! Authentication error types and the error codes shared with clients.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// No, invalid, or otherwise unusable credentials; the distinction does not
/// matter to the caller.
pub const CODE_UNAUTHENTICATED: &str = "UNAUTHENTICATED";

/// Access token specifically expired. Clients react by driving the refresh
/// endpoint instead of logging out.
pub const CODE_TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";

/// Confirm-flow token unknown or past expiry. Deliberately does not say
/// which.
pub const CODE_INVALID_OR_EXPIRED_TOKEN: &str = "INVALID_OR_EXPIRED_TOKEN";

/// Login attempted against an account whose password was never finalized;
/// clients route into the set-password flow instead of showing a generic
/// failure.
pub const CODE_PASSWORD_NOT_SET: &str = "PNS";

/// Rejection produced by the route guard. Never clears cookies: on
/// TOKEN_EXPIRED the refresh cookie must survive for the silent-refresh
/// round trip, and the other cases are handled by logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    Unauthenticated,
    TokenExpired,
}

impl GuardError {
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::Unauthenticated => CODE_UNAUTHENTICATED,
            GuardError::TokenExpired => CODE_TOKEN_EXPIRED,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            GuardError::Unauthenticated => "Not authenticated",
            GuardError::TokenExpired => "Access token expired",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    code: &'static str,
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: self.message(),
                code: self.code(),
            }),
        )
            .into_response()
    }
}
