//! Axum extractor implementing the route guard.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::cookie::{ACCESS_COOKIE_NAME, get_cookie};
use super::errors::GuardError;
use super::state::HasAuthState;
use crate::jwt::{Principal, TokenError};

/// Extractor for API endpoints that require an authenticated caller.
///
/// Reads and verifies the access cookie, nothing more: no database access,
/// no refresh attempt, no cookie mutation. Handlers receive the decoded
/// [`Principal`] and do their own role checks.
pub struct RequireAuth(pub Principal);

impl<S> FromRequestParts<S> for RequireAuth
where
    S: HasAuthState + Send + Sync,
{
    type Rejection = GuardError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token =
            get_cookie(&parts.headers, ACCESS_COOKIE_NAME).ok_or(GuardError::Unauthenticated)?;

        match state.codec().verify_access(token) {
            Ok(principal) => Ok(RequireAuth(principal)),
            Err(TokenError::Expired) => Err(GuardError::TokenExpired),
            Err(_) => Err(GuardError::Unauthenticated),
        }
    }
}
