//! Session management API endpoints.
//!
//! - GET `/` - List the caller's active device sessions
//! - DELETE `/{id}` - Revoke one of the caller's sessions
//!
//! The server-side view of multi-device login: one row per device, marked
//! current by comparing the refresh cookie's hash against the stored one.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, request::Parts},
    response::IntoResponse,
    routing::{delete, get},
};
use serde::Serialize;
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::auth::{CODE_UNAUTHENTICATED, REFRESH_COOKIE_NAME, RequireAuth, get_cookie};
use crate::db::{Database, User, hash_token};
use crate::impl_has_auth_state;
use crate::jwt::{Principal, TokenCodec};

#[derive(Clone)]
pub struct SessionsState {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
}

impl_has_auth_state!(SessionsState);

pub fn router(state: SessionsState) -> Router {
    Router::new()
        .route("/", get(list_sessions))
        .route("/{id}", delete(revoke_session))
        .with_state(state)
}

#[derive(Serialize)]
struct SessionInfo {
    id: i64,
    device_info: Option<String>,
    ip_address: Option<String>,
    created_at: String,
    last_used_at: String,
    expires_at: String,
    is_current: bool,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

async fn require_user(
    state: &SessionsState,
    principal: &Principal,
) -> Result<User, ApiError> {
    state
        .db
        .users()
        .get_by_uuid(&principal.id)
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::unauthorized_code(CODE_UNAUTHENTICATED, "Not authenticated"))
}

/// List the caller's active sessions, newest first.
async fn list_sessions(
    State(state): State<SessionsState>,
    RequireAuth(principal): RequireAuth,
    parts: Parts,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &principal).await?;

    let records = state
        .db
        .tokens()
        .list_by_user(user.id)
        .await
        .db_err("Failed to list sessions")?;

    let current_hash = get_cookie(&parts.headers, REFRESH_COOKIE_NAME).map(hash_token);

    let sessions: Vec<SessionInfo> = records
        .into_iter()
        .map(|r| SessionInfo {
            is_current: current_hash.as_deref() == Some(r.token_hash.as_str()),
            id: r.id,
            device_info: r.device_info,
            ip_address: r.ip_address,
            created_at: r.created_at,
            last_used_at: r.last_used_at,
            expires_at: r.expires_at,
        })
        .collect();

    Ok((StatusCode::OK, Json(ListSessionsResponse { sessions })))
}

#[derive(Serialize)]
struct RevokeResponse {
    revoked: bool,
}

/// Revoke one of the caller's sessions. Revoking an unknown or foreign ID
/// answers `revoked: false` rather than leaking whether it exists.
async fn revoke_session(
    State(state): State<SessionsState>,
    RequireAuth(principal): RequireAuth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let user = require_user(&state, &principal).await?;

    let revoked = state
        .db
        .tokens()
        .delete_for_user(id, user.id)
        .await
        .db_err("Failed to revoke session")?;

    Ok((StatusCode::OK, Json(RevokeResponse { revoked })))
}
