//! Authentication API endpoints.
//!
//! - POST `/login` - Check credentials, establish a session
//! - POST `/refresh` - Exchange the refresh cookie for a new token pair
//! - GET `/logout` - Revoke the current session and clear cookies
//! - POST `/logout_all` - Revoke every session for the caller
//! - POST `/password` - Request a password set/reset (sends a confirm mail)
//!
//! plus the confirm landing handler mounted at the site root
//! (`GET /confirm?token=...`).

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{StatusCode, header, header::SET_COOKIE, request::Parts},
    middleware,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, warn};
use url::Url;

use super::error::{ApiError, ResultExt};
use crate::auth::{
    CODE_INVALID_OR_EXPIRED_TOKEN, CODE_PASSWORD_NOT_SET, CODE_UNAUTHENTICATED,
    REFRESH_COOKIE_NAME, RequireAuth, extract_client_ip, get_cookie,
};
use crate::cli::ClientIpHeader;
use crate::db::Database;
use crate::impl_has_auth_state;
use crate::jwt::TokenCodec;
use crate::mailer::Mailer;
use crate::password;
use crate::rate_limit::{RateLimitConfig, RateLimitState, rate_limit_by_ip};
use crate::session::{
    ClientMeta, SessionError, clear_session_cookies, issue_session, refresh_session,
};

/// Confirm tokens live for one hour.
const RESET_TOKEN_TTL_SECS: u64 = 60 * 60;

/// Stored User-Agent strings are capped; some clients send novels.
const MAX_DEVICE_INFO_LEN: usize = 256;

const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 128;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
    pub mailer: Arc<dyn Mailer>,
    /// Public origin of the deployment, used to build confirm URLs.
    pub public_origin: Url,
    pub secure_cookies: bool,
    pub forwarded_ip: Option<ClientIpHeader>,
}

impl_has_auth_state!(AuthState);

pub fn router(state: AuthState, rate_limits: &RateLimitConfig) -> Router {
    let login_limit = RateLimitState {
        limiter: rate_limits.login.clone(),
        forwarded_ip: state.forwarded_ip.clone(),
    };
    let password_limit = RateLimitState {
        limiter: rate_limits.password_request.clone(),
        forwarded_ip: state.forwarded_ip.clone(),
    };

    let login_routes = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(login_limit, rate_limit_by_ip));

    let password_routes = Router::new()
        .route("/password", post(request_password))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            password_limit,
            rate_limit_by_ip,
        ));

    Router::new()
        .route("/refresh", post(refresh))
        .route("/logout", get(logout))
        .route("/logout_all", post(logout_all))
        .with_state(state)
        .merge(login_routes)
        .merge(password_routes)
}

/// Capture device metadata for the refresh token record.
fn client_meta(parts: &Parts, forwarded_ip: Option<&ClientIpHeader>) -> ClientMeta {
    let device_info = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| {
            let end = ua
                .char_indices()
                .nth(MAX_DEVICE_INFO_LEN)
                .map(|(i, _)| i)
                .unwrap_or(ua.len());
            ua[..end].to_string()
        });
    let ip_address = extract_client_ip(parts, forwarded_ip);
    ClientMeta {
        device_info,
        ip_address,
    }
}

fn map_session_error(e: SessionError) -> ApiError {
    match e {
        SessionError::Unauthenticated => {
            ApiError::unauthorized_code(CODE_UNAUTHENTICATED, "Not authenticated")
        }
        SessionError::Token(e) => {
            error!("Failed to sign session tokens: {}", e);
            ApiError::internal("Failed to establish session")
        }
        SessionError::Db(e) => ApiError::db_error("Failed to persist session", e),
    }
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// Login
// =============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    id: String,
    email: String,
    name: String,
    role: crate::db::Role,
}

/// Check credentials and establish a session.
///
/// Unknown email answers 404 and a never-finalized password answers PNS;
/// both are deliberate, the frontend routes them to signup help and the
/// set-password flow respectively.
async fn login(
    State(state): State<AuthState>,
    parts: Parts,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let email = payload.email.trim();
    if email.is_empty() {
        return Err(ApiError::bad_request("Email cannot be empty"));
    }

    let user = state
        .db
        .users()
        .get_by_email(email)
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::not_found("No account with this email"))?;

    if user.password_hash.is_empty() {
        return Err(ApiError::unauthorized_code(
            CODE_PASSWORD_NOT_SET,
            "Password not set for this account",
        ));
    }

    let check = password::verify(&user.password_hash, &payload.password).map_err(|e| {
        error!("Password verification failed: {}", e);
        ApiError::internal("Failed to verify password")
    })?;

    if !check.verified {
        return Err(ApiError::unauthorized_code(
            CODE_UNAUTHENTICATED,
            "Wrong password",
        ));
    }

    // Legacy plaintext row verified; replace it with a real hash.
    if let Some(upgrade) = check.upgrade_hash {
        if let Err(e) = state.db.users().set_password_hash(user.id, &upgrade).await {
            warn!("Failed to upgrade legacy password hash: {}", e);
        }
    }

    let meta = client_meta(&parts, state.forwarded_ip.as_ref());
    let session = issue_session(&state.db, &state.codec, &user, &meta, state.secure_cookies)
        .await
        .map_err(map_session_error)?;

    Ok((
        StatusCode::OK,
        AppendHeaders([
            (SET_COOKIE, session.access_cookie),
            (SET_COOKIE, session.refresh_cookie),
        ]),
        Json(LoginResponse {
            id: user.uuid,
            email: user.email,
            name: user.name,
            role: user.role,
        }),
    )
        .into_response())
}

// =============================================================================
// Refresh
// =============================================================================

/// Exchange the refresh cookie for a fresh token pair, rotating the stored
/// record. Any failure is terminal 401: the cookies are cleared and the
/// client is expected to log in again.
async fn refresh(State(state): State<AuthState>, parts: Parts) -> Response {
    let Some(raw) = get_cookie(&parts.headers, REFRESH_COOKIE_NAME) else {
        return refresh_rejected(state.secure_cookies);
    };

    let meta = client_meta(&parts, state.forwarded_ip.as_ref());
    match refresh_session(&state.db, &state.codec, raw, &meta, state.secure_cookies).await {
        Ok(session) => (
            StatusCode::OK,
            AppendHeaders([
                (SET_COOKIE, session.access_cookie),
                (SET_COOKIE, session.refresh_cookie),
            ]),
            Json(serde_json::json!({ "refreshed": true })),
        )
            .into_response(),
        Err(SessionError::Unauthenticated) => refresh_rejected(state.secure_cookies),
        Err(e) => {
            error!("Refresh failed: {}", e);
            ApiError::internal("Failed to refresh session").into_response()
        }
    }
}

/// 401 with both cookies cleared. The session is unrecoverable; leaving
/// dead cookies behind would only produce repeat failures.
fn refresh_rejected(secure_cookies: bool) -> Response {
    let (clear_access, clear_refresh) = clear_session_cookies(secure_cookies);
    (
        StatusCode::UNAUTHORIZED,
        AppendHeaders([(SET_COOKIE, clear_access), (SET_COOKIE, clear_refresh)]),
        Json(serde_json::json!({
            "error": "Not authenticated",
            "code": CODE_UNAUTHENTICATED,
        })),
    )
        .into_response()
}

// =============================================================================
// Logout
// =============================================================================

/// Revoke the current refresh token and clear both cookies. Idempotent:
/// logging out without a session still answers 200 with cleared cookies.
async fn logout(State(state): State<AuthState>, parts: Parts) -> Response {
    if let Some(raw) = get_cookie(&parts.headers, REFRESH_COOKIE_NAME) {
        if let Err(e) = state.db.tokens().revoke(raw).await {
            warn!("Failed to revoke refresh token on logout: {}", e);
        }
    }

    let (clear_access, clear_refresh) = clear_session_cookies(state.secure_cookies);
    (
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, clear_access), (SET_COOKIE, clear_refresh)]),
        Json(serde_json::json!({ "success": true })),
    )
        .into_response()
}

/// Revoke every session of the calling user, on every device.
async fn logout_all(
    State(state): State<AuthState>,
    RequireAuth(principal): RequireAuth,
) -> Result<Response, ApiError> {
    let user = state
        .db
        .users()
        .get_by_uuid(&principal.id)
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::unauthorized_code(CODE_UNAUTHENTICATED, "Not authenticated"))?;

    let revoked = state
        .db
        .tokens()
        .revoke_all_for_user(user.id)
        .await
        .db_err("Failed to revoke sessions")?;

    let (clear_access, clear_refresh) = clear_session_cookies(state.secure_cookies);
    Ok((
        StatusCode::OK,
        AppendHeaders([(SET_COOKIE, clear_access), (SET_COOKIE, clear_refresh)]),
        Json(serde_json::json!({ "revoked": revoked })),
    )
        .into_response())
}

// =============================================================================
// Password set / confirm flow
// =============================================================================

#[derive(Deserialize)]
struct PasswordRequest {
    email: String,
    password: String,
}

/// Request phase: stage the candidate password and mail a single-use
/// confirm URL. Always answers 202 so the endpoint cannot be used to probe
/// which emails exist.
async fn request_password(
    State(state): State<AuthState>,
    Json(payload): Json<PasswordRequest>,
) -> Result<Response, ApiError> {
    let email = payload.email.trim();
    if email.is_empty() {
        return Err(ApiError::bad_request("Email cannot be empty"));
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    if payload.password.len() > MAX_PASSWORD_LEN {
        return Err(ApiError::bad_request(format!(
            "Password cannot be longer than {} characters",
            MAX_PASSWORD_LEN
        )));
    }

    let accepted = (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": true })),
    );

    let Some(user) = state
        .db
        .users()
        .get_by_email(email)
        .await
        .db_err("Failed to look up user")?
    else {
        return Ok(accepted.into_response());
    };

    // The candidate is hashed before it touches the database; only the
    // staged hash is promoted at confirm time.
    let temp_hash = password::hash(&payload.password).map_err(|e| {
        error!("Failed to hash candidate password: {}", e);
        ApiError::internal("Failed to process password")
    })?;

    let token = new_reset_token();
    state
        .db
        .users()
        .begin_password_reset(
            &user.email,
            &temp_hash,
            &token,
            now_epoch_secs() + RESET_TOKEN_TTL_SECS,
        )
        .await
        .db_err("Failed to stage password reset")?;

    let confirm_url = build_confirm_url(&state.public_origin, &token);
    state
        .mailer
        .send_password_confirmation(&user.email, &user.name, &confirm_url)
        .await
        .map_err(|e| {
            error!("Failed to send confirmation mail: {}", e);
            ApiError::internal("Failed to send confirmation mail")
        })?;

    Ok(accepted.into_response())
}

#[derive(Deserialize)]
pub struct ConfirmQuery {
    token: String,
}

/// Confirm phase: consume the token, commit the password, establish a
/// session, and send the browser to the role's dashboard. The password is
/// committed (and the token burned) before any tokens are minted.
pub async fn confirm(
    State(state): State<AuthState>,
    parts: Parts,
    Query(query): Query<ConfirmQuery>,
) -> Result<Response, ApiError> {
    let user = state
        .db
        .users()
        .confirm_password_reset(&query.token)
        .await
        .db_err("Failed to confirm password")?
        .ok_or_else(|| {
            ApiError::unauthorized_code(
                CODE_INVALID_OR_EXPIRED_TOKEN,
                "Invalid or expired confirmation token",
            )
        })?;

    let meta = client_meta(&parts, state.forwarded_ip.as_ref());
    let session = issue_session(&state.db, &state.codec, &user, &meta, state.secure_cookies)
        .await
        .map_err(map_session_error)?;

    Ok((
        AppendHeaders([
            (SET_COOKIE, session.access_cookie),
            (SET_COOKIE, session.refresh_cookie),
        ]),
        Redirect::to(user.role.landing_path()),
    )
        .into_response())
}

/// Opaque single-use confirm token: 32 random bytes, URL-safe.
fn new_reset_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn build_confirm_url(public_origin: &Url, token: &str) -> String {
    let mut url = public_origin.clone();
    url.set_path("/confirm");
    url.set_query(Some(&format!("token={}", token)));
    url.to_string()
}
