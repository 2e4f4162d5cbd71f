mod auth;
mod error;
mod sessions;

use axum::{Json, Router, routing::get};

pub use auth::{AuthState, confirm};
pub use error::ApiError;
pub use sessions::SessionsState;

use crate::auth::RequireAuth;
use crate::jwt::Principal;
use crate::rate_limit::RateLimitConfig;

/// Create the API router.
pub fn create_api_router(auth_state: AuthState, sessions_state: SessionsState) -> Router {
    let rate_limits = RateLimitConfig::new();

    let me_router = Router::new()
        .route("/me", get(me))
        .with_state(sessions_state.clone());

    Router::new()
        .nest("/auth", auth::router(auth_state, &rate_limits))
        .nest("/sessions", sessions::router(sessions_state))
        .merge(me_router)
}

/// Return the caller's decoded principal. The reference consumer of the
/// route guard; also what frontends call on load to hydrate "who am I".
async fn me(RequireAuth(principal): RequireAuth) -> Json<Principal> {
    Json(principal)
}
