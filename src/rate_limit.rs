//! Rate limiting for credential endpoints.
//!
//! Token bucket per client IP. Only the endpoints that accept a password
//! (login) or trigger outbound mail (password request) are limited; token
//! refresh and guarded routes are not.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

use crate::auth::extract_client_ip;
use crate::cli::ClientIpHeader;

/// Per-IP keyed limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Limiters for the credential endpoints.
pub struct RateLimitConfig {
    /// Login attempts: sustained 2/s per IP with a burst of 20.
    pub login: Arc<IpLimiter>,
    /// Password-set requests (these send mail): 5/min per IP, burst 10.
    pub password_request: Arc<IpLimiter>,
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(
                Quota::per_second(NonZeroU32::new(2).unwrap())
                    .allow_burst(NonZeroU32::new(20).unwrap()),
            )),
            password_request: Arc::new(RateLimiter::keyed(
                Quota::per_minute(NonZeroU32::new(5).unwrap())
                    .allow_burst(NonZeroU32::new(10).unwrap()),
            )),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// State for [`rate_limit_by_ip`]: which limiter, and how to find the IP.
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<IpLimiter>,
    pub forwarded_ip: Option<ClientIpHeader>,
}

/// Middleware limiting requests per client IP. Requests whose IP cannot be
/// determined are refused outright rather than sharing one anonymous
/// bucket.
pub async fn rate_limit_by_ip(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ip) = extract_client_ip(&request, state.forwarded_ip.as_ref()) else {
        return (StatusCode::FORBIDDEN, "Unable to determine client IP.").into_response();
    };

    match state.limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many attempts. Please wait before trying again.",
        )
            .into_response(),
    }
}
