//! Client-side session manager with single-flight refresh.
//!
//! The caller-side counterpart of the refresh endpoint. A [`SessionClient`]
//! wraps a [`Transport`] (an HTTP client owning the cookie jar) and makes
//! access-token expiry invisible: on a TOKEN_EXPIRED failure it drives one
//! refresh call and replays the request. When many requests fail at once,
//! the refresh gate serializes them into exactly one refresh round trip,
//! regardless of concurrency. Waiters suspend on the gate (cooperative,
//! no blocked threads) and replay only after the refresh has landed its
//! new cookies.
//!
//! Each client instance owns its own gate and state; construct one per
//! session, there is no process-wide singleton.

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::auth::CODE_TOKEN_EXPIRED;

/// An outbound API call.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// JSON body, if any.
    pub body: Option<String>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Option<String>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    /// Machine-readable error code from the response body, if present.
    pub fn error_code(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct ErrorBody {
            code: Option<String>,
        }
        serde_json::from_str::<ErrorBody>(&self.body)
            .ok()
            .and_then(|b| b.code)
    }
}

#[derive(Debug)]
pub enum ClientError {
    /// The transport failed outright (network, connection).
    Transport(String),
    /// The session is gone and silent refresh cannot bring it back; the
    /// caller must send the user through login again.
    SessionExpired,
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "Transport error: {}", e),
            ClientError::SessionExpired => write!(f, "Session expired"),
        }
    }
}

impl std::error::Error for ClientError {}

/// One HTTP round trip. Implementations own the session cookies: they
/// attach them to every request and absorb Set-Cookie from every response,
/// so by the time `send` returns for the refresh call, the new cookies are
/// in place for whatever is replayed next.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError>;
}

/// Session-aware API client. See module docs.
pub struct SessionClient {
    transport: Arc<dyn Transport>,
    /// Bumped once per successful refresh, only while holding the gate.
    /// A waiter whose snapshot is stale knows its refresh already happened.
    generation: AtomicU64,
    logged_out: AtomicBool,
    gate: Mutex<()>,
    on_session_expired: Option<Box<dyn Fn() + Send + Sync>>,
}

impl SessionClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            generation: AtomicU64::new(0),
            logged_out: AtomicBool::new(false),
            gate: Mutex::new(()),
            on_session_expired: None,
        }
    }

    /// Install a hook invoked once when the session becomes unrecoverable
    /// (the frontend uses this to route to the login page).
    pub fn with_session_expired_hook(
        mut self,
        hook: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_session_expired = Some(Box::new(hook));
        self
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::Acquire)
    }

    /// Send a request, refreshing the session once if the access token has
    /// expired. The replay is final: a second TOKEN_EXPIRED on the same
    /// request comes back as-is rather than looping.
    pub async fn request(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        if self.is_logged_out() {
            return Err(ClientError::SessionExpired);
        }

        // Snapshot before sending: if a concurrent refresh completes while
        // this request is in flight, the stale snapshot routes us straight
        // to the replay instead of a second refresh.
        let observed = self.generation.load(Ordering::Acquire);

        let response = self.transport.send(&request).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        match response.error_code().as_deref() {
            Some(CODE_TOKEN_EXPIRED) => {
                self.refresh(observed).await?;
                self.transport.send(&request).await
            }
            // Any other 401 means the session itself is bad; refresh would
            // not help.
            _ => {
                self.mark_logged_out();
                Err(ClientError::SessionExpired)
            }
        }
    }

    /// Single-flight refresh. The first caller through the gate performs
    /// the round trip; everyone who queued behind it finds the generation
    /// advanced and returns without a second call.
    async fn refresh(&self, observed_generation: u64) -> Result<(), ClientError> {
        let _flight = self.gate.lock().await;

        if self.is_logged_out() {
            return Err(ClientError::SessionExpired);
        }
        if self.generation.load(Ordering::Acquire) != observed_generation {
            return Ok(());
        }

        let refresh_call = ApiRequest::post("/api/auth/refresh", None);
        match self.transport.send(&refresh_call).await {
            Ok(response) if response.status == StatusCode::OK => {
                self.generation.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            Ok(_) | Err(_) => {
                // Refresh is the last line; when it fails, every waiter
                // queued on the gate fails with it.
                self.mark_logged_out();
                Err(ClientError::SessionExpired)
            }
        }
    }

    fn mark_logged_out(&self) {
        if !self.logged_out.swap(true, Ordering::AcqRel) {
            if let Some(hook) = &self.on_session_expired {
                hook();
            }
        }
    }
}
