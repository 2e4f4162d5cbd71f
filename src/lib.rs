pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod db;
pub mod jwt;
pub mod mailer;
pub mod password;
pub mod rate_limit;
pub mod session;

use api::{AuthState, SessionsState, create_api_router};
use axum::{Router, routing::get};
use cli::ClientIpHeader;
use db::Database;
use jwt::TokenCodec;
use mailer::Mailer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use url::Url;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Public origin of the deployment (confirm URLs are built from it)
    pub public_origin: Url,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Whether to set Secure flag on cookies (true for HTTPS deployments)
    pub secure_cookies: bool,
    /// Outbound email channel for the confirm flow
    pub mailer: Arc<dyn Mailer>,
    /// Forwarded header to trust for client IPs (reverse-proxy deployments)
    pub forwarded_ip: Option<ClientIpHeader>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let codec = Arc::new(TokenCodec::new(&config.jwt_secret));

    let auth_state = AuthState {
        db: config.db.clone(),
        codec: codec.clone(),
        mailer: config.mailer.clone(),
        public_origin: config.public_origin.clone(),
        secure_cookies: config.secure_cookies,
        forwarded_ip: config.forwarded_ip.clone(),
    };

    let sessions_state = SessionsState {
        db: config.db.clone(),
        codec,
    };

    // The confirm link lands at the site root; everything else is under /api.
    let confirm_routes = Router::new()
        .route("/confirm", get(api::confirm))
        .with_state(auth_state.clone());

    Router::new()
        .nest("/api", create_api_router(auth_state, sessions_state))
        .merge(confirm_routes)
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
