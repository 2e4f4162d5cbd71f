//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::{Database, Role};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;
use uuid::Uuid;

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Which forwarded header to trust for the client IP. Only set this when
/// running behind a reverse proxy that overwrites the header.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    XForwardedFor,
    XRealIp,
    CfConnectingIp,
}

impl ClientIpHeader {
    pub fn header_name(&self) -> &'static str {
        match self {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
            ClientIpHeader::CfConnectingIp => "cf-connecting-ip",
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "Gradekeep",
    about = "School management platform with cookie-session authentication"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8460")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "gradekeep.db")]
    pub database: String,

    /// Public origin of this deployment (full URL). Confirm links are built
    /// against it, and HTTPS origins turn on Secure cookies
    #[arg(long, default_value = "http://localhost:8460")]
    pub public_origin: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Create an admin account for this email on startup and print its
    /// password-set URL
    #[arg(long, value_name = "EMAIL")]
    pub seed_admin: Option<String>,

    /// Tenant (school) ID assigned to the seeded admin
    #[arg(long, default_value = "default")]
    pub tenant: String,

    /// Trust this header for client IPs (requires running behind a proxy)
    #[arg(long, value_enum)]
    pub client_ip_header: Option<ClientIpHeader>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Parse and validate the public-origin URL.
/// Returns None and logs an error if validation fails.
pub fn validate_public_origin(public_origin: &str) -> Option<Url> {
    let url = match Url::parse(public_origin) {
        Ok(url) => url,
        Err(e) => {
            error!(origin = %public_origin, error = %e, "Invalid public-origin URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("public-origin must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Handle the --seed-admin flag: create an admin account (or find the
/// existing one) and print the URL where it can set its password.
pub async fn handle_seed_admin(db: &Database, public_origin: &Url, email: &str, tenant: &str) {
    let user = match db.users().get_by_email(email).await {
        Ok(Some(existing)) => {
            println!();
            println!("Admin already exists: {}", existing.email);
            existing
        }
        Ok(None) => {
            let uuid = Uuid::new_v4().to_string();
            match db
                .users()
                .create(&uuid, email, "Administrator", Role::Admin, tenant)
                .await
            {
                Ok(id) => match db.users().get_by_id(id).await {
                    Ok(Some(user)) => {
                        println!();
                        println!("Admin user created: {}", user.email);
                        user
                    }
                    _ => {
                        error!("Failed to read back seeded admin");
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    error!(error = %e, "Failed to create admin user");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to check for existing admin");
            std::process::exit(1);
        }
    };

    println!(
        "Request a password for {} via POST {}api/auth/password; the confirm link arrives by mail",
        user.email, public_origin
    );
    println!();
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    public_origin: Url,
    jwt_secret: String,
    client_ip_header: Option<ClientIpHeader>,
) -> ServerConfig {
    let secure_cookies = public_origin.scheme() == "https";

    ServerConfig {
        db,
        public_origin,
        jwt_secret: jwt_secret.into_bytes(),
        secure_cookies,
        mailer: Arc::new(crate::mailer::LogMailer),
        forwarded_ip: client_ip_header,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
