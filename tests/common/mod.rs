#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use gradekeep::cli::ClientIpHeader;
use gradekeep::db::{Database, Role, User};
use gradekeep::mailer::CaptureMailer;
use gradekeep::{ServerConfig, create_app, password};
use std::sync::Arc;
use tower::ServiceExt;
use url::Url;

/// Secret shared by the app under test and tests that mint tokens directly.
pub const TEST_JWT_SECRET: &[u8] = b"test-jwt-secret-with-enough-bytes";

/// All test traffic claims this client IP via X-Forwarded-For.
pub const TEST_IP: &str = "203.0.113.10";

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub mailer: Arc<CaptureMailer>,
}

pub async fn setup() -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    let mailer = Arc::new(CaptureMailer::default());

    let config = ServerConfig {
        db: db.clone(),
        public_origin: Url::parse("http://localhost:8460").expect("Invalid URL"),
        jwt_secret: TEST_JWT_SECRET.to_vec(),
        secure_cookies: false,
        mailer: mailer.clone(),
        forwarded_ip: Some(ClientIpHeader::XForwardedFor),
    };

    TestApp {
        app: create_app(&config),
        db,
        mailer,
    }
}

impl TestApp {
    /// Create an activated user; `password` of None leaves the account in
    /// the password-not-set state.
    pub async fn create_user(
        &self,
        email: &str,
        name: &str,
        role: Role,
        password: Option<&str>,
    ) -> User {
        let uuid = uuid::Uuid::new_v4().to_string();
        let id = self
            .db
            .users()
            .create(&uuid, email, name, role, "tenant-test")
            .await
            .expect("Failed to create user");

        if let Some(password) = password {
            let hash = password::hash(password).expect("Failed to hash password");
            self.db
                .users()
                .set_password_hash(id, &hash)
                .await
                .expect("Failed to set password");
        }

        self.db
            .users()
            .get_by_id(id)
            .await
            .expect("Failed to read user")
            .expect("User missing")
    }

    pub async fn request(
        &self,
        method: &str,
        path: &str,
        cookies: Option<&str>,
        json_body: Option<serde_json::Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("x-forwarded-for", TEST_IP)
            .header("user-agent", "gradekeep-tests");

        if let Some(cookies) = cookies {
            builder = builder.header("cookie", cookies);
        }

        let request = match json_body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("Request failed")
    }

    pub async fn login(&self, email: &str, password: &str) -> Response<Body> {
        self.request(
            "POST",
            "/api/auth/login",
            None,
            Some(serde_json::json!({ "email": email, "password": password })),
        )
        .await
    }

    /// Log in and return "accesstoken=...; refreshtoken=..." for reuse as a
    /// Cookie header.
    pub async fn login_cookies(&self, email: &str, password: &str) -> String {
        let response = self.login(email, password).await;
        assert_eq!(response.status(), StatusCode::OK);
        let cookies = extract_set_cookies(&response);
        let access = cookie_value(&cookies, "accesstoken").expect("No access cookie");
        let refresh = cookie_value(&cookies, "refreshtoken").expect("No refresh cookie");
        format!("accesstoken={}; refreshtoken={}", access, refresh)
    }

    pub async fn count_refresh_rows(&self) -> i64 {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens")
            .fetch_one(self.db.pool())
            .await
            .expect("Failed to count rows");
        n
    }
}

/// Extract Set-Cookie headers from a response.
pub fn extract_set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// Pull a cookie's value out of a list of Set-Cookie strings. Returns None
/// for missing or cleared (Max-Age=0) cookies.
pub fn cookie_value(cookies: &[String], name: &str) -> Option<String> {
    cookies.iter().find_map(|c| {
        let (key, rest) = c.split_once('=')?;
        if key != name {
            return None;
        }
        let value = rest.split(';').next()?.trim();
        if value.is_empty() || c.contains("Max-Age=0") {
            None
        } else {
            Some(value.to_string())
        }
    })
}

/// Check if cookies contain a token being cleared (Max-Age=0).
pub fn has_cleared_cookie(cookies: &[String], cookie_name: &str) -> bool {
    cookies
        .iter()
        .any(|c| c.starts_with(&format!("{}=", cookie_name)) && c.contains("Max-Age=0"))
}

/// Read a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}
