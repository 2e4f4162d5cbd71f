//! Session issue and refresh.
//!
//! The issuer turns a validated user into an access/refresh cookie pair and
//! exactly one new refresh token row. The refresher consumes a refresh
//! cookie: verify, look up by hash, rotate the row in place, mint a new
//! pair. Old and new hash never validate at the same time, and the
//! in-place UPDATE means a crash mid-rotation cannot strand the session
//! with no valid hash at all.

use crate::auth::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_cookie, session_cookie};
use crate::db::{Database, User};
use crate::jwt::{Principal, TokenCodec, TokenError};

/// Device metadata captured alongside a refresh token.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    /// User-Agent string, truncated by the caller.
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
}

/// A freshly established session: the decoded principal plus the two
/// Set-Cookie values the caller attaches to its response.
pub struct IssuedSession {
    pub principal: Principal,
    pub access_cookie: String,
    pub refresh_cookie: String,
}

#[derive(Debug)]
pub enum SessionError {
    /// Refresh cookie missing, unverifiable, expired, or already consumed.
    /// Terminal for the caller; there is no retry within this layer.
    Unauthenticated,
    Token(TokenError),
    Db(sqlx::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Unauthenticated => write!(f, "Session not authenticated"),
            SessionError::Token(e) => write!(f, "Token error: {}", e),
            SessionError::Db(e) => write!(f, "Database error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        SessionError::Db(e)
    }
}

/// Establish a session for a user whose credentials have already been
/// validated. Side effect: exactly one new refresh token row.
pub async fn issue_session(
    db: &Database,
    codec: &TokenCodec,
    user: &User,
    meta: &ClientMeta,
    secure_cookies: bool,
) -> Result<IssuedSession, SessionError> {
    let principal = Principal::from_user(user);
    let access = codec.sign_access(&principal).map_err(SessionError::Token)?;
    let refresh = codec.sign_refresh(&principal).map_err(SessionError::Token)?;

    db.tokens()
        .create(
            user.id,
            &refresh.token,
            meta.device_info.as_deref(),
            meta.ip_address.as_deref(),
            refresh.issued_at,
            refresh.expires_at,
        )
        .await?;

    Ok(IssuedSession {
        principal,
        access_cookie: session_cookie(ACCESS_COOKIE_NAME, &access.token, access.ttl, secure_cookies),
        refresh_cookie: session_cookie(
            REFRESH_COOKIE_NAME,
            &refresh.token,
            refresh.ttl,
            secure_cookies,
        ),
    })
}

/// Exchange a refresh token for a new session, single transition:
/// verify the signature, find the stored hash, rotate it away.
///
/// Every failure collapses into `Unauthenticated`; the caller learns
/// nothing about which step rejected. A successfully consumed token never
/// validates again; of two refreshes racing on the same token, the loser's
/// rotation matches zero rows and fails here.
pub async fn refresh_session(
    db: &Database,
    codec: &TokenCodec,
    raw_refresh: &str,
    meta: &ClientMeta,
    secure_cookies: bool,
) -> Result<IssuedSession, SessionError> {
    codec
        .verify_refresh(raw_refresh)
        .map_err(|_| SessionError::Unauthenticated)?;

    let record = db
        .tokens()
        .find_active(raw_refresh)
        .await?
        .ok_or(SessionError::Unauthenticated)?;

    // Re-read the user so role or profile changes land in the new tokens.
    let user = db
        .users()
        .get_by_id(record.user_id)
        .await?
        .ok_or(SessionError::Unauthenticated)?;

    let principal = Principal::from_user(&user);
    let access = codec.sign_access(&principal).map_err(SessionError::Token)?;
    let refresh = codec.sign_refresh(&principal).map_err(SessionError::Token)?;

    let rotated = db
        .tokens()
        .rotate(
            raw_refresh,
            &refresh.token,
            meta.device_info.as_deref(),
            meta.ip_address.as_deref(),
            refresh.issued_at,
            refresh.expires_at,
        )
        .await?;

    if !rotated {
        return Err(SessionError::Unauthenticated);
    }

    Ok(IssuedSession {
        principal,
        access_cookie: session_cookie(ACCESS_COOKIE_NAME, &access.token, access.ttl, secure_cookies),
        refresh_cookie: session_cookie(
            REFRESH_COOKIE_NAME,
            &refresh.token,
            refresh.ttl,
            secure_cookies,
        ),
    })
}

/// Set-Cookie values that delete both session cookies.
pub fn clear_session_cookies(secure_cookies: bool) -> (String, String) {
    (
        clear_cookie(ACCESS_COOKIE_NAME, secure_cookies),
        clear_cookie(REFRESH_COOKIE_NAME, secure_cookies),
    )
}

/// Pull the raw token value out of a Set-Cookie string built by
/// [`session_cookie`].
pub fn cookie_token(set_cookie: &str) -> Option<&str> {
    set_cookie.split_once('=')?.1.split(';').next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;

    async fn seed(db: &Database) -> User {
        let id = db
            .users()
            .create("uuid-1", "alice@school.test", "Alice", Role::Admin, "tenant-a")
            .await
            .unwrap();
        db.users().get_by_id(id).await.unwrap().unwrap()
    }

    async fn count_rows(db: &Database) -> i64 {
        let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens")
            .fetch_one(db.pool())
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn test_issue_creates_one_record() {
        let db = Database::open(":memory:").await.unwrap();
        let codec = TokenCodec::new(b"test-secret-key-for-testing");
        let user = seed(&db).await;

        let session = issue_session(&db, &codec, &user, &ClientMeta::default(), false)
            .await
            .unwrap();

        assert_eq!(count_rows(&db).await, 1);
        assert_eq!(session.principal.id, "uuid-1");
        assert!(session.access_cookie.starts_with("accesstoken="));
        assert!(session.refresh_cookie.starts_with("refreshtoken="));
    }

    #[tokio::test]
    async fn test_refresh_rotates_not_inserts() {
        let db = Database::open(":memory:").await.unwrap();
        let codec = TokenCodec::new(b"test-secret-key-for-testing");
        let user = seed(&db).await;

        let session = issue_session(&db, &codec, &user, &ClientMeta::default(), false)
            .await
            .unwrap();
        let raw_refresh = cookie_token(&session.refresh_cookie).unwrap().to_string();

        let refreshed = refresh_session(&db, &codec, &raw_refresh, &ClientMeta::default(), false)
            .await
            .unwrap();

        // Same row count; the old token is consumed.
        assert_eq!(count_rows(&db).await, 1);
        assert!(matches!(
            refresh_session(&db, &codec, &raw_refresh, &ClientMeta::default(), false).await,
            Err(SessionError::Unauthenticated)
        ));

        // The rotated token works.
        let next_raw = cookie_token(&refreshed.refresh_cookie).unwrap();
        assert!(
            refresh_session(&db, &codec, next_raw, &ClientMeta::default(), false)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_forged_refresh_rejected_without_side_effects() {
        let db = Database::open(":memory:").await.unwrap();
        let codec = TokenCodec::new(b"test-secret-key-for-testing");
        let user = seed(&db).await;

        // Signed with the right secret but never stored: forged or already
        // rotated away.
        let principal = Principal::from_user(&user);
        let orphan = codec.sign_refresh(&principal).unwrap();

        assert!(matches!(
            refresh_session(&db, &codec, &orphan.token, &ClientMeta::default(), false).await,
            Err(SessionError::Unauthenticated)
        ));
        assert_eq!(count_rows(&db).await, 0);
    }
}
