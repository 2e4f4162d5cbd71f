//! Signed token generation and validation.
//!
//! Dual-token system: short-lived access tokens (15 minutes, stateless) and
//! long-lived refresh tokens (1 week, tracked in the database by hash).
//! Both carry the full principal, so a decode never needs a database read.
//! Expiry is reported distinctly from tampering: the route guard turns
//! `TokenError::Expired` into the TOKEN_EXPIRED code that tells clients a
//! silent refresh is worth attempting.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::Role;

/// Access token lifetime: 15 minutes. Cookie Max-Age matches.
pub const ACCESS_TOKEN_TTL_SECS: u64 = 15 * 60;

/// Refresh token lifetime: 1 week. Each rotation opens a fresh window.
pub const REFRESH_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// The identity a token carries: who is calling, for which school, with
/// which role. Assembled from the user row at issue time and reconstructed
/// fresh on every decode; never persisted as an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// User UUID.
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub tenant_id: String,
}

impl Principal {
    pub fn from_user(user: &crate::db::User) -> Self {
        Self {
            id: user.uuid.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            tenant_id: user.tenant_id.clone(),
        }
    }
}

/// JWT claims: the principal plus the registered claims.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    email: String,
    role: Role,
    tenant_id: String,
    #[serde(rename = "typ")]
    token_type: TokenType,
    iat: u64,
    exp: u64,
    /// Uniqueness nonce, refresh tokens only. Two refresh tokens minted in
    /// the same second must still hash to different store keys.
    #[serde(skip_serializing_if = "Option::is_none")]
    jti: Option<String>,
}

impl Claims {
    fn into_principal(self) -> Principal {
        Principal {
            id: self.sub,
            name: self.name,
            email: self.email,
            role: self.role,
            tenant_id: self.tenant_id,
        }
    }
}

/// A freshly signed token with its validity window.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub issued_at: u64,
    pub expires_at: u64,
    /// Lifetime in seconds; doubles as the cookie Max-Age.
    pub ttl: u64,
}

/// Errors from signing or verifying tokens.
#[derive(Debug)]
pub enum TokenError {
    /// Signature and payload check out, but the token is past its expiry.
    Expired,
    /// Malformed payload, bad signature, or wrong token type.
    Invalid,
    /// Failed to encode the token.
    Encoding(jsonwebtoken::errors::Error),
    /// System clock is before the Unix epoch.
    TimeError,
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "Token expired"),
            TokenError::Invalid => write!(f, "Invalid token"),
            TokenError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            TokenError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Signs and verifies both token kinds with one process-wide secret.
/// Rotating the secret invalidates every outstanding token.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Sign an access token for a principal.
    pub fn sign_access(&self, principal: &Principal) -> Result<SignedToken, TokenError> {
        self.sign(principal, TokenType::Access, ACCESS_TOKEN_TTL_SECS, None)
    }

    /// Sign a refresh token for a principal. The raw string is the bearer
    /// credential; callers persist only its hash.
    pub fn sign_refresh(&self, principal: &Principal) -> Result<SignedToken, TokenError> {
        let jti = uuid::Uuid::new_v4().to_string();
        self.sign(principal, TokenType::Refresh, REFRESH_TOKEN_TTL_SECS, Some(jti))
    }

    fn sign(
        &self,
        principal: &Principal,
        token_type: TokenType,
        ttl: u64,
        jti: Option<String>,
    ) -> Result<SignedToken, TokenError> {
        let now = now_epoch_secs()?;
        let exp = now + ttl;

        let claims = Claims {
            sub: principal.id.clone(),
            name: principal.name.clone(),
            email: principal.email.clone(),
            role: principal.role,
            tenant_id: principal.tenant_id.clone(),
            token_type,
            iat: now,
            exp,
            jti,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(TokenError::Encoding)?;

        Ok(SignedToken {
            token,
            issued_at: now,
            expires_at: exp,
            ttl,
        })
    }

    /// Validate and decode an access token.
    pub fn verify_access(&self, token: &str) -> Result<Principal, TokenError> {
        self.verify(token, TokenType::Access)
    }

    /// Validate and decode a refresh token. Signature and expiry only; the
    /// database check against the token store is the caller's job.
    pub fn verify_refresh(&self, token: &str) -> Result<Principal, TokenError> {
        self.verify(token, TokenType::Refresh)
    }

    fn verify(&self, token: &str, expected: TokenType) -> Result<Principal, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?;

        if data.claims.token_type != expected {
            return Err(TokenError::Invalid);
        }

        Ok(data.claims.into_principal())
    }
}

fn now_epoch_secs() -> Result<u64, TokenError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| TokenError::TimeError)
}
