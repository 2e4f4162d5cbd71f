//! Refresh token storage.
//!
//! Only refresh tokens are persisted; access tokens are stateless and
//! short-lived. Rows are keyed by a SHA-256 hash of the raw token, so a
//! database read never yields a usable bearer credential. Rotation updates
//! the existing row in place: one row per continuous session, and no window
//! in which the old and new hashes are both (or neither) valid.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;

use super::timestamp_to_datetime;

/// One-way hash of a raw refresh token, as stored in the `token_hash` column.
pub fn hash_token(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw.as_bytes()))
}

/// A persisted refresh token record. `token_hash` is the only link to the
/// credential the client holds.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub device_info: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: String,
    pub last_used_at: String,
    pub created_at: String,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    user_id: i64,
    token_hash: String,
    device_info: Option<String>,
    ip_address: Option<String>,
    expires_at: String,
    last_used_at: String,
    created_at: String,
}

impl From<RecordRow> for RefreshTokenRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            token_hash: row.token_hash,
            device_info: row.device_info,
            ip_address: row.ip_address,
            expires_at: row.expires_at,
            last_used_at: row.last_used_at,
            created_at: row.created_at,
        }
    }
}

const SELECT_RECORD: &str = "SELECT id, user_id, token_hash, device_info, ip_address, \
     expires_at, last_used_at, created_at FROM refresh_tokens";

/// Store for managing refresh tokens.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a record for a freshly issued refresh token. Returns the row ID.
    pub async fn create(
        &self,
        user_id: i64,
        raw_token: &str,
        device_info: Option<&str>,
        ip_address: Option<&str>,
        issued_at: u64,
        expires_at: u64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens \
             (user_id, token_hash, device_info, ip_address, expires_at, last_used_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(hash_token(raw_token))
        .bind(device_info)
        .bind(ip_address)
        .bind(timestamp_to_datetime(expires_at))
        .bind(timestamp_to_datetime(issued_at))
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Look up an unexpired record by raw token. "Not found" and "expired"
    /// are indistinguishable to callers; both mean reject.
    pub async fn find_active(
        &self,
        raw_token: &str,
    ) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "{} WHERE token_hash = ? AND expires_at >= datetime('now')",
            SELECT_RECORD
        ))
        .bind(hash_token(raw_token))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    /// Swap the old token's hash for the new one in place, refreshing the
    /// expiry window and device metadata. The single hash-guarded UPDATE is
    /// what makes a refresh token single-use: once rotated, the old hash
    /// matches nothing, and of two rotations racing on the same old token
    /// only one returns true.
    pub async fn rotate(
        &self,
        old_raw_token: &str,
        new_raw_token: &str,
        device_info: Option<&str>,
        ip_address: Option<&str>,
        used_at: u64,
        expires_at: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET token_hash = ?, device_info = ?, ip_address = ?, \
             expires_at = ?, last_used_at = ? \
             WHERE token_hash = ? AND expires_at >= datetime('now')",
        )
        .bind(hash_token(new_raw_token))
        .bind(device_info)
        .bind(ip_address)
        .bind(timestamp_to_datetime(expires_at))
        .bind(timestamp_to_datetime(used_at))
        .bind(hash_token(old_raw_token))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete the record matching a raw token. Idempotent; revoking a token
    /// that was never issued (or already revoked) is not an error.
    pub async fn revoke(&self, raw_token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = ?")
            .bind(hash_token(raw_token))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record for a user ("sign out everywhere").
    pub async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// List unexpired sessions for a user, newest first.
    pub async fn list_by_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "{} WHERE user_id = ? AND expires_at >= datetime('now') ORDER BY created_at DESC",
            SELECT_RECORD
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    /// Delete one session row, scoped to its owner.
    pub async fn delete_for_user(&self, id: i64, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all expired records.
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < datetime('now')")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
