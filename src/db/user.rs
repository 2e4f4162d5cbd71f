use sqlx::sqlite::SqlitePool;

use super::timestamp_to_datetime;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role. Determines the dashboard a user lands on and what the
/// CRUD handlers let them touch; the auth core only carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    NonTeaching,
    Student,
    Parent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::NonTeaching => "nonteaching",
            Role::Student => "student",
            Role::Parent => "parent",
        }
    }

    /// Unknown values fall back to the least-privileged role.
    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => Role::Admin,
            "teacher" => Role::Teacher,
            "nonteaching" => Role::NonTeaching,
            "parent" => Role::Parent,
            _ => Role::Student,
        }
    }

    /// Dashboard path a freshly confirmed user is redirected to.
    pub fn landing_path(&self) -> &'static str {
        match self {
            Role::Admin => "/admin",
            Role::Teacher => "/teacher",
            Role::NonTeaching => "/staff",
            Role::Student => "/student",
            Role::Parent => "/parent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub tenant_id: String,
    /// Argon2id PHC string, or empty while the account password is pending.
    pub password_hash: String,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    email: String,
    name: String,
    role: String,
    tenant_id: String,
    password_hash: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            email: row.email,
            name: row.name,
            role: Role::from_str(&row.role),
            tenant_id: row.tenant_id,
            password_hash: row.password_hash,
        }
    }
}

const SELECT_USER: &str =
    "SELECT id, uuid, email, name, role, tenant_id, password_hash FROM users";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user with no password set (login answers PNS until the
    /// confirm flow finishes). Returns the user ID.
    pub async fn create(
        &self,
        uuid: &str,
        email: &str,
        name: &str,
        role: Role,
        tenant_id: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, email, name, role, tenant_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(email)
        .bind(name)
        .bind(role.as_str())
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{} WHERE id = ?", SELECT_USER))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{} WHERE uuid = ?", SELECT_USER))
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!("{} WHERE email = ?", SELECT_USER))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    /// Replace the stored password hash (used when a legacy plaintext
    /// credential is upgraded on login).
    pub async fn set_password_hash(&self, id: i64, hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET password_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Stage a password-set request: candidate hash, single-use token and
    /// expiry land on the user row together. A newer request overwrites any
    /// pending one. Returns false if no user has this email.
    pub async fn begin_password_reset(
        &self,
        email: &str,
        temp_password_hash: &str,
        reset_token: &str,
        expires_at: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET temp_password_hash = ?, reset_token = ?, reset_token_expiry = ? \
             WHERE email = ?",
        )
        .bind(temp_password_hash)
        .bind(reset_token)
        .bind(timestamp_to_datetime(expires_at))
        .bind(email)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Consume a confirm token: promote the staged hash into the real
    /// password and clear all three reset fields in one statement. The
    /// token-guarded UPDATE makes the token single-use; of two racing
    /// confirms, only one sees a row change. Returns the confirmed user.
    pub async fn confirm_password_reset(
        &self,
        reset_token: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let user = match self.get_by_reset_token(reset_token).await? {
            Some(user) => user,
            None => return Ok(None),
        };

        let result = sqlx::query(
            "UPDATE users SET password_hash = temp_password_hash, \
             temp_password_hash = NULL, reset_token = NULL, reset_token_expiry = NULL \
             WHERE reset_token = ? AND reset_token_expiry >= datetime('now') \
             AND temp_password_hash IS NOT NULL",
        )
        .bind(reset_token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Lost the race to another confirm, or expired between the
            // lookup and the update.
            return Ok(None);
        }

        self.get_by_id(user.id).await
    }

    async fn get_by_reset_token(&self, reset_token: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "{} WHERE reset_token = ? AND reset_token_expiry >= datetime('now')",
            SELECT_USER
        ))
        .bind(reset_token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Clear reset fields whose token has expired. Expired requests are
    /// dead weight; the staged candidate hash should not outlive the token.
    pub async fn clear_expired_resets(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET temp_password_hash = NULL, reset_token = NULL, \
             reset_token_expiry = NULL \
             WHERE reset_token IS NOT NULL AND reset_token_expiry < datetime('now')",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    async fn seed(db: &Database) -> i64 {
        db.users()
            .create("uuid-1", "alice@school.test", "Alice", Role::Teacher, "tenant-a")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let db = Database::open(":memory:").await.unwrap();
        let id = seed(&db).await;

        let user = db
            .users()
            .get_by_email("alice@school.test")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, Role::Teacher);
        assert_eq!(user.tenant_id, "tenant-a");
        assert!(user.password_hash.is_empty());

        assert!(
            db.users()
                .get_by_email("nobody@school.test")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_duplicate_email_fails() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        let result = db
            .users()
            .create("uuid-2", "alice@school.test", "Other Alice", Role::Parent, "tenant-a")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_confirm_promotes_hash_and_clears_fields() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        db.users()
            .begin_password_reset("alice@school.test", "staged-hash", "tok-1", now() + 3600)
            .await
            .unwrap();

        let user = db
            .users()
            .confirm_password_reset("tok-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.password_hash, "staged-hash");

        // Single-use: the same token never confirms twice.
        assert!(
            db.users()
                .confirm_password_reset("tok-1")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_expired_reset_token_rejected() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        db.users()
            .begin_password_reset("alice@school.test", "staged-hash", "tok-1", now() - 10)
            .await
            .unwrap();

        assert!(
            db.users()
                .confirm_password_reset("tok-1")
                .await
                .unwrap()
                .is_none()
        );

        let cleared = db.users().clear_expired_resets().await.unwrap();
        assert_eq!(cleared, 1);
    }

    #[tokio::test]
    async fn test_newer_reset_overwrites_pending() {
        let db = Database::open(":memory:").await.unwrap();
        seed(&db).await;

        db.users()
            .begin_password_reset("alice@school.test", "hash-1", "tok-1", now() + 3600)
            .await
            .unwrap();
        db.users()
            .begin_password_reset("alice@school.test", "hash-2", "tok-2", now() + 3600)
            .await
            .unwrap();

        assert!(
            db.users()
                .confirm_password_reset("tok-1")
                .await
                .unwrap()
                .is_none()
        );
        let user = db
            .users()
            .confirm_password_reset("tok-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.password_hash, "hash-2");
    }
}
