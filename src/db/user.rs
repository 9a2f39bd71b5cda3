use sqlx::sqlite::SqlitePool;

use crate::password::verify_password_blocking;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// A user record. The password hash never leaves this module.
#[derive(Debug, Clone, serde::Serialize)]
pub struct User {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub uuid: String,
    pub username: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

/// Fields for a new user. The password must already be hashed.
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub firstname: &'a str,
    pub lastname: &'a str,
    pub password_hash: &'a str,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    username: String,
    email: String,
    firstname: String,
    lastname: String,
    created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            username: row.username,
            email: row.email,
            firstname: row.firstname,
            lastname: row.lastname,
            created_at: row.created_at,
        }
    }
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new user. Fails with a unique violation on a taken username or email.
    pub async fn create(&self, user: &NewUser<'_>) -> Result<User, sqlx::Error> {
        let uuid = uuid::Uuid::new_v4().to_string();
        let result = sqlx::query(
            "INSERT INTO users (uuid, username, email, password_hash, firstname, lastname) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&uuid)
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.firstname)
        .bind(user.lastname)
        .execute(&self.pool)
        .await?;

        self.get_by_id(result.last_insert_rowid())
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, uuid, username, email, firstname, lastname, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, uuid, username, email, firstname, lastname, created_at FROM users WHERE uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by username (case-insensitive).
    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, uuid, username, email, firstname, lastname, created_at FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Check a username-or-email and password pair.
    /// Returns `None` for an unknown login or a wrong password.
    pub async fn verify_credentials(
        &self,
        login: &str,
        password: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        let row: Option<(i64, String)> =
            sqlx::query_as("SELECT id, password_hash FROM users WHERE username = ? OR email = ?")
                .bind(login)
                .bind(login)
                .fetch_optional(&self.pool)
                .await?;

        let Some((id, hash)) = row else {
            return Ok(None);
        };

        if !verify_password_blocking(password.to_string(), hash).await {
            return Ok(None);
        }

        self.get_by_id(id).await
    }

    /// Delete a user by ID.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
