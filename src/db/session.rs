//! Server-side sessions backing refresh tokens.
//!
//! A refresh token is only as good as the session it names: once a session
//! is invalidated it never authorizes renewal again.

use sqlx::sqlite::SqlitePool;

/// A session record.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    #[serde(skip)]
    pub user_id: i64,
    pub valid: bool,
    pub user_agent: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for a new session. Sessions start valid unless the caller says otherwise.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: i64,
    pub user_agent: Option<String>,
    pub valid: bool,
}

impl NewSession {
    pub fn new(user_id: i64, user_agent: Option<String>) -> Self {
        Self {
            user_id,
            user_agent,
            valid: true,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: i64,
    valid: i32,
    user_agent: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            valid: row.valid != 0,
            user_agent: row.user_agent,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Store for managing sessions.
pub struct SessionStore {
    pool: SqlitePool,
}

impl SessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new session with a random opaque id.
    pub async fn create(&self, session: &NewSession) -> Result<Session, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();

        sqlx::query("INSERT INTO sessions (id, user_id, valid, user_agent) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(session.user_id)
            .bind(session.valid as i32)
            .bind(session.user_agent.as_deref())
            .execute(&self.pool)
            .await?;

        self.get(&id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Get a session by id. A missing session is `Ok(None)`, not an error.
    pub async fn get(&self, id: &str) -> Result<Option<Session>, sqlx::Error> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT id, user_id, valid, user_agent, created_at, updated_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    /// Mark a session invalid. Idempotent; returns the number of sessions matched.
    pub async fn invalidate(&self, id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET valid = 0, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Invalidate every still-valid session of a user (sign out everywhere).
    pub async fn invalidate_all_for_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET valid = 0, updated_at = datetime('now') WHERE user_id = ? AND valid = 1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Hard-delete a session.
    pub async fn remove(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List a user's sessions, newest first.
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<Session>, sqlx::Error> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT id, user_id, valid, user_agent, created_at, updated_at FROM sessions WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    /// Delete sessions created more than `max_age_secs` ago.
    /// Their refresh tokens can no longer verify.
    pub async fn delete_stale(&self, max_age_secs: u64) -> Result<u64, sqlx::Error> {
        let modifier = format!("-{} seconds", max_age_secs);
        let result = sqlx::query("DELETE FROM sessions WHERE created_at < datetime('now', ?)")
            .bind(modifier)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
