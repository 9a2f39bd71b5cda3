use std::borrow::Cow;

use sqlx::sqlite::SqlitePool;
use url::Url;
use validator::{Validate, ValidationError};

/// A link shown on a public profile.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Validate)]
pub struct Link {
    #[validate(length(min = 2, max = 50, message = "Platform must be between 2 and 50 characters"))]
    pub platform: String,
    #[validate(custom(function = "link_url"))]
    pub url: String,
}

/// Absolute http, https or ftp URL with a dotted host.
fn link_url(url: &str) -> Result<(), ValidationError> {
    let message = if url.is_empty() {
        "URL is required"
    } else if Url::parse(url).is_ok_and(|parsed| {
        matches!(parsed.scheme(), "http" | "https" | "ftp")
            && parsed
                .host_str()
                .is_some_and(|host| host.contains('.') && host.split('.').all(|l| !l.is_empty()))
    }) {
        return Ok(());
    } else {
        "Enter a valid URL"
    };

    let mut error = ValidationError::new("url");
    error.message = Some(Cow::Borrowed(message));
    Err(error)
}

/// Public profile data owned by a user.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(skip)]
    pub user_id: i64,
    pub bio: String,
    pub links: Vec<Link>,
    pub updated_at: String,
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    user_id: i64,
    bio: String,
    links_json: String,
    updated_at: String,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = sqlx::Error;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        let links = serde_json::from_str(&row.links_json)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            user_id: row.user_id,
            bio: row.bio,
            links,
            updated_at: row.updated_at,
        })
    }
}

pub struct ProfileStore {
    pool: SqlitePool,
}

impl ProfileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a user's profile, if one was ever saved.
    pub async fn get(&self, user_id: i64) -> Result<Option<Profile>, sqlx::Error> {
        let row: Option<ProfileRow> = sqlx::query_as(
            "SELECT user_id, bio, links_json, updated_at FROM profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Profile::try_from).transpose()
    }

    /// Create or replace a user's profile.
    pub async fn upsert(
        &self,
        user_id: i64,
        bio: &str,
        links: &[Link],
    ) -> Result<Profile, sqlx::Error> {
        let links_json =
            serde_json::to_string(links).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            "INSERT INTO profiles (user_id, bio, links_json) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                bio = excluded.bio,
                links_json = excluded.links_json,
                updated_at = datetime('now')",
        )
        .bind(user_id)
        .bind(bio)
        .bind(&links_json)
        .execute(&self.pool)
        .await?;

        self.get(user_id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    /// Create a profile. Returns `None` when the user already has one.
    pub async fn create(
        &self,
        user_id: i64,
        bio: &str,
        links: &[Link],
    ) -> Result<Option<Profile>, sqlx::Error> {
        let links_json =
            serde_json::to_string(links).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let result = sqlx::query(
            "INSERT INTO profiles (user_id, bio, links_json) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(bio)
        .bind(&links_json)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(user_id).await
    }

    /// Change only the given fields. Returns `None` when there is no profile.
    pub async fn update(
        &self,
        user_id: i64,
        bio: Option<&str>,
        links: Option<&[Link]>,
    ) -> Result<Option<Profile>, sqlx::Error> {
        let links_json = links
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let result = sqlx::query(
            "UPDATE profiles SET
                bio = COALESCE(?, bio),
                links_json = COALESCE(?, links_json),
                updated_at = datetime('now')
             WHERE user_id = ?",
        )
        .bind(bio)
        .bind(links_json)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(user_id).await
    }

    /// Give one user the default profile if they have none.
    /// Returns whether a profile was created.
    pub async fn ensure_default(&self, user_id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO profiles (user_id, bio, links_json)
             SELECT id, 'Hello! I''m ' || TRIM(firstname || ' ' || lastname) || '.', '[]'
             FROM users
             WHERE id = ?
               AND NOT EXISTS (SELECT 1 FROM profiles WHERE profiles.user_id = users.id)",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Give every user without a profile a default one greeting by name.
    /// Returns the number of profiles created.
    pub async fn ensure_defaults(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO profiles (user_id, bio, links_json)
             SELECT id, 'Hello! I''m ' || TRIM(firstname || ' ' || lastname) || '.', '[]'
             FROM users
             WHERE NOT EXISTS (SELECT 1 FROM profiles WHERE profiles.user_id = users.id)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewUser};

    async fn db_with_user() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let user = db
            .users()
            .create(&NewUser {
                username: "bob",
                email: "bob@example.com",
                firstname: "Bob",
                lastname: "Builder",
                password_hash: "unused",
            })
            .await
            .unwrap();
        (db, user.id)
    }

    #[tokio::test]
    async fn test_missing_profile() {
        let (db, user_id) = db_with_user().await;
        assert!(db.profiles().get(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_creates_then_replaces() {
        let (db, user_id) = db_with_user().await;
        let links = vec![Link {
            platform: "github".to_string(),
            url: "https://github.com/bob".to_string(),
        }];

        let profile = db.profiles().upsert(user_id, "hello", &links).await.unwrap();
        assert_eq!(profile.bio, "hello");
        assert_eq!(profile.links, links);

        let profile = db.profiles().upsert(user_id, "updated", &[]).await.unwrap();
        assert_eq!(profile.bio, "updated");
        assert!(profile.links.is_empty());

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM profiles")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_ensure_defaults_only_fills_gaps() {
        let (db, user_id) = db_with_user().await;
        let other = db
            .users()
            .create(&NewUser {
                username: "carl",
                email: "carl@example.com",
                firstname: "Carl",
                lastname: "Sagan",
                password_hash: "unused",
            })
            .await
            .unwrap();
        db.profiles().upsert(other.id, "Pale blue dot.", &[]).await.unwrap();

        assert_eq!(db.profiles().ensure_defaults().await.unwrap(), 1);
        assert_eq!(db.profiles().ensure_defaults().await.unwrap(), 0);

        let profile = db.profiles().get(user_id).await.unwrap().unwrap();
        assert_eq!(profile.bio, "Hello! I'm Bob Builder.");
        assert!(profile.links.is_empty());

        let untouched = db.profiles().get(other.id).await.unwrap().unwrap();
        assert_eq!(untouched.bio, "Pale blue dot.");
    }

    #[tokio::test]
    async fn test_create_refuses_existing_profile() {
        let (db, user_id) = db_with_user().await;

        let created = db.profiles().create(user_id, "first bio", &[]).await.unwrap();
        assert_eq!(created.unwrap().bio, "first bio");

        assert!(db.profiles().create(user_id, "second bio", &[]).await.unwrap().is_none());
        let profile = db.profiles().get(user_id).await.unwrap().unwrap();
        assert_eq!(profile.bio, "first bio");
    }

    #[tokio::test]
    async fn test_update_changes_only_given_fields() {
        let (db, user_id) = db_with_user().await;
        let links = vec![Link {
            platform: "github".to_string(),
            url: "https://github.com/bob".to_string(),
        }];
        db.profiles().create(user_id, "first bio", &links).await.unwrap();

        let profile = db
            .profiles()
            .update(user_id, Some("second bio"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.bio, "second bio");
        assert_eq!(profile.links, links);

        let profile = db
            .profiles()
            .update(user_id, None, Some(&[]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.bio, "second bio");
        assert!(profile.links.is_empty());
    }

    #[tokio::test]
    async fn test_update_without_profile() {
        let (db, user_id) = db_with_user().await;
        assert!(db.profiles().update(user_id, Some("bio"), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ensure_default_single_user() {
        let (db, user_id) = db_with_user().await;

        assert!(db.profiles().ensure_default(user_id).await.unwrap());
        assert!(!db.profiles().ensure_default(user_id).await.unwrap());
        assert_eq!(
            db.profiles().get(user_id).await.unwrap().unwrap().bio,
            "Hello! I'm Bob Builder."
        );
    }

    #[test]
    fn test_link_url_rules() {
        for url in [
            "https://github.com/bob",
            "http://user@sub.example.org:8080/path?q=1",
            "ftp://files.example.org/pub",
        ] {
            assert!(link_url(url).is_ok(), "{} should be accepted", url);
        }

        for url in [
            "javascript:x@a.b",
            "mailto:x@evil.com",
            "example.org",
            "not a url",
            "https://localhost",
            "https://.com",
        ] {
            assert!(link_url(url).is_err(), "{} should be rejected", url);
        }

        let empty = link_url("").unwrap_err();
        assert_eq!(empty.message.as_deref(), Some("URL is required"));
    }

    #[tokio::test]
    async fn test_corrupt_links_is_decode_error() {
        let (db, user_id) = db_with_user().await;
        sqlx::query("INSERT INTO profiles (user_id, bio, links_json) VALUES (?, '', 'not json')")
            .bind(user_id)
            .execute(db.pool())
            .await
            .unwrap();

        let result = db.profiles().get(user_id).await;
        assert!(matches!(result, Err(sqlx::Error::Decode(_))));
    }
}
