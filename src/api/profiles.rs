//! Profile endpoints.
//!
//! - GET `/profiles/{username}` - Public profile of any user
//! - POST `/profiles/{username}` - Create or replace the caller's own profile
//! - GET `/profile` - The caller's own profile
//! - POST `/profile` - Create the caller's profile (409 if one exists)
//! - PUT `/profile` - Change some fields of the caller's profile

use std::borrow::Cow;
use std::collections::BTreeMap;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::{Validate, ValidationError};

use super::error::{ApiError, ApiJson, ResultExt, UNAUTHORIZED_MESSAGE, field_messages};
use crate::auth::{Auth, Identity};
use crate::db::{Database, Link, User};

#[derive(Clone)]
pub struct ProfilesState {
    pub db: Database,
}

/// Routes mounted under `/profiles`.
pub fn router(state: ProfilesState) -> Router {
    Router::new()
        .route("/{username}", get(get_profile).post(save_profile))
        .with_state(state)
}

/// The `/profile` routes, merged at the API root.
pub fn own_router(state: ProfilesState) -> Router {
    Router::new()
        .route(
            "/profile",
            get(get_own_profile)
                .post(create_profile)
                .put(update_profile),
        )
        .with_state(state)
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProfileRequest {
    #[serde(default)]
    #[validate(custom(function = "bio_rules"))]
    pub bio: String,
    #[serde(default)]
    #[validate(length(max = 10, message = "Maximum 10 links allowed"))]
    pub links: Vec<Link>,
}

/// Body of `PUT /profile`; absent fields are left alone.
#[derive(Debug, Deserialize)]
pub struct ProfileUpdate {
    pub bio: Option<String>,
    pub links: Option<Vec<Link>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    username: String,
    firstname: String,
    lastname: String,
    bio: String,
    links: Vec<Link>,
    updated_at: Option<String>,
}

fn bio_rules(bio: &str) -> Result<(), ValidationError> {
    let len = bio.chars().count();
    let message = if len == 0 {
        "Bio is required"
    } else if len < 10 {
        "Bio must be at least 10 characters"
    } else if len > 500 {
        "Bio must not exceed 500 characters"
    } else {
        return Ok(());
    };

    let mut error = ValidationError::new("bio");
    error.message = Some(Cow::Borrowed(message));
    Err(error)
}

/// Validate a profile payload, collecting every failing field. Link
/// failures are keyed `links[<index>].<field>`.
pub fn validate_profile(req: &ProfileRequest) -> Result<(), ApiError> {
    let mut errors = match req.validate() {
        Ok(()) => BTreeMap::new(),
        Err(e) => field_messages(&e),
    };

    for (i, link) in req.links.iter().enumerate() {
        if let Err(e) = link.validate() {
            for (field, message) in field_messages(&e) {
                errors.insert(format!("links[{}].{}", i, field), message);
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

async fn profile_response(db: &Database, user: User) -> Result<ProfileResponse, ApiError> {
    let profile = db
        .profiles()
        .get(user.id)
        .await
        .db_err("Failed to load profile")?;

    let (bio, links, updated_at) = match profile {
        Some(p) => (p.bio, p.links, Some(p.updated_at)),
        None => (String::new(), Vec::new(), None),
    };

    Ok(ProfileResponse {
        username: user.username,
        firstname: user.firstname,
        lastname: user.lastname,
        bio,
        links,
        updated_at,
    })
}

async fn get_profile(
    State(state): State<ProfilesState>,
    Path(username): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = state
        .db
        .users()
        .get_by_username(&username)
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(profile_response(&state.db, user).await?))
}

async fn caller(db: &Database, identity: &Identity) -> Result<User, ApiError> {
    db.users()
        .get_by_uuid(&identity.id)
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::unauthorized(UNAUTHORIZED_MESSAGE))
}

async fn save_profile(
    State(state): State<ProfilesState>,
    Auth(identity): Auth,
    Path(username): Path<String>,
    ApiJson(req): ApiJson<ProfileRequest>,
) -> Result<Json<ProfileResponse>, ApiError> {
    if !identity.username.eq_ignore_ascii_case(&username) {
        return Err(ApiError::forbidden("You can only edit your own profile"));
    }

    validate_profile(&req)?;

    let user = caller(&state.db, &identity).await?;

    state
        .db
        .profiles()
        .upsert(user.id, &req.bio, &req.links)
        .await
        .db_err("Failed to save profile")?;

    info!(user = %user.uuid, "Profile saved");

    Ok(Json(profile_response(&state.db, user).await?))
}

async fn get_own_profile(
    State(state): State<ProfilesState>,
    Auth(identity): Auth,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = caller(&state.db, &identity).await?;
    Ok(Json(profile_response(&state.db, user).await?))
}

async fn create_profile(
    State(state): State<ProfilesState>,
    Auth(identity): Auth,
    ApiJson(req): ApiJson<ProfileRequest>,
) -> Result<(StatusCode, Json<ProfileResponse>), ApiError> {
    validate_profile(&req)?;

    let user = caller(&state.db, &identity).await?;

    state
        .db
        .profiles()
        .create(user.id, &req.bio, &req.links)
        .await
        .db_err("Failed to create profile")?
        .ok_or_else(|| ApiError::conflict("profile"))?;

    info!(user = %user.uuid, "Profile created");

    Ok((StatusCode::CREATED, Json(profile_response(&state.db, user).await?)))
}

async fn update_profile(
    State(state): State<ProfilesState>,
    Auth(identity): Auth,
    ApiJson(req): ApiJson<ProfileUpdate>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user = caller(&state.db, &identity).await?;

    let current = state
        .db
        .profiles()
        .get(user.id)
        .await
        .db_err("Failed to load profile")?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    // Validate the profile as it will look after the change
    validate_profile(&ProfileRequest {
        bio: req.bio.clone().unwrap_or(current.bio),
        links: req.links.clone().unwrap_or(current.links),
    })?;

    state
        .db
        .profiles()
        .update(user.id, req.bio.as_deref(), req.links.as_deref())
        .await
        .db_err("Failed to update profile")?
        .ok_or_else(|| ApiError::not_found("Profile not found"))?;

    info!(user = %user.uuid, "Profile updated");

    Ok(Json(profile_response(&state.db, user).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(platform: &str, url: &str) -> Link {
        Link {
            platform: platform.to_string(),
            url: url.to_string(),
        }
    }

    fn errors(req: &ProfileRequest) -> BTreeMap<String, String> {
        let Err(ApiError::Validation(errors)) = validate_profile(req) else {
            panic!("expected validation error");
        };
        errors
    }

    #[test]
    fn test_valid_profile() {
        let req = ProfileRequest {
            bio: "Writes Rust for a living.".to_string(),
            links: vec![link("github", "https://github.com/frank")],
        };
        assert!(validate_profile(&req).is_ok());
    }

    #[test]
    fn test_bio_rules() {
        let bio = |bio: &str| {
            errors(&ProfileRequest {
                bio: bio.to_string(),
                links: Vec::new(),
            })["bio"]
                .clone()
        };
        assert_eq!(bio(""), "Bio is required");
        assert_eq!(bio("short"), "Bio must be at least 10 characters");
        assert_eq!(bio(&"x".repeat(501)), "Bio must not exceed 500 characters");
    }

    #[test]
    fn test_profile_errors() {
        let errors = errors(&ProfileRequest {
            bio: "short".to_string(),
            links: vec![link("x", "nope")],
        });
        assert_eq!(errors["bio"], "Bio must be at least 10 characters");
        assert_eq!(
            errors["links[0].platform"],
            "Platform must be between 2 and 50 characters"
        );
        assert_eq!(errors["links[0].url"], "Enter a valid URL");
    }

    #[test]
    fn test_script_and_mail_links_rejected() {
        let errors = errors(&ProfileRequest {
            bio: "Writes Rust for a living.".to_string(),
            links: vec![
                link("github", "https://github.com/frank"),
                link("web", "javascript:x@a.b"),
                link("mail", "mailto:x@evil.com"),
            ],
        });
        assert_eq!(errors.len(), 2);
        assert_eq!(errors["links[1].url"], "Enter a valid URL");
        assert_eq!(errors["links[2].url"], "Enter a valid URL");
    }

    #[test]
    fn test_too_many_links() {
        let errors = errors(&ProfileRequest {
            bio: "Writes Rust for a living.".to_string(),
            links: (0..11).map(|_| link("github", "https://github.com")).collect(),
        });
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["links"], "Maximum 10 links allowed");
    }
}
