//! User registration.
//!
//! - POST `/register` - Create an account

use std::borrow::Cow;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use serde::Deserialize;
use tracing::{info, warn};
use validator::{Validate, ValidationError};

use super::error::{ApiError, ResultExt, ValidJson};
use crate::db::{Database, NewUser};
use crate::password::hash_password_blocking;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
}

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/register", post(register))
        .with_state(state)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(email(message = "Invalid Email! Please enter valid email."))]
    pub email: String,
    #[serde(default)]
    #[validate(length(min = 4, max = 16, message = "Username must be between 4 and 16 characters"))]
    pub username: String,
    #[serde(default)]
    #[validate(length(min = 4, max = 16, message = "Firstname must be between 4 and 16 characters"))]
    pub firstname: String,
    #[serde(default)]
    #[validate(length(min = 1, max = 16, message = "Lastname must be between 1 and 16 characters"))]
    pub lastname: String,
    #[serde(default)]
    #[validate(custom(function = "password_rules"))]
    pub password: String,
    #[serde(default)]
    #[validate(must_match(other = "password", message = "Passwords must match"))]
    pub confirm_password: String,
}

const PASSWORD_SYMBOLS: &str = "!@#$%^&*(),.?\":{}|<>";

/// Check a password against the complexity rules, returning the first failure.
pub fn password_problem(password: &str) -> Option<&'static str> {
    if password.is_empty() {
        return Some("Password is required");
    }
    if password.chars().count() < 8 {
        return Some("Password must be at least 8 characters");
    }
    if !password.chars().any(|c| PASSWORD_SYMBOLS.contains(c)) {
        return Some("Password must contain at least one symbol");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Some("Password must contain at least one number");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return Some("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return Some("Password must contain at least one lowercase letter");
    }
    None
}

fn password_rules(password: &str) -> Result<(), ValidationError> {
    match password_problem(password) {
        None => Ok(()),
        Some(problem) => {
            let mut error = ValidationError::new("password");
            error.message = Some(Cow::Borrowed(problem));
            Err(error)
        }
    }
}

async fn register(
    State(state): State<UsersState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let password_hash = hash_password_blocking(req.password.clone())
        .await
        .map_err(|e| ApiError::internal("Failed to hash password", e))?;

    let user = state
        .db
        .users()
        .create(&NewUser {
            username: &req.username,
            email: &req.email,
            firstname: &req.firstname,
            lastname: &req.lastname,
            password_hash: &password_hash,
        })
        .await
        .db_err("Failed to create user")?;

    // The startup backfill picks up any user this misses
    if let Err(e) = state.db.profiles().ensure_default(user.id).await {
        warn!(user = %user.uuid, error = %e, "Failed to create default profile");
    }

    info!(user = %user.uuid, username = %user.username, "User registered");

    Ok((StatusCode::CREATED, Json(user)))
}
