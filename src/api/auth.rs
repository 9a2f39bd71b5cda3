//! Sign-in and session management endpoints.
//!
//! - POST `/signin` - Exchange credentials for access and refresh tokens
//! - GET `/validate` - Return the caller's identity
//! - POST `/signout` - Invalidate the current session and clear cookies
//! - POST `/signout-all` - Invalidate every session of the caller
//! - GET `/sessions` - List the caller's sessions

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::error::{ApiError, ApiJson, ResultExt, UNAUTHORIZED_MESSAGE};
use crate::auth::{
    ACCESS_COOKIE_NAME, Auth, Identity, REFRESH_COOKIE_NAME, ServerSettings, clear_auth_cookies,
    get_cookie, token_cookie,
};
use crate::db::{Database, NewSession, Session};
use crate::impl_has_auth_backend;
use crate::jwt::TokenCodec;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
    pub settings: ServerSettings,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/signin", post(signin))
        .route("/validate", get(validate))
        .route("/signout", post(signout))
        .route("/signout-all", post(signout_all))
        .route("/sessions", get(list_sessions))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    #[serde(default)]
    pub password: String,
}

impl SigninRequest {
    /// The login name: username if given, else email.
    fn login(&self) -> Option<&str> {
        self.username
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.email.as_deref().filter(|s| !s.is_empty()))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SigninResponse {
    access_token: String,
    refresh_token: String,
    user: Identity,
}

#[derive(Serialize)]
struct ValidateResponse {
    user: Identity,
}

#[derive(Serialize)]
struct SignoutResponse {
    message: &'static str,
    revoked: u64,
}

#[derive(Serialize)]
struct SessionInfo {
    #[serde(flatten)]
    session: Session,
    current: bool,
}

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<SessionInfo>,
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// The session id named by the request's refresh cookie, if it still verifies.
fn current_session_id(codec: &TokenCodec, headers: &HeaderMap) -> Option<String> {
    let token = get_cookie(headers, REFRESH_COOKIE_NAME)?;
    codec.verify_refresh(token).ok()
}

/// Resolve the caller's internal user id.
async fn caller_id(db: &Database, identity: &Identity) -> Result<i64, ApiError> {
    db.users()
        .get_by_uuid(&identity.id)
        .await
        .db_err("Failed to look up user")?
        .map(|user| user.id)
        .ok_or_else(|| ApiError::unauthorized(UNAUTHORIZED_MESSAGE))
}

fn with_cleared_cookies(settings: ServerSettings, body: impl IntoResponse) -> Response {
    let [access, refresh] = clear_auth_cookies(settings.secure_cookies);
    (
        [(header::SET_COOKIE, access), (header::SET_COOKIE, refresh)],
        body,
    )
        .into_response()
}

async fn signin(
    State(state): State<AuthState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<SigninRequest>,
) -> Result<Response, ApiError> {
    let mut errors = BTreeMap::new();
    if req.login().is_none() {
        errors.insert(
            "username".to_string(),
            "Username or email is required".to_string(),
        );
    }
    if req.password.is_empty() {
        errors.insert("password".to_string(), "Password is required".to_string());
    }
    let Some(login) = req.login().filter(|_| errors.is_empty()) else {
        return Err(ApiError::Validation(errors));
    };

    let user = state
        .db
        .users()
        .verify_credentials(login, &req.password)
        .await
        .db_err("Failed to verify credentials")?
        .ok_or_else(|| {
            warn!(login = %login, "Failed sign-in attempt");
            ApiError::unauthorized("Invalid credentials")
        })?;

    let session = state
        .db
        .sessions()
        .create(&NewSession::new(user.id, user_agent(&headers)))
        .await
        .db_err("Failed to create session")?;

    let identity = Identity::from(&user);
    let access = state
        .codec
        .sign(&identity)
        .map_err(|e| ApiError::internal("Failed to sign access token", e))?;
    let refresh = state
        .codec
        .sign_refresh(&session.id)
        .map_err(|e| ApiError::internal("Failed to sign refresh token", e))?;

    info!(user = %user.uuid, session = %session.id, "User signed in");

    let secure = state.settings.secure_cookies;
    let access_cookie = token_cookie(ACCESS_COOKIE_NAME, &access.token, access.duration, secure);
    let refresh_cookie =
        token_cookie(REFRESH_COOKIE_NAME, &refresh.token, refresh.duration, secure);

    Ok((
        [
            (header::SET_COOKIE, access_cookie),
            (header::SET_COOKIE, refresh_cookie),
        ],
        Json(SigninResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            user: identity,
        }),
    )
        .into_response())
}

async fn validate(Auth(identity): Auth) -> Json<ValidateResponse> {
    Json(ValidateResponse { user: identity })
}

async fn signout(
    State(state): State<AuthState>,
    Auth(identity): Auth,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let mut revoked = 0;

    if let Some(session_id) = current_session_id(&state.codec, &headers) {
        let user_id = caller_id(&state.db, &identity).await?;
        let session = state
            .db
            .sessions()
            .get(&session_id)
            .await
            .db_err("Failed to look up session")?;

        match session {
            Some(session) if session.user_id == user_id => {
                revoked = state
                    .db
                    .sessions()
                    .invalidate(&session.id)
                    .await
                    .db_err("Failed to invalidate session")?;
                info!(user = %identity.id, session = %session.id, "User signed out");
            }
            Some(session) => {
                warn!(user = %identity.id, session = %session.id, "Refusing to sign out a session owned by another user");
            }
            None => {}
        }
    }

    Ok(with_cleared_cookies(
        state.settings,
        Json(SignoutResponse {
            message: "Signed out",
            revoked,
        }),
    ))
}

async fn signout_all(
    State(state): State<AuthState>,
    Auth(identity): Auth,
) -> Result<Response, ApiError> {
    let user_id = caller_id(&state.db, &identity).await?;
    let revoked = state
        .db
        .sessions()
        .invalidate_all_for_user(user_id)
        .await
        .db_err("Failed to invalidate sessions")?;

    info!(user = %identity.id, revoked, "User signed out everywhere");

    Ok(with_cleared_cookies(
        state.settings,
        Json(SignoutResponse {
            message: "Signed out of all sessions",
            revoked,
        }),
    ))
}

async fn list_sessions(
    State(state): State<AuthState>,
    Auth(identity): Auth,
    headers: HeaderMap,
) -> Result<Json<SessionsResponse>, ApiError> {
    let user_id = caller_id(&state.db, &identity).await?;
    let current = current_session_id(&state.codec, &headers);

    let sessions = state
        .db
        .sessions()
        .list_by_user(user_id)
        .await
        .db_err("Failed to list sessions")?
        .into_iter()
        .map(|session| SessionInfo {
            current: current.as_deref() == Some(session.id.as_str()),
            session,
        })
        .collect();

    Ok(Json(SessionsResponse { sessions }))
}
