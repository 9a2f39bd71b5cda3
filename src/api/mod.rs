mod auth;
mod error;
mod profiles;
mod users;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};
use std::sync::Arc;

use crate::auth::ServerSettings;
use crate::db::Database;
use crate::jwt::TokenCodec;

pub use error::{
    ApiError, ApiJson, INTERNAL_MESSAGE, ResultExt, TOKEN_EXPIRED_MESSAGE, TOKEN_EXPIRED_STATUS,
    UNAUTHORIZED_MESSAGE, ValidJson, field_messages, not_found,
};

/// Create the API router, to be nested under `/api/v1`.
pub fn create_api_router(db: Database, codec: Arc<TokenCodec>, settings: ServerSettings) -> Router {
    let auth_state = auth::AuthState {
        db: db.clone(),
        codec,
        settings,
    };

    let users_state = users::UsersState { db: db.clone() };
    let profiles_state = profiles::ProfilesState { db };

    Router::new()
        .nest("/auth", auth::router(auth_state))
        .nest("/user", users::router(users_state))
        .nest("/profiles", profiles::router(profiles_state.clone()))
        .merge(profiles::own_router(profiles_state))
}

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Routes outside `/api/v1`.
pub fn create_root_router() -> Router {
    Router::new().route("/health", get(health))
}
