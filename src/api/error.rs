//! Shared error handling for API endpoints.
//!
//! Every failure leaves the service as
//! `{"errorResponse": {"code": <status>, "message": <string | {field: msg}>}}`.

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::error;
use validator::{Validate, ValidationErrors};

/// Status used for an expired token, so clients can tell "log in again"
/// apart from "not allowed".
pub const TOKEN_EXPIRED_STATUS: u16 = 440;

pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized access";
pub const TOKEN_EXPIRED_MESSAGE: &str = "Session expired. Please log in again.";
pub const INTERNAL_MESSAGE: &str = "Internal Server Error";

/// Extension trait for concise error mapping on store results.
pub trait ResultExt<T> {
    fn db_err(self, context: &str) -> Result<T, ApiError>;
}

impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn db_err(self, context: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(context, e))
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    TokenExpired,
    /// A uniqueness violation on the named field.
    Conflict { field: String },
    /// Field-level payload validation failures.
    Validation(BTreeMap<String, String>),
    Internal,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(field: impl Into<String>) -> Self {
        Self::Conflict {
            field: field.into(),
        }
    }

    /// Log the raw error and hide it behind a generic 500.
    pub fn internal(context: &str, e: impl std::fmt::Display) -> Self {
        error!(error = %e, "{}", context);
        Self::Internal
    }

    /// Classify a store error: uniqueness violations become 409 naming the
    /// column, anything else is logged and becomes 500.
    pub fn db_error(context: &str, e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                if let Some(field) = unique_violation_field(db.message()) {
                    return Self::conflict(field);
                }
            }
        }
        Self::internal(context, e)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::TokenExpired => {
                StatusCode::from_u16(TOKEN_EXPIRED_STATUS).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> ErrorMessage {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg) => ErrorMessage::Text(msg.clone()),
            ApiError::TokenExpired => ErrorMessage::Text(TOKEN_EXPIRED_MESSAGE.to_string()),
            ApiError::Conflict { field } => {
                ErrorMessage::Text(format!("This {} already exists.", field))
            }
            ApiError::Validation(fields) => ErrorMessage::Fields(fields.clone()),
            ApiError::Internal => ErrorMessage::Text(INTERNAL_MESSAGE.to_string()),
        }
    }
}

/// Pull the column name out of SQLite's "UNIQUE constraint failed: users.email".
fn unique_violation_field(message: &str) -> Option<&str> {
    let columns = message.split(": ").nth(1)?;
    let first = columns.split(',').next()?.trim();
    first.rsplit('.').next().filter(|f| !f.is_empty())
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            ErrorMessage::Text(msg) => write!(f, "{} {}", self.status().as_u16(), msg),
            ErrorMessage::Fields(fields) => {
                write!(f, "{} invalid fields:", self.status().as_u16())?;
                for field in fields.keys() {
                    write!(f, " {}", field)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ApiError {}

#[derive(Serialize)]
#[serde(untagged)]
enum ErrorMessage {
    Text(String),
    Fields(BTreeMap<String, String>),
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: ErrorMessage,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_response: ErrorBody,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorResponse {
            error_response: ErrorBody {
                code: status.as_u16(),
                message: self.message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => {
                let mut fields = BTreeMap::new();
                fields.insert("body".to_string(), e.body_text());
                ApiError::Validation(fields)
            }
            other => ApiError::bad_request(other.body_text()),
        }
    }
}

/// `Json` whose rejections render through [`ApiError`].
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

/// `confirm_password` -> `confirmPassword`, matching the request bodies.
fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// One message per failing field, keyed by the field's JSON name. A field
/// that fails several rules reports the first.
pub fn field_messages(errors: &ValidationErrors) -> BTreeMap<String, String> {
    errors
        .field_errors()
        .into_iter()
        .filter_map(|(field, failures)| {
            let first = failures.first()?;
            let key = camel_case(&field.to_string());
            let message = first
                .message
                .as_ref()
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("{} is invalid", key));
            Some((key, message))
        })
        .collect()
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(field_messages(&errors))
    }
}

/// [`ApiJson`] that also runs the payload's `Validate` rules, rejecting
/// with the 406 field map.
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let ApiJson(value) = ApiJson::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(ValidJson(value))
    }
}

/// Fallback for unmatched routes.
pub async fn not_found() -> ApiError {
    ApiError::not_found("Resource not found")
}
