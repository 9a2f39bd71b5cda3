//! Authentication error types.

use axum::response::{IntoResponse, Response};

use crate::api::ApiError;
use crate::jwt::TokenError;

/// Why the gate rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No usable credential was presented.
    MissingCredentials,
    /// A credential was presented but failed verification.
    InvalidToken,
    /// A credential was presented but its expiry has passed.
    ExpiredToken,
    /// The refresh token names a session that is gone or no longer valid.
    SessionRevokedOrAbsent,
    /// The session store failed while checking the session.
    StoreFault,
    /// A renewed access token could not be signed.
    SigningFailed,
}

impl AuthError {
    /// Whether the presented cookies are useless and should be cleared.
    pub fn clears_cookies(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidToken | AuthError::ExpiredToken | AuthError::SessionRevokedOrAbsent
        )
    }

    /// Cookie-mode view of a token failure: expiry is not distinguished.
    pub fn into_cookie_failure(self) -> Self {
        match self {
            AuthError::ExpiredToken => AuthError::InvalidToken,
            other => other,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials | AuthError::StoreFault => "Unauthorized access",
            AuthError::InvalidToken => "Invalid token",
            AuthError::ExpiredToken => "Session expired. Please log in again.",
            AuthError::SessionRevokedOrAbsent => "Session is no longer valid",
            AuthError::SigningFailed => "Internal Server Error",
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AuthError::ExpiredToken,
            TokenError::KeyUnavailable => {
                tracing::error!("Token verification attempted without a public key");
                AuthError::InvalidToken
            }
            _ => AuthError::InvalidToken,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::ExpiredToken => ApiError::TokenExpired,
            AuthError::SigningFailed => ApiError::internal("Failed to sign renewed access token", e),
            AuthError::MissingCredentials
            | AuthError::InvalidToken
            | AuthError::SessionRevokedOrAbsent
            | AuthError::StoreFault => ApiError::unauthorized(e.message()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ApiError::from(self).into_response()
    }
}
