//! Authentication identity types.

use serde::{Deserialize, Serialize};

use crate::db::User;

/// The authenticated caller, attached to the request by the gate.
///
/// Rebuilt from the access token or the session's owner on every request.
/// Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Public user UUID
    pub id: String,
    pub username: String,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            id: user.uuid.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            firstname: user.firstname.clone(),
            lastname: user.lastname.clone(),
        }
    }
}

/// Result of a successful pass through the gate.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
    /// Set-Cookie value for a freshly minted access token (renewal path only)
    pub renewed_access_cookie: Option<String>,
}
