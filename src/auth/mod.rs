//! Authentication for API routes.
//!
//! Dual-token system: short-lived access tokens (stateless, never revoked
//! individually) and longer-lived refresh tokens bound to a revocable
//! server-side session. The gate middleware renews expired access tokens
//! from a still-valid session.

mod cookie;
mod errors;
mod exempt;
mod extractors;
mod gate;
mod state;
mod types;

pub use cookie::{
    ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_auth_cookies, get_cookie, token_cookie,
};
pub use errors::AuthError;
pub use exempt::{ExemptRoute, ExemptionTable, default_exemptions};
pub use extractors::Auth;
pub use gate::{GateState, auth_gate, authenticate_request};
pub use state::{HasAuthBackend, ServerSettings};
pub use types::{Authenticated, Identity};
