//! Authentication state traits and macro.

use crate::db::Database;
use crate::jwt::TokenCodec;

/// Cookie and session-binding settings shared by auth-aware state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerSettings {
    /// Add the Secure flag to auth cookies
    pub secure_cookies: bool,
    /// Reject renewal when the request's User-Agent differs from the session's
    pub bind_user_agent: bool,
}

/// Trait for state types that provide what the gate needs.
pub trait HasAuthBackend {
    fn codec(&self) -> &TokenCodec;
    fn db(&self) -> &Database;
    fn settings(&self) -> ServerSettings;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `codec: Arc<TokenCodec>`
/// - `db: Database`
/// - `settings: ServerSettings`
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub db: Database,
///     pub codec: Arc<TokenCodec>,
///     pub settings: ServerSettings,
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn codec(&self) -> &$crate::jwt::TokenCodec {
                &self.codec
            }
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
            fn settings(&self) -> $crate::auth::ServerSettings {
                self.settings
            }
        }
    };
}
