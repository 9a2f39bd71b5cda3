//! Routes that bypass authentication.

use axum::http::Method;

/// One entry in the exemption table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExemptRoute {
    /// Exact path, any method.
    Path(String),
    /// Method plus path prefix.
    MethodPrefix { method: Method, prefix: String },
}

impl ExemptRoute {
    pub fn path(path: impl Into<String>) -> Self {
        ExemptRoute::Path(path.into())
    }

    pub fn method_prefix(method: Method, prefix: impl Into<String>) -> Self {
        ExemptRoute::MethodPrefix {
            method,
            prefix: prefix.into(),
        }
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        match self {
            ExemptRoute::Path(exact) => path == exact,
            ExemptRoute::MethodPrefix {
                method: exempt_method,
                prefix,
            } => method == exempt_method && path.starts_with(prefix.as_str()),
        }
    }
}

/// Static allow-list consulted before the gate runs.
#[derive(Debug, Clone, Default)]
pub struct ExemptionTable {
    routes: Vec<ExemptRoute>,
}

impl ExemptionTable {
    pub fn new(routes: Vec<ExemptRoute>) -> Self {
        Self { routes }
    }

    /// Whether any entry matches. Small table, linear scan.
    pub fn is_exempt(&self, method: &Method, path: &str) -> bool {
        self.routes.iter().any(|route| route.matches(method, path))
    }

    pub fn routes(&self) -> &[ExemptRoute] {
        &self.routes
    }
}

/// Health check, sign-in, registration and public profile viewing.
pub fn default_exemptions() -> ExemptionTable {
    ExemptionTable::new(vec![
        ExemptRoute::path("/health"),
        ExemptRoute::path("/api/v1/auth/signin"),
        ExemptRoute::path("/api/v1/user/register"),
        ExemptRoute::method_prefix(Method::GET, "/api/v1/profiles/"),
    ])
}
