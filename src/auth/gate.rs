//! The authentication gate.
//!
//! Bearer mode: `Authorization: Bearer <access token>`, verified statelessly.
//! Cookie mode: `accessToken` and/or `refreshToken` cookies. A failing or
//! missing access cookie falls back to the refresh cookie, whose session must
//! still be valid before a new access token is minted and set as a cookie.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

use super::cookie::{
    ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_auth_cookies, get_cookie, token_cookie,
};
use super::errors::AuthError;
use super::exempt::ExemptionTable;
use super::state::{HasAuthBackend, ServerSettings};
use super::types::{Authenticated, Identity};
use crate::db::Database;
use crate::impl_has_auth_backend;
use crate::jwt::TokenCodec;

/// Credentials as presented by the request.
enum Credentials<'a> {
    /// Authorization header present; `None` when it is not a usable bearer token.
    Bearer(Option<&'a str>),
    Cookies {
        access: Option<&'a str>,
        refresh: Option<&'a str>,
    },
}

fn credentials(headers: &HeaderMap) -> Credentials<'_> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let token = value.to_str().ok().and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            let token = token.trim();
            (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
        });
        return Credentials::Bearer(token);
    }

    Credentials::Cookies {
        access: get_cookie(headers, ACCESS_COOKIE_NAME),
        refresh: get_cookie(headers, REFRESH_COOKIE_NAME),
    }
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
}

/// Decide whether the request is authenticated.
///
/// Performs at most one outstanding store call at a time and never retries.
pub async fn authenticate_request<S>(
    headers: &HeaderMap,
    state: &S,
) -> Result<Authenticated, AuthError>
where
    S: HasAuthBackend + Sync,
{
    match credentials(headers) {
        Credentials::Bearer(token) => {
            let token = token.ok_or(AuthError::InvalidToken)?;
            let identity = state.codec().verify_access(token)?;
            Ok(Authenticated {
                identity,
                renewed_access_cookie: None,
            })
        }
        Credentials::Cookies { access, refresh } => {
            authenticate_cookies(access, refresh, user_agent(headers), state).await
        }
    }
}

async fn authenticate_cookies<S>(
    access: Option<&str>,
    refresh: Option<&str>,
    user_agent: Option<&str>,
    state: &S,
) -> Result<Authenticated, AuthError>
where
    S: HasAuthBackend + Sync,
{
    if access.is_none() && refresh.is_none() {
        return Err(AuthError::MissingCredentials);
    }

    // Refresh token is not consulted while the access token is good
    if let Some(token) = access {
        match state.codec().verify_access(token) {
            Ok(identity) => {
                return Ok(Authenticated {
                    identity,
                    renewed_access_cookie: None,
                });
            }
            Err(e) => debug!(error = %e, "Access cookie rejected, trying refresh token"),
        }
    }

    // Expiry is only surfaced in bearer mode; here every failure asks for a sign-in
    let Some(refresh) = refresh else {
        return Err(AuthError::InvalidToken);
    };

    let session_id = state.codec().verify_refresh(refresh).map_err(|e| {
        debug!(error = %e, "Refresh cookie rejected");
        AuthError::from(e).into_cookie_failure()
    })?;
    let identity = session_identity(&session_id, user_agent, state).await?;

    let signed = state.codec().sign(&identity).map_err(|e| {
        error!(error = %e, "Failed to sign renewed access token");
        AuthError::SigningFailed
    })?;

    let cookie = token_cookie(
        ACCESS_COOKIE_NAME,
        &signed.token,
        signed.duration,
        state.settings().secure_cookies,
    );

    Ok(Authenticated {
        identity,
        renewed_access_cookie: Some(cookie),
    })
}

/// Resolve a refresh token's session to the identity of its owner.
async fn session_identity<S>(
    session_id: &str,
    user_agent: Option<&str>,
    state: &S,
) -> Result<Identity, AuthError>
where
    S: HasAuthBackend + Sync,
{
    let session = state
        .db()
        .sessions()
        .get(session_id)
        .await
        .map_err(|e| {
            error!(session = %session_id, error = %e, "Failed to look up session");
            AuthError::StoreFault
        })?
        .filter(|session| session.valid)
        .ok_or(AuthError::SessionRevokedOrAbsent)?;

    if session.user_agent.as_deref() != user_agent {
        if state.settings().bind_user_agent {
            warn!(session = %session.id, "User agent changed, refusing renewal");
            return Err(AuthError::SessionRevokedOrAbsent);
        }
        warn!(session = %session.id, "User agent differs from the one recorded at sign-in");
    }

    let user = state
        .db()
        .users()
        .get_by_id(session.user_id)
        .await
        .map_err(|e| {
            error!(session = %session_id, error = %e, "Failed to look up session owner");
            AuthError::StoreFault
        })?
        .ok_or(AuthError::SessionRevokedOrAbsent)?;

    Ok(Identity::from(&user))
}

/// State for the gate middleware.
#[derive(Clone)]
pub struct GateState {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
    pub settings: ServerSettings,
    pub exemptions: Arc<ExemptionTable>,
}

impl_has_auth_backend!(GateState);

fn sets_access_cookie(response: &Response) -> bool {
    let prefix = format!("{}=", ACCESS_COOKIE_NAME);
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .any(|value| value.as_bytes().starts_with(prefix.as_bytes()))
}

/// Middleware that authenticates every non-exempt request.
///
/// On success the `Identity` is inserted into the request extensions and, on
/// renewal, the new access token cookie is appended to the response unless
/// the handler already set that cookie itself.
pub async fn auth_gate(State(state): State<GateState>, mut request: Request, next: Next) -> Response {
    if state
        .exemptions
        .is_exempt(request.method(), request.uri().path())
    {
        return next.run(request).await;
    }

    let cookie_mode = !request.headers().contains_key(header::AUTHORIZATION);
    let outcome = authenticate_request(request.headers(), &state).await;

    match outcome {
        Ok(Authenticated {
            identity,
            renewed_access_cookie,
        }) => {
            request.extensions_mut().insert(identity);
            let mut response = next.run(request).await;

            if let Some(cookie) = renewed_access_cookie {
                if !sets_access_cookie(&response) {
                    if let Ok(value) = HeaderValue::from_str(&cookie) {
                        response.headers_mut().append(header::SET_COOKIE, value);
                    }
                }
            }
            response
        }
        Err(e) => {
            debug!(
                method = %request.method(),
                path = %request.uri().path(),
                reason = ?e,
                "Request rejected"
            );
            let mut response = e.into_response();

            if cookie_mode && e.clears_cookies() {
                let headers = response.headers_mut();
                for cookie in clear_auth_cookies(state.settings.secure_cookies) {
                    if let Ok(value) = HeaderValue::from_str(&cookie) {
                        headers.append(header::SET_COOKIE, value);
                    }
                }
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(name.clone(), HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_bearer_header_selects_bearer_mode() {
        let h = headers(&[
            (header::AUTHORIZATION, "Bearer abc.def.ghi"),
            (header::COOKIE, "accessToken=xyz"),
        ]);
        assert!(matches!(credentials(&h), Credentials::Bearer(Some("abc.def.ghi"))));
    }

    #[test]
    fn test_bearer_scheme_case_insensitive() {
        let h = headers(&[(header::AUTHORIZATION, "bearer token")]);
        assert!(matches!(credentials(&h), Credentials::Bearer(Some("token"))));
    }

    #[test]
    fn test_non_bearer_scheme_unusable() {
        let h = headers(&[(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")]);
        assert!(matches!(credentials(&h), Credentials::Bearer(None)));

        let h = headers(&[(header::AUTHORIZATION, "Bearer ")]);
        assert!(matches!(credentials(&h), Credentials::Bearer(None)));
    }

    #[test]
    fn test_cookie_mode_without_authorization() {
        let h = headers(&[(header::COOKIE, "refreshToken=r1")]);
        assert!(matches!(
            credentials(&h),
            Credentials::Cookies {
                access: None,
                refresh: Some("r1")
            }
        ));

        assert!(matches!(
            credentials(&HeaderMap::new()),
            Credentials::Cookies {
                access: None,
                refresh: None
            }
        ));
    }
}
