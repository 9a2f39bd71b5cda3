#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use sessiongate::{
    ServerConfig,
    auth::{ServerSettings, default_exemptions},
    create_app,
    db::Database,
    jwt::{KeyMaterial, TokenCodec, TokenSettings},
};
use tower::ServiceExt;

pub const PRIVATE_PEM: &[u8] = include_bytes!("../fixtures/private.pem");
pub const PUBLIC_PEM: &[u8] = include_bytes!("../fixtures/public.pem");
pub const PASSWORD: &str = "Secret#123";
pub const USER_AGENT: &str = "sessiongate-tests/1.0";

pub fn fixture_keys() -> KeyMaterial {
    KeyMaterial::from_pem(Algorithm::RS256, Some(PRIVATE_PEM), Some(PUBLIC_PEM))
        .expect("fixture keys should load")
}

pub struct TestApp {
    pub db: Database,
    pub app: Router,
    pub codec: TokenCodec,
}

/// Cookies and tokens handed out by a successful sign-in.
pub struct SignedIn {
    pub access: String,
    pub refresh: String,
    pub session_id: String,
    pub user: Value,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with(ServerSettings::default(), fixture_keys()).await
    }

    pub async fn with(settings: ServerSettings, keys: KeyMaterial) -> Self {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let token_settings = TokenSettings::default();
        let config = ServerConfig {
            db: db.clone(),
            token_settings: token_settings.clone(),
            keys,
            settings,
            exemptions: default_exemptions(),
        };
        Self {
            db,
            app: create_app(&config),
            codec: TokenCodec::new(token_settings, fixture_keys()),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn register(&self, username: &str) -> Response<Body> {
        let body = json!({
            "email": format!("{}@example.com", username),
            "username": username,
            "firstname": "Tester",
            "lastname": "User",
            "password": PASSWORD,
            "confirmPassword": PASSWORD,
        });
        self.send(post_json("/api/v1/user/register", &body)).await
    }

    /// Register (if needed) and sign in, returning the issued tokens.
    pub async fn signin(&self, username: &str) -> SignedIn {
        if self.db.users().get_by_username(username).await.unwrap().is_none() {
            let response = self.register(username).await;
            assert_eq!(response.status(), 201, "registration failed");
        }

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/auth/signin")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, USER_AGENT)
            .body(Body::from(
                json!({ "username": username, "password": PASSWORD }).to_string(),
            ))
            .unwrap();
        let response = self.send(request).await;
        assert_eq!(response.status(), 200, "sign-in failed");

        let cookies = set_cookies(&response);
        let access = cookie_value(&cookies, "accessToken").expect("access cookie");
        let refresh = cookie_value(&cookies, "refreshToken").expect("refresh cookie");
        let json = body_json(response).await;
        assert_eq!(json["accessToken"], access.as_str());
        assert_eq!(json["refreshToken"], refresh.as_str());

        let session_id = self.codec.verify_refresh(&refresh).unwrap();

        SignedIn {
            access,
            refresh,
            session_id,
            user: json["user"].clone(),
        }
    }
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// A request carrying the given auth cookies.
pub fn with_cookies(
    method: &str,
    uri: &str,
    access: Option<&str>,
    refresh: Option<&str>,
) -> Request<Body> {
    let mut parts = Vec::new();
    if let Some(access) = access {
        parts.push(format!("accessToken={}", access));
    }
    if let Some(refresh) = refresh {
        parts.push(format!("refreshToken={}", refresh));
    }

    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::USER_AGENT, USER_AGENT);
    if !parts.is_empty() {
        builder = builder.header(header::COOKIE, parts.join("; "));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn with_bearer(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

/// A JSON request authenticated with a bearer token.
pub fn bearer_json(method: &str, uri: &str, token: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

/// Value of the named cookie among Set-Cookie headers.
pub fn cookie_value(set_cookies: &[String], name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    set_cookies
        .iter()
        .find(|cookie| cookie.starts_with(&prefix))
        .map(|cookie| {
            cookie[prefix.len()..]
                .split(';')
                .next()
                .unwrap_or_default()
                .to_string()
        })
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Sign arbitrary claims with the fixture key, standard issuer and audience.
pub fn sign_claims(mut claims: Value, expires_in: i64) -> String {
    let settings = TokenSettings::default();
    let now = jsonwebtoken::get_current_timestamp() as i64;
    claims["iss"] = json!(settings.issuer);
    claims["aud"] = json!(settings.audience);
    claims["iat"] = json!(now - 7200);
    claims["exp"] = json!(now + expires_in);

    let key = EncodingKey::from_rsa_pem(PRIVATE_PEM).unwrap();
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).unwrap()
}

pub fn expired_access_token(user: &Value) -> String {
    sign_claims(json!({ "typ": "access", "data": user }), -60)
}

pub fn expired_refresh_token(session_id: &str) -> String {
    sign_claims(json!({ "typ": "refresh", "session": session_id }), -60)
}

pub fn refresh_token_for(session_id: &str) -> String {
    sign_claims(json!({ "typ": "refresh", "session": session_id }), 3600)
}
