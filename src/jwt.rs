//! Signed access and refresh tokens.
//!
//! Tokens are signed with a private key and verified with the matching public
//! key, so instances that only hold the public key can verify but never mint.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

use crate::auth::Identity;

/// Default access token lifetime: 1 hour
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 60 * 60;

/// Default refresh token lifetime: 1 day
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 24 * 60 * 60;

pub const DEFAULT_ISSUER: &str = "Lasverg Inc.";
pub const DEFAULT_AUDIENCE: &str = "https://lasverg.io";

/// Issuer, audience, algorithm and lifetimes applied to every token.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub issuer: String,
    pub audience: String,
    pub algorithm: Algorithm,
    /// Access token lifetime in seconds
    pub access_ttl: u64,
    /// Refresh token lifetime in seconds
    pub refresh_ttl: u64,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            algorithm: Algorithm::RS256,
            access_ttl: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl: DEFAULT_REFRESH_TTL_SECS,
        }
    }
}

/// Token body, tagged by `typ`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "typ", rename_all = "snake_case")]
pub enum TokenPayload {
    /// Short-lived credential carrying the caller's identity.
    Access { data: Identity },
    /// Long-lived credential naming a server-side session.
    Refresh { session: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    iss: String,
    aud: String,
    iat: u64,
    exp: u64,
    #[serde(flatten)]
    payload: TokenPayload,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Lifetime in seconds, used as cookie Max-Age
    pub duration: u64,
}

/// Key pair loaded once at startup.
///
/// Either half may be absent. A missing private key makes every `sign` call
/// fail, a missing public key makes every `verify` call fail.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    signing: Option<EncodingKey>,
    verifying: Option<DecodingKey>,
}

impl KeyMaterial {
    /// Key material with neither half present.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse PEM encoded keys for the given algorithm.
    pub fn from_pem(
        algorithm: Algorithm,
        private_pem: Option<&[u8]>,
        public_pem: Option<&[u8]>,
    ) -> Result<Self, TokenError> {
        let signing = private_pem
            .map(|pem| encoding_key(algorithm, pem))
            .transpose()?;
        let verifying = public_pem
            .map(|pem| decoding_key(algorithm, pem))
            .transpose()?;
        Ok(Self { signing, verifying })
    }

    /// Load keys from disk. Failures are logged and leave that half empty.
    pub fn load(algorithm: Algorithm, private_path: &Path, public_path: &Path) -> Self {
        let signing = read_key(private_path, "private")
            .and_then(|pem| match encoding_key(algorithm, &pem) {
                Ok(key) => Some(key),
                Err(e) => {
                    error!(path = %private_path.display(), error = %e, "Invalid private key");
                    None
                }
            });
        let verifying = read_key(public_path, "public")
            .and_then(|pem| match decoding_key(algorithm, &pem) {
                Ok(key) => Some(key),
                Err(e) => {
                    error!(path = %public_path.display(), error = %e, "Invalid public key");
                    None
                }
            });
        Self { signing, verifying }
    }

    pub fn can_sign(&self) -> bool {
        self.signing.is_some()
    }

    pub fn can_verify(&self) -> bool {
        self.verifying.is_some()
    }
}

fn read_key(path: &Path, which: &str) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(pem) => Some(pem),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to read {} key", which);
            None
        }
    }
}

fn encoding_key(algorithm: Algorithm, pem: &[u8]) -> Result<EncodingKey, TokenError> {
    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => EncodingKey::from_rsa_pem(pem),
        Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => EncodingKey::from_ed_pem(pem),
        _ => return Err(TokenError::UnsupportedAlgorithm(algorithm)),
    }
    .map_err(TokenError::Key)
}

fn decoding_key(algorithm: Algorithm, pem: &[u8]) -> Result<DecodingKey, TokenError> {
    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem),
        _ => return Err(TokenError::UnsupportedAlgorithm(algorithm)),
    }
    .map_err(TokenError::Key)
}

/// Whether an algorithm signs with a private/public key pair.
pub fn is_asymmetric(algorithm: Algorithm) -> bool {
    !matches!(
        algorithm,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    )
}

/// Signs and verifies tokens with a fixed key pair and settings.
#[derive(Clone)]
pub struct TokenCodec {
    settings: TokenSettings,
    keys: KeyMaterial,
}

impl TokenCodec {
    pub fn new(settings: TokenSettings, keys: KeyMaterial) -> Self {
        Self { settings, keys }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Sign an access token embedding the identity under `data`.
    pub fn sign(&self, identity: &Identity) -> Result<SignedToken, TokenError> {
        self.encode(
            TokenPayload::Access {
                data: identity.clone(),
            },
            self.settings.access_ttl,
        )
    }

    /// Sign a refresh token naming only the session.
    pub fn sign_refresh(&self, session_id: &str) -> Result<SignedToken, TokenError> {
        self.encode(
            TokenPayload::Refresh {
                session: session_id.to_string(),
            },
            self.settings.refresh_ttl,
        )
    }

    /// Verify signature, issuer, audience, algorithm and expiry.
    pub fn verify(&self, token: &str) -> Result<TokenPayload, TokenError> {
        let key = self.keys.verifying.as_ref().ok_or(TokenError::KeyUnavailable)?;

        let mut validation = Validation::new(self.settings.algorithm);
        validation.leeway = 0;
        validation.set_issuer(&[&self.settings.issuer]);
        validation.set_audience(&[&self.settings.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = jsonwebtoken::decode::<Claims>(token, key, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e),
            }
        })?;

        Ok(data.claims.payload)
    }

    /// Verify an access token and return the embedded identity.
    pub fn verify_access(&self, token: &str) -> Result<Identity, TokenError> {
        match self.verify(token)? {
            TokenPayload::Access { data } => Ok(data),
            TokenPayload::Refresh { .. } => Err(TokenError::WrongTokenType),
        }
    }

    /// Verify a refresh token and return the embedded session id.
    pub fn verify_refresh(&self, token: &str) -> Result<String, TokenError> {
        match self.verify(token)? {
            TokenPayload::Refresh { session } => Ok(session),
            TokenPayload::Access { .. } => Err(TokenError::WrongTokenType),
        }
    }

    fn encode(&self, payload: TokenPayload, duration: u64) -> Result<SignedToken, TokenError> {
        let key = self.keys.signing.as_ref().ok_or(TokenError::KeyUnavailable)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| TokenError::TimeError)?
            .as_secs();
        let exp = now + duration;

        let claims = Claims {
            iss: self.settings.issuer.clone(),
            aud: self.settings.audience.clone(),
            iat: now,
            exp,
            payload,
        };

        let token = jsonwebtoken::encode(&Header::new(self.settings.algorithm), &claims, key)
            .map_err(TokenError::Encoding)?;

        Ok(SignedToken {
            token,
            expires_at: exp,
            duration,
        })
    }
}

/// Errors that can occur during token operations.
#[derive(Debug)]
pub enum TokenError {
    /// The token's expiry has passed
    Expired,
    /// Bad signature, issuer, audience, algorithm or malformed input
    Invalid(jsonwebtoken::errors::Error),
    /// Refresh token used as an access token or the other way round
    WrongTokenType,
    /// The key needed for this operation was never loaded
    KeyUnavailable,
    /// Key material could not be parsed
    Key(jsonwebtoken::errors::Error),
    /// Symmetric algorithms cannot be used with a key pair
    UnsupportedAlgorithm(Algorithm),
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
}

impl TokenError {
    /// Whether the failure means the token expired rather than being bad.
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenError::Expired)
    }
}

impl std::fmt::Display for TokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenError::Expired => write!(f, "Token expired"),
            TokenError::Invalid(e) => write!(f, "Invalid token: {}", e),
            TokenError::WrongTokenType => write!(f, "Wrong token type"),
            TokenError::KeyUnavailable => write!(f, "Key material not loaded"),
            TokenError::Key(e) => write!(f, "Invalid key material: {}", e),
            TokenError::UnsupportedAlgorithm(alg) => {
                write!(f, "Unsupported signing algorithm: {:?}", alg)
            }
            TokenError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            TokenError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for TokenError {}
