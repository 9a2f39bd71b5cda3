//! CLI argument parsing, validation, and startup helpers.

use std::path::Path;

use crate::ServerConfig;
use crate::auth::{ServerSettings, default_exemptions};
use crate::db::Database;
use crate::jwt::{
    DEFAULT_AUDIENCE, DEFAULT_ISSUER, KeyMaterial, TokenSettings, is_asymmetric,
};
use clap::Parser;
use jsonwebtoken::Algorithm;
use tracing::{error, info, warn};

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "sessiongate",
    about = "Session-backed JWT authentication service"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Path to SQLite database file (":memory:" for a throwaway database)
    #[arg(short, long, env = "DATABASE", default_value = "sessiongate.db")]
    pub database: String,

    /// Issuer placed in and required of every token
    #[arg(long, env = "TOKEN_ISSUER", default_value = DEFAULT_ISSUER)]
    pub issuer: String,

    /// Audience placed in and required of every token
    #[arg(long, env = "AUDIENCE", default_value = DEFAULT_AUDIENCE)]
    pub audience: String,

    /// Signing algorithm (asymmetric only: RS*, PS*, ES256, ES384, EdDSA)
    #[arg(long, env = "ALGORITHM", default_value = "RS256", value_parser = parse_algorithm)]
    pub algorithm: Algorithm,

    /// Access token lifetime, e.g. "3600", "15m", "1h"
    #[arg(long, env = "ACCESS_TOKEN_TIME_TO_LIVE", default_value = "1h", value_parser = parse_ttl)]
    pub access_ttl: u64,

    /// Refresh token lifetime, e.g. "12h", "1d", "2w"
    #[arg(long, env = "REFRESH_TOKEN_TIME_TO_LIVE", default_value = "1d", value_parser = parse_ttl)]
    pub refresh_ttl: u64,

    /// PEM file holding the signing key
    #[arg(long, env = "PRIVATE_KEY_PATH", default_value = "certs/private.pem")]
    pub private_key_path: String,

    /// PEM file holding the verification key
    #[arg(long, env = "PUBLIC_KEY_PATH", default_value = "certs/public.pem")]
    pub public_key_path: String,

    /// Add the Secure flag to auth cookies (use behind HTTPS)
    #[arg(long, env = "SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Refuse token renewal when the User-Agent differs from the one seen at sign-in
    #[arg(long, env = "BIND_SESSION_USER_AGENT")]
    pub bind_session_user_agent: bool,

    /// Log output format
    #[arg(short, long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Parse a lifetime: bare seconds or a number with an `s`, `m`, `h`, `d` or `w` suffix.
pub fn parse_ttl(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], Some(c)),
        _ => (s, None),
    };

    let multiplier = match unit {
        None | Some('s') => 1,
        Some('m') => 60,
        Some('h') => 60 * 60,
        Some('d') => 24 * 60 * 60,
        Some('w') => 7 * 24 * 60 * 60,
        Some(other) => return Err(format!("Unknown time unit '{}' in '{}'", other, s)),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("Invalid lifetime: '{}'", s));
    }

    let value: u64 = digits
        .parse()
        .map_err(|e| format!("Invalid lifetime '{}': {}", s, e))?;
    if value == 0 {
        return Err("Lifetime must be greater than zero".to_string());
    }

    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Lifetime too large: '{}'", s))
}

/// Parse a signing algorithm name, accepting only asymmetric algorithms.
pub fn parse_algorithm(s: &str) -> Result<Algorithm, String> {
    let algorithm: Algorithm = s
        .trim()
        .parse()
        .map_err(|_| format!("Unknown algorithm: '{}'", s))?;

    if !is_asymmetric(algorithm) {
        return Err(format!(
            "Algorithm {:?} is symmetric; use RS*, PS*, ES256, ES384 or EdDSA",
            algorithm
        ));
    }
    Ok(algorithm)
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load key material, warning about a half that could not be loaded.
pub fn load_key_material(algorithm: Algorithm, private_path: &str, public_path: &str) -> KeyMaterial {
    let keys = KeyMaterial::load(algorithm, Path::new(private_path), Path::new(public_path));

    match (keys.can_sign(), keys.can_verify()) {
        (true, true) => info!(algorithm = ?algorithm, "Key material loaded"),
        (false, true) => warn!("No signing key loaded; sign-in and token renewal will fail"),
        (true, false) => warn!("No verification key loaded; every token will be rejected"),
        (false, false) => error!("No key material loaded; authentication cannot succeed"),
    }

    keys
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, keys: KeyMaterial) -> ServerConfig {
    ServerConfig {
        db,
        token_settings: TokenSettings {
            issuer: args.issuer.clone(),
            audience: args.audience.clone(),
            algorithm: args.algorithm,
            access_ttl: args.access_ttl,
            refresh_ttl: args.refresh_ttl,
        },
        keys,
        settings: ServerSettings {
            secure_cookies: args.secure_cookies,
            bind_user_agent: args.bind_session_user_agent,
        },
        exemptions: default_exemptions(),
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ttl_units() {
        assert_eq!(parse_ttl("90"), Ok(90));
        assert_eq!(parse_ttl("30s"), Ok(30));
        assert_eq!(parse_ttl("15m"), Ok(900));
        assert_eq!(parse_ttl("1h"), Ok(3600));
        assert_eq!(parse_ttl("1d"), Ok(86400));
        assert_eq!(parse_ttl("2w"), Ok(1_209_600));
    }

    #[test]
    fn test_parse_ttl_rejects_bad_values() {
        assert!(parse_ttl("").is_err());
        assert!(parse_ttl("0").is_err());
        assert!(parse_ttl("0h").is_err());
        assert!(parse_ttl("h").is_err());
        assert!(parse_ttl("5y").is_err());
        assert!(parse_ttl("-5m").is_err());
        assert!(parse_ttl("1.5h").is_err());
        assert!(parse_ttl("99999999999999999999w").is_err());
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!(parse_algorithm("RS256"), Ok(Algorithm::RS256));
        assert_eq!(parse_algorithm("ES256"), Ok(Algorithm::ES256));
        assert_eq!(parse_algorithm("EdDSA"), Ok(Algorithm::EdDSA));
        assert!(parse_algorithm("HS256").is_err());
        assert!(parse_algorithm("nope").is_err());
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["sessiongate"]);
        assert_eq!(args.database, "sessiongate.db");
        assert_eq!(args.issuer, DEFAULT_ISSUER);
        assert_eq!(args.audience, DEFAULT_AUDIENCE);
        assert_eq!(args.algorithm, Algorithm::RS256);
        assert_eq!(args.access_ttl, 3600);
        assert_eq!(args.refresh_ttl, 86400);
        assert!(!args.secure_cookies);
        assert!(!args.bind_session_user_agent);
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from([
            "sessiongate",
            "--access-ttl",
            "5m",
            "--algorithm",
            "PS256",
            "--secure-cookies",
            "--bind-session-user-agent",
        ]);
        assert_eq!(args.access_ttl, 300);
        assert_eq!(args.algorithm, Algorithm::PS256);
        assert!(args.secure_cookies);
        assert!(args.bind_session_user_agent);
    }

    #[tokio::test]
    async fn test_build_config() {
        let args = Args::parse_from(["sessiongate", "--secure-cookies"]);
        let db = Database::open(":memory:").await.unwrap();
        let config = build_config(&args, db, KeyMaterial::empty());

        assert!(config.settings.secure_cookies);
        assert!(!config.settings.bind_user_agent);
        assert_eq!(config.token_settings.refresh_ttl, 86400);
        assert!(config.exemptions.is_exempt(&axum::http::Method::POST, "/api/v1/auth/signin"));
    }
}
