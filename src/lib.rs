pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod password;

use api::{create_api_router, create_root_router, not_found};
use auth::{ExemptionTable, GateState, ServerSettings, auth_gate};
use axum::{Router, middleware};
use db::Database;
use jwt::{KeyMaterial, TokenCodec, TokenSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Prefix under which every API route is mounted.
pub const API_PREFIX: &str = "/api/v1";

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Issuer, audience, algorithm and token lifetimes
    pub token_settings: TokenSettings,
    /// Keys loaded once at startup
    pub keys: KeyMaterial,
    /// Cookie flags and user-agent binding
    pub settings: ServerSettings,
    /// Routes reachable without credentials
    pub exemptions: ExemptionTable,
}

/// Create the application router with the given configuration.
///
/// The gate wraps the whole router so it sees full request paths, including
/// unmatched ones.
pub fn create_app(config: &ServerConfig) -> Router {
    let codec = Arc::new(TokenCodec::new(
        config.token_settings.clone(),
        config.keys.clone(),
    ));

    let gate_state = GateState {
        db: config.db.clone(),
        codec: codec.clone(),
        settings: config.settings,
        exemptions: Arc::new(config.exemptions.clone()),
    };

    let api_router = create_api_router(config.db.clone(), codec, config.settings);

    create_root_router()
        .nest(API_PREFIX, api_router)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(gate_state, auth_gate))
}

/// Run startup tasks and spawn the background cleanup scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database, session_max_age_secs: u64) {
    cleanup::run_startup_tasks(db).await;
    cleanup::run_cleanup(db, session_max_age_secs).await;
    cleanup::spawn_cleanup_scheduler(db.clone(), session_max_age_secs);
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    init_cleanup(&config.db, config.token_settings.refresh_ttl).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
