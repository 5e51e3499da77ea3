pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod csrf;
pub mod db;
pub mod error;
pub mod jwt;
pub mod kv;
pub mod lockout;
pub mod password;
pub mod permissions;
pub mod principal;
pub mod rate_limit;
pub mod refresh;
pub mod reset;
pub mod service;
pub mod session;

use api::{AppState, create_api_router};
use auth::ClientIpHeader;
use axum::Router;
use db::Database;
use service::{AuthCore, SecurityPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Security tunables shared by every component
    pub policy: SecurityPolicy,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// IP extraction strategy (requires running behind a proxy)
    pub ip_header: Option<ClientIpHeader>,
}

/// Build the shared auth core from the configuration.
pub fn build_core(config: &ServerConfig) -> error::Result<Arc<AuthCore>> {
    AuthCore::new(config.db.clone(), &config.jwt_secret, &config.policy).map(Arc::new)
}

/// Create the application router around an existing core.
pub fn create_app(core: Arc<AuthCore>, config: &ServerConfig) -> Router {
    let state = AppState {
        core,
        secure_cookies: config.secure_cookies,
        ip_header: config.ip_header,
    };

    Router::new().nest("/api", create_api_router(state))
}

/// Run cleanup tasks once and spawn the background schedulers.
/// Call this before starting the server.
pub async fn init_background(core: &Arc<AuthCore>) {
    cleanup::run_token_cleanup(&core.refresh).await;
    cleanup::run_reset_cleanup(&core.resets).await;
    cleanup::spawn_token_cleanup(core.refresh.clone(), core.resets.clone());
    cleanup::spawn_bucket_sweeper(core.rate_limiter.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_background` before this to start the cleanup tasks.
pub async fn run_server(
    core: Arc<AuthCore>,
    config: ServerConfig,
    listener: TcpListener,
) -> Result<(), std::io::Error> {
    let app = create_app(core, &config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let core = build_core(&config).map_err(std::io::Error::other)?;
    init_background(&core).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        run_server(core, config, listener).await.ok();
    });

    Ok((handle, local_addr))
}
