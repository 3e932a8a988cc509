//! dlbridge Server
//!
//! Serves the qBittorrent-compatible Web API on top of the dlbridge engine,
//! so media managers can use dlbridge as their download client.

pub mod auth;
pub mod compat;
pub mod config;
pub mod error;
pub mod state;

use auth::{AuthProvider, CredentialAuth, OpenAuth};
use axum::{
    extract::Request,
    http::{header, Method},
    middleware::{self, Next},
    response::Response,
    Router,
};
use config::ServerConfig;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// The full application: compatibility routes plus CORS, request tracing
/// and client error logging
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::COOKIE]);

    compat::router(state)
        .layer(middleware::from_fn(log_client_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Log every response with status 404 or above
async fn log_client_errors(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let response = next.run(req).await;
    let status = response.status();
    if status.as_u16() >= 404 {
        tracing::warn!("{} {} -> {}", method, path, status);
    }
    response
}

/// Auth collaborator for the configured credentials
pub fn auth_provider(config: &ServerConfig) -> Arc<dyn AuthProvider> {
    match &config.auth {
        Some(auth) => Arc::new(CredentialAuth::new(&auth.username, &auth.password)),
        None => {
            tracing::warn!("No credentials configured, every login will be accepted");
            Arc::new(OpenAuth::new())
        }
    }
}

/// Bind and serve until `shutdown` resolves
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("qBittorrent-compatible API listening on http://{}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
}
