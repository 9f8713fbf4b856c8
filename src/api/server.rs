use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::{AppState, api_router};

/// Configuration for the review server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Permissive CORS for a locally served review UI.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            dev_mode: false,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>, dev_mode: bool) -> Router {
    let app = api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Bind and serve until Ctrl-C.
pub async fn start_server(config: ServerConfig, state: Arc<AppState>) -> Result<()> {
    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    serve(listener, state, config.dev_mode, shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: Arc<AppState>,
    dev_mode: bool,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, dev_mode, "review API listening");
    println!("Review API running at http://{}", local_addr);

    axum::serve(listener, build_router(state, dev_mode))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    info!("review API shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler; stop the process to shut down");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
