//! HTTP Server
//!
//! axum router over the scheduler, served on TCP with graceful shutdown.

use crate::handler;
use axum::routing::{get, post};
use axum::Router;
use quarry_core::application::{Scheduler, ShutdownToken};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 9528;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
}

/// HTTP Server Configuration
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.to_string(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Control API routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/repositories",
            post(handler::register_repository).get(handler::list_repositories),
        )
        .route(
            "/repositories/:id",
            get(handler::get_repository).delete(handler::unregister_repository),
        )
        .route("/repositories/:id/jobs", get(handler::list_repository_jobs))
        .route("/jobs", post(handler::schedule_job))
        .route("/jobs/:id", get(handler::get_job))
        .route("/jobs/:id/cancel", post(handler::cancel_job))
        .route("/jobs/:id/retry", post(handler::retry_job))
        .route("/stats", get(handler::stats))
        .route("/health", get(handler::health))
        .with_state(state)
}

/// HTTP Server
pub struct HttpServer {
    config: HttpServerConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, scheduler: Arc<Scheduler>) -> Self {
        Self {
            config,
            state: AppState { scheduler },
        }
    }

    /// Bind the listener; fails early if the port is taken
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        TcpListener::bind(addr).await
    }

    /// Serve until the shutdown token fires
    pub async fn serve(self, listener: TcpListener, mut shutdown: ShutdownToken) -> std::io::Result<()> {
        let local: Option<SocketAddr> = listener.local_addr().ok();
        info!(addr = ?local, "HTTP control API listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        info!("HTTP control API stopped");
        Ok(())
    }
}
