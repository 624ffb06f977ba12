//! Admin web server.
//!
//! A thin JSON layer over the scheduler, display, and network APIs. The
//! captive portal is a separate server scoped to the setup AP; this one
//! runs for the life of the process.

pub mod routes;

use axum::routing::{get, post, put};
use axum::Router;
use routes::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::apps::scheduler::AppScheduler;
use crate::display::DisplayHandle;
use crate::network::{NetworkCommand, NetworkState};

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),

    #[error("Server error: {0}")]
    ServerError(String),
}

pub struct WebServer {
    state: AppState,
}

impl WebServer {
    pub fn new(
        scheduler: Arc<AppScheduler>,
        display: DisplayHandle,
        network: NetworkState,
        network_tx: mpsc::Sender<NetworkCommand>,
    ) -> Self {
        Self {
            state: AppState {
                scheduler,
                display,
                network,
                network_tx,
            },
        }
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/api/apps", get(routes::list_apps))
            .route("/api/apps/next", post(routes::next_app))
            .route("/api/apps/previous", post(routes::previous_app))
            .route("/api/apps/:name/activate", post(routes::activate_app))
            .route("/api/apps/:name/config", put(routes::set_app_config))
            .route("/api/display/brightness", post(routes::set_brightness))
            .route("/api/display/status", get(routes::display_status))
            .route("/api/network/status", get(routes::network_status))
            .route("/api/network/scan", get(routes::network_scan))
            .route("/api/network/credentials", post(routes::submit_credentials))
            .route("/api/network/cancel", post(routes::cancel_setup))
            .route("/health", get(routes::health))
            .with_state(self.state.clone())
    }

    /// Run the web server with graceful shutdown
    pub async fn run_with_shutdown(
        &self,
        port: u16,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), WebError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Admin API listening on http://{}", addr);

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Admin API shutting down gracefully");
            })
            .await
            .map_err(|e| WebError::ServerError(e.to_string()))
    }
}
