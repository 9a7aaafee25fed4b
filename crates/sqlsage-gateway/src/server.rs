use std::sync::Arc;

use sqlsage_common::Result;
use sqlsage_config::AppConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::bootstrap::build_app_state;
use crate::router::build_router;
use crate::state::{AppState, SharedState};

/// The main gateway server that binds to a port and serves the HTTP API.
pub struct GatewayServer {
    state: AppState,
}

impl GatewayServer {
    /// Build every collaborator from config.
    pub fn new(config: AppConfig) -> Self {
        Self {
            state: build_app_state(config),
        }
    }

    /// Serve a pre-built state, e.g. one wired with test doubles.
    pub fn with_state(state: AppState) -> Self {
        Self { state }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!(
            "{}:{}",
            self.state.config.gateway.host, self.state.config.gateway.port
        );
        let listener = TcpListener::bind(&addr).await?;
        info!("SqlSage gateway listening on {}", addr);
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves, then
    /// drain the target database pool.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let state: SharedState = Arc::new(self.state);
        let app = build_router(state.clone());

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| sqlsage_common::Error::Gateway(format!("server error: {e}")))?;

        if let Some(database) = &state.database {
            database.drain();
        }
        info!("gateway stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
