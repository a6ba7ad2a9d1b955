//! The registry-v2 facade: a read-only registry whose manifests are produced
//! on demand by a [`Strategy`](crate::strategy::Strategy).

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use anyhow::{Context, Result};
use log::info;
use tokio::net::TcpListener;

use crate::serve::state::AppState;
use crate::strategy::Strategy;

pub use routes::build_router;

pub async fn run_server<S: Strategy>(
    state: AppState<S>,
    host: &str,
    port: u16,
    serve_local_blobs: bool,
) -> Result<()> {
    let strategy = state.strategy_name();
    let router = routes::build_router(state, serve_local_blobs);
    let addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("kontain {strategy} registry listening on {addr}");
    if serve_local_blobs {
        info!("  Serving stored objects at http://{addr}/blobs/{{key}}");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to install Ctrl+C handler: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                log::warn!("Failed to install SIGTERM handler: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down...");
}
