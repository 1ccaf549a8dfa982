//! tether gateway binary.
//!
//! - Config: `tether.yaml` (or the path given as the first argument)
//! - WebSocket endpoint at `gateway.path`, ops endpoints alongside
//! - Optional upstream bridge towards the producer
//! - Graceful shutdown on Ctrl-C / SIGTERM: drain, close peers (1001), stop bridge

use std::net::SocketAddr;
use std::process::ExitCode;

use tracing_subscriber::{fmt, EnvFilter};

use tether_core::error::{Result, TetherError};
use tether_core::protocol::control::CLOSE_GOING_AWAY;
use tether_gateway::{config, router, AppState, UpstreamBridge};

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "tether-gateway failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let cfg = config::load_from_file(&path)?;
    let listen: SocketAddr = cfg
        .gateway
        .listen
        .parse()
        .map_err(|e| TetherError::Config(format!("gateway.listen: {e}")))?;

    let state = AppState::new(cfg)?;
    let bridge = match state.cfg().upstream.clone() {
        Some(up) => {
            tracing::info!(url = %up.url, "starting upstream bridge");
            Some(UpstreamBridge::start(up, state.registry())?)
        }
        None => None,
    };

    let app = router::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| TetherError::Transport(format!("bind {listen} failed: {e}")))?;
    tracing::info!(%listen, path = %state.cfg().gateway.path, config = %path, "tether-gateway starting");

    let drain = state.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            drain.set_draining();
            let closed = drain.registry().close_all(CLOSE_GOING_AWAY, "gateway shutdown");
            tracing::info!(peers = closed, "draining");
        })
        .await
        .map_err(|e| TetherError::Transport(format!("server failed: {e}")))?;

    if let Some(bridge) = bridge {
        bridge.shutdown().await;
    }
    tracing::info!("tether-gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
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
    tracing::info!("signal received, starting graceful shutdown");
}
