use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use api_key_proxy::config::Config;
use api_key_proxy::rate_limit::spawn_sweeper;
use api_key_proxy::router;
use api_key_proxy::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let config = Config::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    config.validate()?;

    let state = Arc::new(AppState::from_config(&config)?);
    if !state.upstream.is_configured() {
        tracing::warn!("UPSTREAM_API_KEY is not set, /api/generate will answer 503");
    }

    // expired windows are reclaimed once per window
    let sweeper = spawn_sweeper(state.rate_limiter.clone(), config.rate_window());

    let app = router(state);

    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %listener.local_addr()?,
        upstream = %config.upstream_url,
        rate_limit = config.rate_limit,
        rate_window_secs = config.rate_window,
        "api key proxy ready",
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.shutdown().await;
    tracing::info!("api key proxy stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
