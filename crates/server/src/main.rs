//! Voice Chain Server entry point

use std::net::SocketAddr;
use std::sync::Arc;

use voice_chain_config::{load_settings, Settings};
use voice_chain_server::{create_router, init_metrics, init_tracing, AppState, HttpEngineFactory};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Priority: env vars > config/{env} > config/default > defaults
    let env = std::env::var("VOICE_CHAIN_ENV").ok();
    let config = match load_settings(env.as_deref()) {
        Ok(settings) => {
            // Tracing not yet initialized
            eprintln!(
                "Loaded configuration (env: {})",
                env.as_deref().unwrap_or("default")
            );
            settings
        }
        Err(e) => {
            eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
            Settings::default()
        }
    };

    let _log_guard = init_tracing(&config.observability);
    tracing::info!("Starting Voice Chain Server v{}", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match init_metrics() {
            Ok(_) => tracing::info!("Prometheus metrics at /metrics"),
            Err(e) => tracing::warn!(error = %e, "Metrics recorder not installed"),
        }
    }

    tracing::info!(
        stt = %config.stt.model,
        tts = %config.tts.model,
        llm = %config.llm.model,
        final_quiet_ms = config.chain.final_quiet_ms,
        hard_timeout_ms = config.chain.hard_timeout_ms,
        "Engines configured"
    );

    let engines = Arc::new(HttpEngineFactory::from_settings(&config));
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config, engines);
    let sessions = Arc::clone(&state.sessions);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            sessions.stop_all().await;
        })
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
