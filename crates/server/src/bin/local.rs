//! Talk to the chain through the local microphone and speaker

use std::sync::Arc;

use voice_chain_config::{load_settings, Settings};
use voice_chain_pipeline::{ChainConfig, TurnChain};
use voice_chain_server::{init_tracing, HttpEngineFactory};
use voice_chain_transport::LocalClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("VOICE_CHAIN_ENV").ok();
    let config = load_settings(env.as_deref()).unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });
    let _log_guard = init_tracing(&config.observability);

    let client = Arc::new(LocalClient::new(config.local.clone(), config.tts.sample_rate));
    let engines = HttpEngineFactory::from_settings(&config);
    let chain = TurnChain::new(
        "local",
        ChainConfig::from(&config.chain),
        client,
        &engines,
    )?;

    chain.start().await?;
    tracing::info!("Local session started, Ctrl+C to quit");

    tokio::select! {
        _ = chain.wait() => {
            tracing::info!("Local session ended");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C");
            chain.stop().await;
        }
    }

    // A stdin read for the Enter trigger may still be blocking the runtime
    std::process::exit(0)
}
