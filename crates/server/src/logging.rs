//! Tracing setup shared by the server and the local client

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use voice_chain_config::ObservabilityConfig;

/// Daily rolling log file name
pub const LOG_FILE_NAME: &str = "voice-chain.log";

/// Default filter when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("voice_chain={level},tower_http=info")
}

/// Install the global subscriber: console, plus a rolling file when
/// `log_dir` is set. Keep the returned guard alive to flush the file writer.
pub fn init_tracing(config: &ObservabilityConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(&config.log_level)));

    let console = if config.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    let (file, guard) = match config.log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();
    guard
}
