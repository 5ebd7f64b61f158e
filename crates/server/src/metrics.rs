//! Prometheus metrics
//!
//! The pipeline records its own counters and histograms through the `metrics`
//! facade; this module installs the recorder and serves `/metrics`.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_histogram, gauge, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

use crate::state::AppState;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder. Call once at startup.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_default_metrics();
    METRICS_HANDLE.get_or_init(|| handle.clone());
    Ok(handle)
}

pub fn get_metrics_handle() -> Option<&'static PrometheusHandle> {
    METRICS_HANDLE.get()
}

fn register_default_metrics() {
    gauge!("voice_chain_sessions_active").set(0.0);
    counter!("voice_chain_sessions_total").absolute(0);
    counter!("voice_chain_turns_total").absolute(0);
    counter!("voice_chain_audio_discarded_total").absolute(0);

    for queue in ["text", "audio"] {
        counter!("voice_chain_queue_dropped_total", "queue" => queue).absolute(0);
    }
    for loop_name in ["intake", "collect", "dispatch", "relay"] {
        counter!("voice_chain_loop_failures_total", "loop" => loop_name).absolute(0);
    }

    // Described only; no startup sample
    describe_histogram!(
        "voice_chain_turn_latency_seconds",
        Unit::Seconds,
        "Query dispatch to turn done"
    );
    describe_histogram!(
        "voice_chain_llm_first_chunk_seconds",
        Unit::Seconds,
        "Query dispatch to first LLM chunk"
    );
}

pub fn record_session_started() {
    counter!("voice_chain_sessions_total").increment(1);
}

pub fn record_active_sessions(count: usize) {
    gauge!("voice_chain_sessions_active").set(count as f64);
}

/// Prometheus text exposition
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    record_active_sessions(state.sessions.count());

    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "Metrics not initialized".to_string(),
        ),
    }
}
