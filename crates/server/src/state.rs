//! Application state
//!
//! Shared across all handlers.

use dashmap::DashMap;
use std::sync::Arc;
use voice_chain_config::Settings;
use voice_chain_pipeline::{EngineFactory, TurnChain};

use crate::metrics::record_active_sessions;

/// Running chains by session id
#[derive(Default)]
pub struct SessionRegistry {
    chains: DashMap<String, Arc<TurnChain>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, chain: Arc<TurnChain>) {
        self.chains.insert(chain.session_id().to_string(), chain);
        record_active_sessions(self.chains.len());
    }

    pub fn remove(&self, session_id: &str) -> Option<Arc<TurnChain>> {
        let removed = self.chains.remove(session_id).map(|(_, chain)| chain);
        record_active_sessions(self.chains.len());
        removed
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<TurnChain>> {
        self.chains.get(session_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn count(&self) -> usize {
        self.chains.len()
    }

    pub fn ids(&self) -> Vec<String> {
        self.chains.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Stop every running chain and empty the registry
    pub async fn stop_all(&self) {
        let chains: Vec<Arc<TurnChain>> = self
            .chains
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.chains.clear();
        record_active_sessions(0);

        if !chains.is_empty() {
            tracing::info!(count = chains.len(), "Stopping all sessions");
        }
        futures::future::join_all(chains.iter().map(|chain| chain.stop())).await;
    }
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    /// Builds a fresh engine set per connection
    pub engines: Arc<dyn EngineFactory>,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Settings, engines: Arc<dyn EngineFactory>) -> Self {
        Self {
            config: Arc::new(config),
            engines,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}
