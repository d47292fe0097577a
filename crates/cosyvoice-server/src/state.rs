//! Application state management

use cosyvoice_core::ServerConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    served: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            served: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count a synthesis request, returning its sequence number
    pub fn next_request(&self) -> u64 {
        self.served.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn requests_served(&self) -> u64 {
        self.served.load(Ordering::Relaxed)
    }
}
