//! # Application State Management
//!
//! Shared state that needs to be accessed by multiple request handlers and
//! background tasks simultaneously.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many handlers can hold a reference)
//! - **RwLock**: Multiple readers OR one writer at a time
//! - **T**: The actual data type being protected

use crate::config::AppConfig;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,

    /// Streaming metrics (constantly being updated by live sessions)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started (never changes, so no lock needed)
    pub start_time: Instant,
}

/// Streaming metrics collected across all sessions.
///
/// ## Why these metrics matter:
/// - **connections_total**: lifetime WebSocket connections (load monitoring)
/// - **frames_received**: audio frames pushed through session channels
/// - **decode_failures**: base64 payloads that could not be decoded
/// - **transcripts_dispatched**: partial + final results written to clients
/// - **dispatch_dropped**: events for sessions whose connection was gone
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub connections_total: u64,
    pub frames_received: u64,
    pub decode_failures: u64,
    pub transcripts_dispatched: u64,
    pub dispatch_dropped: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration.
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Server uptime in whole seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Run a closure against the metrics with the write lock held.
    ///
    /// Keeps the locking discipline in one place so callers can't forget
    /// to release the guard across an await point.
    pub fn update_metrics<F>(&self, f: F)
    where
        F: FnOnce(&mut AppMetrics),
    {
        let mut metrics = self.metrics.write().unwrap();
        f(&mut metrics);
    }
}
