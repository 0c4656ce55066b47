// crates/server/src/state.rs
//! Application state for the Axum server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use toolbox_core::{CoordinationContext, NoticeConfig};

use crate::routes::notice::AttachedStreams;

/// Settings the binary resolves from its command line and environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub notice: NoticeConfig,
    /// Transfers may only read and write below this directory.
    pub transfer_root: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            notice: NoticeConfig::default(),
            transfer_root: std::env::temp_dir().join("toolbox-transfers"),
        }
    }
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Job registry and notification bus.
    pub context: Arc<CoordinationContext>,
    pub transfer_root: PathBuf,
    /// SSE streams per notice client.
    pub streams: AttachedStreams,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(config: AppConfig) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            context: Arc::new(CoordinationContext::new(config.notice)),
            transfer_root: config.transfer_root,
            streams: AttachedStreams::default(),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
