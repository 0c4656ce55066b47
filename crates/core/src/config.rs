// crates/core/src/config.rs
//! Tunables for the notification bus and noticers.

use std::time::Duration;

/// Configuration for a [`Bus`](crate::notice::Bus) and the noticers built on it.
#[derive(Debug, Clone)]
pub struct NoticeConfig {
    /// Messages a conduit holds before `send` waits for the reader.
    /// Values below 1 are treated as 1.
    pub conduit_capacity: usize,
    /// Mirror messages for offline users to the log instead of only failing.
    pub console_fallback: bool,
    /// Exit-check timeout applied to noticers that do not set their own.
    pub default_timeout: Option<Duration>,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            conduit_capacity: 1,
            console_fallback: true,
            default_timeout: None,
        }
    }
}

impl NoticeConfig {
    pub(crate) fn capacity(&self) -> usize {
        self.conduit_capacity.max(1)
    }
}
