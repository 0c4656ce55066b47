// crates/core/src/context.rs
//! Process-wide owner of the job registry and the notification bus.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::NoticeConfig;
use crate::jobs::{JobHandle, Registry};
use crate::notice::{Bus, Noticer, NoticerConfig};

/// Built once at startup and shared (usually behind the server's `AppState`).
#[derive(Debug)]
pub struct CoordinationContext {
    registry: Registry,
    bus: Arc<Bus>,
    root: CancellationToken,
}

impl CoordinationContext {
    pub fn new(config: NoticeConfig) -> Self {
        Self {
            registry: Registry::new(),
            bus: Arc::new(Bus::new(config)),
            root: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    /// Parent of every job and noticer token.
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    /// Fresh job handle whose token is a child of the root token.
    pub fn job_handle(&self) -> JobHandle {
        JobHandle::new(&self.root)
    }

    pub fn noticer(&self, config: NoticerConfig) -> Noticer {
        Noticer::new(&self.bus, &self.root, config)
    }

    /// Cancel all work and disconnect every client.
    pub fn shutdown(&self) {
        self.root.cancel();
        let cancelled = self.registry.cancel_all();
        self.bus.close();
        tracing::info!(cancelled, "Coordination context shut down");
    }
}

impl Default for CoordinationContext {
    fn default() -> Self {
        Self::new(NoticeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_handles_follow_root() {
        let ctx = CoordinationContext::default();
        let handle = ctx.job_handle();
        ctx.registry().register("dbExport", "a", handle.clone()).unwrap();

        ctx.shutdown();
        assert!(handle.is_cancelled());
        assert!(ctx.registry().list_all().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_closes_clients() {
        let ctx = CoordinationContext::default();
        let client = ctx.bus().open_client("alice");
        let noticer = ctx.noticer(NoticerConfig::new("alice", "export"));

        ctx.shutdown();
        assert!(client.recv().await.is_none());
        assert!(noticer.is_exited());
        assert!(ctx.bus().online_users().is_empty());
    }
}
