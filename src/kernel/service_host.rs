//! Long-running service abstraction and its host.
//!
//! A [`Service`] owns one cooperative loop (a matcher worker, a sweeper) and
//! runs until its shutdown token fires. The [`ServiceHost`] spawns services,
//! fans one cancellation token out to all of them, and joins them on
//! shutdown so in-flight work drains before the process exits.

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Service: Send + 'static {
    fn name(&self) -> &'static str;

    /// Run until completion or until `shutdown` is cancelled.
    async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()>;
}

pub struct ServiceHost {
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
}

impl ServiceHost {
    pub fn new() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Token shared by every hosted service.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn `service` onto the runtime under the host's shutdown token.
    pub fn spawn<S: Service>(&mut self, service: S) {
        let token = self.shutdown.clone();
        let name = service.name();
        self.tasks.spawn(async move {
            if let Err(e) = Box::new(service).run(token).await {
                tracing::error!(service = name, error = %e, "service exited with error");
            }
        });
    }

    /// Cancel all services and wait for them to drain.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        while self.tasks.join_next().await.is_some() {}
        tracing::info!("all services stopped");
    }
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct TickService {
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Service for TickService {
        fn name(&self) -> &'static str {
            "tick"
        }

        async fn run(self: Box<Self>, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_services() {
        let stopped = Arc::new(AtomicBool::new(false));
        let mut host = ServiceHost::new();
        host.spawn(TickService {
            stopped: stopped.clone(),
        });

        host.shutdown().await;
        assert!(stopped.load(Ordering::SeqCst));
    }
}
