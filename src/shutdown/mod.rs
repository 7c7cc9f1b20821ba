//! # Shutdown Coordinator Module
//!
//! Ordered teardown of the running bridge.
//!
//! This module handles:
//! - Stopping the link task and waiting it out, bounded by a grace window
//! - Cancelling pending action releases before they can race the quiesce
//! - Driving every output inactive with a final all-off command
//! - Closing the transport and the telemetry log last
//!
//! Each step is best-effort: a failure is logged and the remaining steps
//! still run, so a dead device cannot wedge process exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::actions::ActionScheduler;
use crate::link::LinkManager;
use crate::logger::TelemetryLogger;
use crate::wire::protocol::Command;

/// How long to wait for the link task before abandoning it
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

/// Shutdown Coordinator
///
/// Consumes the link task handle and runs the teardown sequence exactly
/// once. The ordering matters: the read loop must be stopped before the
/// quiesce command goes out, and the write half stays open until after it.
pub struct ShutdownCoordinator {
    link: Arc<LinkManager>,
    scheduler: Arc<ActionScheduler>,
    logger: Arc<TelemetryLogger>,
    link_task: JoinHandle<()>,
    grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        link: Arc<LinkManager>,
        scheduler: Arc<ActionScheduler>,
        logger: Arc<TelemetryLogger>,
        link_task: JoinHandle<()>,
        grace: Duration,
    ) -> Self {
        Self {
            link,
            scheduler,
            logger,
            link_task,
            grace,
        }
    }

    /// Run the teardown sequence to completion.
    pub async fn run(self) {
        info!("Shutdown started");

        self.link.stop();
        let mut link_task = self.link_task;
        match timeout(self.grace, &mut link_task).await {
            Ok(Ok(())) => debug!("Link task stopped"),
            Ok(Err(e)) => warn!("Link task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Link task did not stop within {} ms, aborting it",
                    self.grace.as_millis()
                );
                link_task.abort();
            }
        }

        let cancelled = self.scheduler.cancel_all().await;
        if cancelled > 0 {
            info!("Cancelled {} pending action release(s)", cancelled);
        }

        match self.link.send(&Command::AllOff).await {
            Ok(()) => info!("Outputs quiesced"),
            Err(e) => warn!("Could not quiesce outputs: {}", e),
        }

        self.link.disconnect().await;

        if let Err(e) = self.logger.close() {
            warn!("Telemetry log close failed: {}", e);
        }

        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::transport::mocks::MockTransportFactory;
    use crate::link::LinkPolicy;
    use crate::state::{ConnectionState, StateStore};
    use crate::wire::protocol::{ChannelSpec, FrameSchema};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    struct Harness {
        link: Arc<LinkManager>,
        scheduler: Arc<ActionScheduler>,
        logger: Arc<TelemetryLogger>,
        store: Arc<StateStore>,
        task: JoinHandle<()>,
        _logs: TempDir,
    }

    fn lab_schema() -> Arc<FrameSchema> {
        Arc::new(FrameSchema::new(
            ',',
            vec![
                ChannelSpec::new("buzzer", 'B', 1),
                ChannelSpec::new("fan", 'F', 1),
            ],
        ))
    }

    async fn running_harness(factory: Arc<MockTransportFactory>) -> Harness {
        let schema = lab_schema();
        let store = Arc::new(StateStore::new(8));
        let logs = TempDir::new().unwrap();
        let logger = Arc::new(TelemetryLogger::create_in_dir(logs.path(), &schema).unwrap());
        let policy = LinkPolicy {
            read_timeout: Duration::from_millis(500),
            reconnect_delay: Duration::from_millis(30),
            fault_threshold: 3,
        };
        let link = Arc::new(LinkManager::new(
            factory,
            schema,
            store.clone(),
            logger.clone(),
            policy,
        ));
        let task = tokio::spawn(link.clone().run());
        Harness {
            link,
            scheduler: Arc::new(ActionScheduler::new()),
            logger,
            store,
            task,
            _logs: logs,
        }
    }

    async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if cond() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_quiesces_outputs_and_closes_log() {
        let factory = Arc::new(MockTransportFactory::new());
        let (near, mut far) = tokio::io::duplex(256);
        factory.push_endpoint(near);

        let h = running_harness(factory).await;
        assert!(wait_until(Duration::from_secs(2), || h.store.read().stats.connects == 1).await);

        let coordinator = ShutdownCoordinator::new(
            h.link.clone(),
            h.scheduler.clone(),
            h.logger.clone(),
            h.task,
            Duration::from_secs(1),
        );
        coordinator.run().await;

        let mut buf = [0u8; 3];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"XX\n");

        assert!(h.logger.is_closed());
        assert!(!h.link.is_connected().await);
        assert_eq!(h.store.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_release() {
        let factory = Arc::new(MockTransportFactory::new());
        let (near, _far) = tokio::io::duplex(256);
        factory.push_endpoint(near);

        let h = running_harness(factory).await;
        assert!(wait_until(Duration::from_secs(2), || h.store.read().stats.connects == 1).await);

        let released = Arc::new(AtomicUsize::new(0));
        let release = {
            let released = released.clone();
            async move {
                released.fetch_add(1, Ordering::SeqCst);
            }
        };
        h.scheduler
            .trigger("buzzer", Duration::from_millis(100), async {}, release)
            .await;

        let coordinator = ShutdownCoordinator::new(
            h.link.clone(),
            h.scheduler.clone(),
            h.logger.clone(),
            h.task,
            Duration::from_secs(1),
        );
        coordinator.run().await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert!(!h.scheduler.is_pending("buzzer").await);
    }

    #[tokio::test]
    async fn test_shutdown_completes_without_a_device() {
        let factory = Arc::new(MockTransportFactory::new());
        let h = running_harness(factory).await;

        let coordinator = ShutdownCoordinator::new(
            h.link.clone(),
            h.scheduler.clone(),
            h.logger.clone(),
            h.task,
            Duration::from_secs(1),
        );
        coordinator.run().await;

        // Quiesce had nowhere to go, but the log still closed cleanly
        assert!(h.logger.is_closed());
        assert!(!h.link.is_connected().await);
    }
}
