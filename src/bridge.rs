//! # Bridge Facade Module
//!
//! The surface callers integrate against.
//!
//! This module handles:
//! - Non-blocking snapshot reads of the device state
//! - Validated command transmission
//! - Timed output actions with automatic release
//!
//! Everything here delegates to the link, store and scheduler; the facade
//! exists so embedding code touches one handle instead of four.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::actions::ActionScheduler;
use crate::error::{EncodeError, Result, TransportError};
use crate::link::LinkManager;
use crate::state::{DeviceSnapshot, StateStore};
use crate::wire::protocol::{Command, FrameSchema, PULSE_MAX_MS, PULSE_MIN_MS};

/// Rig Bridge
///
/// Cheap to clone pieces behind `Arc`s; construct once in `main` and hand
/// out clones wherever commands originate.
#[derive(Clone)]
pub struct RigBridge {
    schema: Arc<FrameSchema>,
    store: Arc<StateStore>,
    link: Arc<LinkManager>,
    scheduler: Arc<ActionScheduler>,
}

impl std::fmt::Debug for RigBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RigBridge").finish_non_exhaustive()
    }
}

impl RigBridge {
    pub fn new(
        schema: Arc<FrameSchema>,
        store: Arc<StateStore>,
        link: Arc<LinkManager>,
        scheduler: Arc<ActionScheduler>,
    ) -> Self {
        Self {
            schema,
            store,
            link,
            scheduler,
        }
    }

    /// Current device state: latest record, history, link state, counters.
    ///
    /// Never blocks on the serial link; readers see a coherent copy no
    /// matter what the read loop is doing.
    pub fn read_snapshot(&self) -> DeviceSnapshot {
        self.store.read()
    }

    /// Validate and transmit one command.
    ///
    /// # Errors
    ///
    /// Invalid commands are rejected before any bytes go out; transport
    /// failures surface as [`TransportError`] values.
    pub async fn send_command(&self, command: &Command) -> Result<()> {
        self.link.send(command).await
    }

    /// Assert `channel` now and release it after `duration`.
    ///
    /// Re-triggering while a release is pending restarts the timer, so
    /// rapid triggers hold the output active rather than chopping it.
    /// Transmission failures after scheduling are logged, not returned;
    /// the read loop's reconnect handling owns the link by then.
    ///
    /// # Errors
    ///
    /// Rejects unknown channels, out-of-range durations and a link with
    /// no open transport before scheduling anything.
    pub async fn trigger_action(&self, channel: &str, duration: Duration) -> Result<()> {
        if self.schema.channel(channel).is_none() {
            return Err(EncodeError::UnknownChannel(channel.to_string()).into());
        }

        let duration_ms = duration.as_millis() as u64;
        if !(PULSE_MIN_MS..=PULSE_MAX_MS).contains(&duration_ms) {
            return Err(EncodeError::DurationOutOfRange {
                duration_ms,
                min: PULSE_MIN_MS,
                max: PULSE_MAX_MS,
            }
            .into());
        }

        if !self.link.is_connected().await {
            return Err(TransportError::NotConnected.into());
        }

        let assert = send_logged(
            self.link.clone(),
            Command::SetOutput {
                channel: channel.to_string(),
                active: true,
            },
        );
        let release = send_logged(
            self.link.clone(),
            Command::SetOutput {
                channel: channel.to_string(),
                active: false,
            },
        );

        self.scheduler
            .trigger(channel, duration, assert, release)
            .await;
        Ok(())
    }

    /// Whether an action release is still pending for `channel`.
    pub async fn action_pending(&self, channel: &str) -> bool {
        self.scheduler.is_pending(channel).await
    }
}

/// Send from a scheduled context, where there is no caller to return to.
async fn send_logged(link: Arc<LinkManager>, command: Command) {
    if let Err(e) = link.send(&command).await {
        warn!("Scheduled command {:?} not sent: {}", command, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RigBridgeError;
    use crate::link::transport::mocks::MockTransportFactory;
    use crate::link::LinkPolicy;
    use crate::logger::TelemetryLogger;
    use crate::wire::protocol::{ChannelSpec, DeviceMode};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    struct Harness {
        bridge: RigBridge,
        link: Arc<LinkManager>,
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

    fn build_harness(factory: Arc<MockTransportFactory>) -> Harness {
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
            schema.clone(),
            store.clone(),
            logger,
            policy,
        ));
        let scheduler = Arc::new(ActionScheduler::new());
        let task = tokio::spawn(link.clone().run());
        let bridge = RigBridge::new(schema, store.clone(), link.clone(), scheduler);
        Harness {
            bridge,
            link,
            store,
            task,
            _logs: logs,
        }
    }

    async fn connected_harness() -> (Harness, DuplexStream) {
        let factory = Arc::new(MockTransportFactory::new());
        let (near, far) = tokio::io::duplex(256);
        factory.push_endpoint(near);
        let h = build_harness(factory);
        assert!(wait_until(Duration::from_secs(2), || h.store.read().stats.connects == 1).await);
        (h, far)
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
    async fn test_snapshot_reflects_received_frames() {
        let (h, mut far) = connected_harness().await;

        far.write_all(b"1200,90,1,0\n").await.unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                h.bridge.read_snapshot().latest.is_some()
            })
            .await
        );

        let snapshot = h.bridge.read_snapshot();
        assert_eq!(snapshot.latest.unwrap().angle, 90);
        assert_eq!(snapshot.history.len(), 1);

        h.link.stop();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_command_reaches_the_wire() {
        let (h, mut far) = connected_harness().await;

        h.bridge
            .send_command(&Command::SetMode(DeviceMode::Manual))
            .await
            .unwrap();

        let mut buf = [0u8; 3];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"MM\n");

        h.link.stop();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_action_asserts_then_releases() {
        let (h, mut far) = connected_harness().await;

        h.bridge
            .trigger_action("buzzer", Duration::from_millis(80))
            .await
            .unwrap();

        let mut buf = [0u8; 3];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"B1\n");

        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"B0\n");
        assert!(!h.bridge.action_pending("buzzer").await);

        h.link.stop();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_action_rejects_unknown_channel() {
        let (h, _far) = connected_harness().await;

        let err = h
            .bridge
            .trigger_action("led", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RigBridgeError::Encode(EncodeError::UnknownChannel(_))
        ));

        h.link.stop();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_action_rejects_zero_duration() {
        let (h, _far) = connected_harness().await;

        let err = h
            .bridge
            .trigger_action("buzzer", Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RigBridgeError::Encode(EncodeError::DurationOutOfRange { .. })
        ));

        h.link.stop();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_trigger_action_requires_a_connection() {
        let factory = Arc::new(MockTransportFactory::new());
        let h = build_harness(factory);

        let err = h
            .bridge
            .trigger_action("buzzer", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RigBridgeError::Transport(TransportError::NotConnected)
        ));

        h.link.stop();
        h.task.await.unwrap();
    }
}
