//! # Link Manager Module
//!
//! Owns the serial connection and its lifecycle.
//!
//! This module handles:
//! - Connecting through a [`TransportFactory`] and reconnecting on loss
//! - Draining the byte stream into delimiter-framed telemetry lines
//! - Applying accepted records to the state store and telemetry log
//! - Counting and skipping malformed frames without stopping the loop
//! - Treating read silence, EOF and I/O errors as link loss
//! - Writing encoded commands over the shared write half
//!
//! One line never takes the loop down: a frame either becomes a record or
//! becomes a counter increment.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::logger::TelemetryLogger;
use crate::state::{ConnectionState, StateStore};
use crate::wire::encoder::encode_command;
use crate::wire::parser::parse_line;
use crate::wire::protocol::{Command, FrameSchema};

pub mod transport;

use transport::{TransportFactory, TransportStream};

/// Longest unterminated input run tolerated before the buffer is discarded.
///
/// Telemetry lines are tens of bytes; anything beyond this is a wedged or
/// misconfigured device flooding the port.
pub const MAX_LINE_LEN: usize = 1024;

/// Reconnect and framing policy for the device link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPolicy {
    /// Silence window on the read side treated as link loss
    pub read_timeout: Duration,
    /// Pause between connection attempts
    pub reconnect_delay: Duration,
    /// Consecutive failed connects before the link reports itself faulted
    pub fault_threshold: u32,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(2),
            fault_threshold: 5,
        }
    }
}

/// Why the read loop handed control back to the reconnect loop
enum ReadOutcome {
    /// Stop was requested; the write half stays open for shutdown commands
    Stopped,
    /// The transport failed; reconnect after the configured pause
    LinkLost(TransportError),
}

/// Link Manager
///
/// Drives the reconnect state machine and the framed read loop, and owns
/// the write half used by [`LinkManager::send`]. Cheap to share: wrap it in
/// an `Arc`, spawn [`LinkManager::run`], and call `send`/`stop` from
/// anywhere.
pub struct LinkManager {
    factory: Arc<dyn TransportFactory>,
    schema: Arc<FrameSchema>,
    store: Arc<StateStore>,
    logger: Arc<TelemetryLogger>,
    policy: LinkPolicy,
    /// Write half of the current transport, `None` while disconnected
    writer: Mutex<Option<WriteHalf<TransportStream>>>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl std::fmt::Debug for LinkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkManager")
            .field("target", &self.factory.describe())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LinkManager {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        schema: Arc<FrameSchema>,
        store: Arc<StateStore>,
        logger: Arc<TelemetryLogger>,
        policy: LinkPolicy,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            factory,
            schema,
            store,
            logger,
            policy,
            writer: Mutex::new(None),
            stop_tx,
            stop_rx,
        }
    }

    /// Run the link until [`LinkManager::stop`] is called.
    ///
    /// Connect failures and link drops are absorbed: the loop waits out the
    /// reconnect pause and tries again, marking the link faulted after the
    /// configured streak of failed connects. The task only exits on stop.
    pub async fn run(self: Arc<Self>) {
        let mut stop_rx = self.stop_rx.clone();
        let mut failures: u32 = 0;

        loop {
            if *stop_rx.borrow() {
                break;
            }

            self.store.set_connection_state(ConnectionState::Connecting);
            info!("Connecting to {}", self.factory.describe());

            match self.factory.connect().await {
                Ok(stream) => {
                    failures = 0;
                    self.store.record_connect();
                    self.store.set_connection_state(ConnectionState::Connected);
                    info!("Link established to {}", self.factory.describe());

                    let (read_half, write_half) = tokio::io::split(stream);
                    *self.writer.lock().await = Some(write_half);

                    match self.read_loop(read_half, &mut stop_rx).await {
                        ReadOutcome::Stopped => {
                            // Writer stays open so shutdown can quiesce outputs
                            break;
                        }
                        ReadOutcome::LinkLost(e) => {
                            warn!("Link lost: {}", e);
                            self.writer.lock().await.take();
                            self.store.record_disconnect();
                            self.store.set_connection_state(ConnectionState::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!("Connect attempt failed ({} in a row): {}", failures, e);

                    if failures == self.policy.fault_threshold {
                        error!(
                            "Link faulted after {} consecutive failed connects, still retrying",
                            failures
                        );
                    }
                    if failures >= self.policy.fault_threshold {
                        self.store.set_connection_state(ConnectionState::Faulted);
                    } else {
                        self.store.set_connection_state(ConnectionState::Disconnected);
                    }
                }
            }

            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.policy.reconnect_delay) => {}
            }
        }

        debug!("Link manager task exiting");
    }

    /// Read frames until stop, link loss or the silence window elapses.
    async fn read_loop(
        &self,
        mut reader: ReadHalf<TransportStream>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> ReadOutcome {
        let mut buf = BytesMut::with_capacity(4 * MAX_LINE_LEN);

        loop {
            tokio::select! {
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        return ReadOutcome::Stopped;
                    }
                }
                result = timeout(self.policy.read_timeout, reader.read_buf(&mut buf)) => {
                    match result {
                        Err(_) => {
                            return ReadOutcome::LinkLost(TransportError::IdleTimeout(
                                self.policy.read_timeout.as_millis() as u64,
                            ));
                        }
                        Ok(Err(e)) => return ReadOutcome::LinkLost(TransportError::Read(e)),
                        Ok(Ok(0)) => return ReadOutcome::LinkLost(TransportError::Eof),
                        Ok(Ok(_)) => self.drain_lines(&mut buf),
                    }
                }
            }
        }
    }

    /// Split the accumulation buffer on newlines and process each line.
    ///
    /// Bytes after the last newline stay buffered for the next read, so
    /// frames split across reads reassemble. An unterminated run past
    /// [`MAX_LINE_LEN`] is discarded wholesale.
    fn drain_lines(&self, buf: &mut BytesMut) {
        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line_bytes = buf.split_to(pos + 1);
            let line = String::from_utf8_lossy(&line_bytes[..pos]);
            self.handle_line(&line);
        }

        if buf.len() > MAX_LINE_LEN {
            warn!("Discarding {} bytes of unterminated input", buf.len());
            self.store.record_parse_error();
            buf.clear();
        }
    }

    /// Classify one complete line: telemetry frame, command echo or noise.
    fn handle_line(&self, line: &str) {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return;
        }

        // Delimiter-free lines are the device echoing commands back
        if !line.contains(self.schema.delimiter()) {
            if line.chars().all(|c| c.is_ascii_digit()) {
                debug!("Device echo: {}", line);
            } else {
                info!("Device message: {}", line);
            }
            self.store.record_echo();
            return;
        }

        match parse_line(&self.schema, line) {
            Ok(record) => {
                if let Err(e) = self.logger.append(&record) {
                    warn!("Telemetry row not persisted: {}", e);
                }
                self.store.apply(record);
            }
            Err(e) => {
                self.store.record_parse_error();
                debug!("Dropped frame: {}", e);
            }
        }
    }

    /// Encode and write one command to the device.
    ///
    /// # Errors
    ///
    /// Rejects invalid commands before any bytes are written, and returns
    /// [`TransportError::NotConnected`] while no transport is open. Write
    /// failures surface here; the read loop notices the dead link and
    /// reconnects on its own.
    pub async fn send(&self, command: &Command) -> Result<()> {
        let bytes = encode_command(&self.schema, command)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;

        writer
            .write_all(&bytes)
            .await
            .map_err(TransportError::Write)?;
        writer.flush().await.map_err(TransportError::Write)?;

        debug!("Sent command {:?} ({} bytes)", command, bytes.len());
        Ok(())
    }

    /// Ask the run task to exit. The write half survives for shutdown use.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Whether a transport is currently open for writing.
    pub async fn is_connected(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Drop the write half and mark the link disconnected.
    ///
    /// Final step of shutdown, after quiesce commands have gone out.
    pub async fn disconnect(&self) {
        self.writer.lock().await.take();
        self.store.set_connection_state(ConnectionState::Disconnected);
    }
}
