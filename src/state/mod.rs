//! # State Store Module
//!
//! Concurrency-safe holder of the latest device state.
//!
//! This module handles:
//! - The latest accepted telemetry record plus a bounded FIFO history
//! - The externally observable connection state
//! - Link counters (accepted frames, parse errors, echoes, reconnects)
//! - Torn-read-free snapshots for the presentation layer
//!
//! The store is the single synchronization point between the read-loop task
//! and every other thread; readers always see a complete, internally
//! consistent snapshot.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::wire::protocol::TelemetryRecord;

/// Observable lifecycle of the serial link.
///
/// Owned by the link manager; everyone else reads it through snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    /// No transport open, not currently trying
    #[default]
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Transport open, read loop running
    Connected,
    /// Repeated connect failures; retries continue but the link is degraded
    Faulted,
}

/// Monotonic counters describing link health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Telemetry lines accepted and applied
    pub frames_ok: u64,
    /// Telemetry lines rejected by the parser
    pub parse_errors: u64,
    /// Informational device echoes (no delimiter, not telemetry)
    pub echoes: u64,
    /// Successful transport opens
    pub connects: u64,
    /// Sessions that ended in an I/O failure
    pub disconnects: u64,
}

/// One internally consistent view of device state.
///
/// The only state the presentation layer may read; it never touches the
/// transport or the codec.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    /// Most recent accepted record, if any arrived yet
    pub latest: Option<TelemetryRecord>,
    /// Link state at snapshot time
    pub connection: ConnectionState,
    /// Recent records, oldest first; the tail equals `latest`
    pub history: Vec<TelemetryRecord>,
    /// Link counters at snapshot time
    pub stats: LinkStats,
}

#[derive(Debug)]
struct StoreInner {
    latest: Option<TelemetryRecord>,
    history: VecDeque<TelemetryRecord>,
    capacity: usize,
    connection: ConnectionState,
    stats: LinkStats,
}

/// Shared holder of the latest device state.
///
/// `apply` performs an atomic replace-and-append under one short write lock;
/// `read` clones a complete snapshot under a read lock. No lock is ever held
/// across I/O or `.await`.
#[derive(Debug)]
pub struct StateStore {
    inner: RwLock<StoreInner>,
}

impl StateStore {
    /// Create a store whose history keeps at most `history_capacity` records.
    ///
    /// A zero capacity is coerced to 1 so that the invariant "the latest
    /// record is always in the history tail" can hold.
    pub fn new(history_capacity: usize) -> Self {
        let capacity = history_capacity.max(1);
        Self {
            inner: RwLock::new(StoreInner {
                latest: None,
                history: VecDeque::with_capacity(capacity),
                capacity,
                connection: ConnectionState::Disconnected,
                stats: LinkStats::default(),
            }),
        }
    }

    // A poisoned lock means a reader or writer panicked; every update here is
    // a plain assignment, so the data is still coherent and we keep serving.
    fn read_inner(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically replace the latest record and append it to the history.
    ///
    /// Evicts the oldest history entry when the buffer is full. Readers
    /// observe either the state before or after the whole update, never a
    /// mix.
    pub fn apply(&self, record: TelemetryRecord) {
        let mut inner = self.write_inner();
        if inner.history.len() == inner.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(record.clone());
        inner.latest = Some(record);
        inner.stats.frames_ok += 1;
    }

    /// Clone out the current snapshot.
    ///
    /// Never blocks on anything but the short store lock; always returns the
    /// most recent fully-applied state.
    pub fn read(&self) -> DeviceSnapshot {
        let inner = self.read_inner();
        DeviceSnapshot {
            latest: inner.latest.clone(),
            connection: inner.connection,
            history: inner.history.iter().cloned().collect(),
            stats: inner.stats,
        }
    }

    /// Update the observable connection state, independent of telemetry.
    pub fn set_connection_state(&self, state: ConnectionState) {
        self.write_inner().connection = state;
    }

    /// Current connection state without cloning a full snapshot.
    pub fn connection_state(&self) -> ConnectionState {
        self.read_inner().connection
    }

    /// Count one rejected telemetry line.
    pub fn record_parse_error(&self) {
        self.write_inner().stats.parse_errors += 1;
    }

    /// Count one informational device echo.
    pub fn record_echo(&self) {
        self.write_inner().stats.echoes += 1;
    }

    /// Count one successful transport open.
    pub fn record_connect(&self) {
        self.write_inner().stats.connects += 1;
    }

    /// Count one session lost to an I/O failure.
    pub fn record_disconnect(&self) {
        self.write_inner().stats.disconnects += 1;
    }

    /// Configured history bound.
    pub fn history_capacity(&self) -> usize {
        self.read_inner().capacity
    }
}
