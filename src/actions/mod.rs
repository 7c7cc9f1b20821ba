//! # Action Scheduler Module
//!
//! Timed output pulses with last-writer-wins semantics.
//!
//! This module handles:
//! - Asserting an output now and releasing it after a fixed duration
//! - Superseding the pending release when the same channel re-triggers,
//!   so the release timer restarts instead of firing early
//! - Cancelling every pending release at shutdown
//!
//! Assert and release actions for one channel run under the scheduler
//! lock, so a stale release can never land after a fresh assert.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

struct PendingAction {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Action Scheduler
///
/// Tracks at most one pending release per channel. Share it behind an
/// `Arc`; release tasks keep the pending table alive on their own.
pub struct ActionScheduler {
    pending: Arc<Mutex<HashMap<String, PendingAction>>>,
    generation: AtomicU64,
}

impl Default for ActionScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionScheduler").finish_non_exhaustive()
    }
}

impl ActionScheduler {
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Run `assert` now and schedule `release` for `duration` later.
    ///
    /// Re-triggering a channel whose release is still pending aborts the
    /// old timer and starts a fresh one, so the output stays asserted for
    /// a full `duration` from the latest trigger. The release only fires
    /// if its trigger is still the newest one for the channel.
    pub async fn trigger<A, R>(&self, channel: &str, duration: Duration, assert: A, release: R)
    where
        A: Future<Output = ()> + Send + 'static,
        R: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut pending = self.pending.lock().await;

        if let Some(previous) = pending.remove(channel) {
            previous.handle.abort();
            debug!("Superseded pending release on {}", channel);
        }

        // Lock held across the assert: serializes against releases
        assert.await;

        let table = self.pending.clone();
        let name = channel.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;

            let mut pending = table.lock().await;
            let current = matches!(pending.get(&name), Some(p) if p.generation == generation);
            if current {
                pending.remove(&name);
                debug!("Releasing {} after {} ms", name, duration.as_millis());
                release.await;
            }
        });

        pending.insert(channel.to_string(), PendingAction { generation, handle });
    }

    /// Abort every pending release without running it.
    ///
    /// Returns how many were cancelled. Used at shutdown, where the
    /// all-off quiesce supersedes per-channel releases.
    pub async fn cancel_all(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        for (name, action) in pending.drain() {
            action.handle.abort();
            debug!("Cancelled pending release on {}", name);
        }
        count
    }

    /// Whether a release is pending for `channel`.
    pub async fn is_pending(&self, channel: &str) -> bool {
        self.pending.lock().await.contains_key(channel)
    }

    /// Number of channels with a pending release.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
