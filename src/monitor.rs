//! Connectivity monitor: single source of truth for "are we online".
//!
//! State machine {Offline, Online, Syncing}. Constructed once per process
//! and shared by `Arc` — consumers get it injected instead of reading an
//! ambient global. Publishes `{online, syncing, pending}` to all subscribers
//! on every transition so banner/badge UI stays event-driven.
//!
//! Single-flight: at most one drain runs at a time. A sync request while one
//! is in flight is dropped, not queued. Going offline never aborts an
//! in-flight drain; it only prevents new ones from starting.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Published on every state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub online: bool,
    pub syncing: bool,
    /// Count of status=pending mutations at publish time.
    pub pending: u64,
}

pub struct ConnectivityMonitor {
    online: AtomicBool,
    syncing: AtomicBool,
    status_tx: broadcast::Sender<ConnectionStatus>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (status_tx, _) = broadcast::channel(16);
        ConnectivityMonitor {
            online: AtomicBool::new(initially_online),
            syncing: AtomicBool::new(false),
            status_tx,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Ingest the platform's connectivity signal. Publishes the new status;
    /// the caller decides whether a reconnect triggers a drain.
    pub fn set_online(&self, online: bool, pending: u64) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(online, pending, "Connectivity changed");
        }
        self.publish(pending);
    }

    /// Try to enter the Syncing state. Returns false (and the request is
    /// dropped) when offline or when a drain is already in flight.
    pub fn try_begin_sync(&self, pending: u64) -> bool {
        if !self.is_online() {
            debug!("Sync request ignored: offline");
            return false;
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync request ignored: drain already in flight");
            return false;
        }
        self.publish(pending);
        true
    }

    /// Leave the Syncing state after a drain (success or partial failure)
    /// and republish with the recomputed pending count.
    pub fn finish_sync(&self, pending: u64) {
        self.syncing.store(false, Ordering::SeqCst);
        self.publish(pending);
    }

    pub fn status(&self, pending: u64) -> ConnectionStatus {
        ConnectionStatus {
            online: self.is_online(),
            syncing: self.is_syncing(),
            pending,
        }
    }

    fn publish(&self, pending: u64) {
        let _ = self.status_tx.send(self.status(pending));
    }
}

// ===========================================================================
// Tests
// ===========================================================================
