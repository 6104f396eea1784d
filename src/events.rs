//! Refresh/event fan-out for feature modules.
//!
//! Feature modules subscribe and re-query on signal instead of polling.
//! Refresh events carry no payload on purpose: they are pure "please
//! re-query" notifications, so a missed event costs one stale render, never
//! lost data.

use tokio::sync::broadcast;

/// Feature surfaces that can be asked to re-query after a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Inventory,
    Sales,
    Dashboard,
    Orders,
    Cash,
    Expenses,
    Attendance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// One drain finished; `synced` mutations were replayed successfully.
    SyncComplete { synced: usize },
    /// The named feature's data changed server-side; re-query.
    Refresh(Feature),
}

/// Broadcast bus shared by the synchronizer and all feature modules.
/// Constructed once per process and injected, never ambient.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AppEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        // Slow subscribers lag rather than block the synchronizer.
        let (tx, _) = broadcast::channel(64);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.tx.subscribe()
    }

    /// Publish to all current subscribers. Sending with no subscribers is
    /// fine — events are advisory.
    pub fn publish(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
