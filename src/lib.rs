//! Offline-first synchronization core for ShopStream point-of-sale devices.
//!
//! Every read is served from a local SQLite-backed document store; every
//! write lands locally first and is enqueued for replay against the hosted
//! backend. The synchronizer drains the queue in creation order when
//! connectivity returns, swapping temporary identifiers for server-assigned
//! keys as creates land.
//!
//! Layering:
//! - [`db`]: named JSON-document stores over one SQLite file
//! - [`cache`]: write-through helpers mirroring server reads
//! - [`queue`]: the durable mutation queue
//! - [`monitor`] / [`events`]: connectivity state and refresh broadcasts
//! - [`remote`] / [`config`]: the backend client
//! - [`sync`]: the drain loop and identifier remapping
//! - [`sales`]: the offline sales ledger and merged history view

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod monitor;
pub mod queue;
pub mod remote;
pub mod sales;
pub mod sync;

pub use config::RemoteConfig;
pub use db::LocalStore;
pub use error::{RemoteError, StoreError};
pub use events::{AppEvent, EventBus, Feature};
pub use ids::RecordId;
pub use monitor::{ConnectionStatus, ConnectivityMonitor};
pub use queue::{Mutation, MutationQueue, QueueEntry};
pub use remote::{HttpRemote, RemoteStore, StockAdjustment};
pub use sales::{merge_sales, record_offline_sale, MergedSale, SaleDraft};
pub use sync::{DrainSummary, SyncService, Synchronizer};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the process-wide tracing subscriber. Honors `RUST_LOG`; defaults
/// to info globally with debug for this crate.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shopstream_offline=debug"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
