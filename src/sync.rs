//! Synchronizer: replays the mutation queue against the remote store.
//!
//! One drain walks `list_pending()` strictly in creation order, one mutation
//! at a time, so causal ordering between dependent mutations holds (a
//! category create replays — including identifier remapping — before the
//! product create that references it). Failures are isolated per mutation:
//! the error and retry count land on the queue row and the drain continues.
//!
//! After a successful create that carried a temporary identifier, the
//! server-assigned key replaces it everywhere: the mirror row is re-keyed,
//! every declared foreign-key field is rewritten via `db::FOREIGN_KEYS`,
//! and identifiers inside still-pending queue payloads are swapped so later
//! mutations in the same drain replay against the server key.
//!
//! Concurrency: single-flight. The connectivity monitor's guard is the only
//! concurrency control; the synchronizer assumes it is never invoked twice
//! in parallel.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::db::{LocalStore, FOREIGN_KEYS};
use crate::error::{RemoteError, StoreError};
use crate::events::{AppEvent, EventBus, Feature};
use crate::ids::RecordId;
use crate::models::SaleWithItems;
use crate::monitor::ConnectivityMonitor;
use crate::queue::{Mutation, MutationQueue};
use crate::remote::{RemoteStore, StockAdjustment};

/// Result of one drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    /// Mutations successfully replayed (marked done) in this drain.
    pub synced: usize,
}

#[derive(Debug, Error)]
enum ReplayError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("mutation payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("{0}")]
    BadResponse(String),
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

pub struct Synchronizer {
    store: Arc<LocalStore>,
    queue: MutationQueue,
    remote: Arc<dyn RemoteStore>,
    events: EventBus,
}

impl Synchronizer {
    pub fn new(
        store: Arc<LocalStore>,
        queue: MutationQueue,
        remote: Arc<dyn RemoteStore>,
        events: EventBus,
    ) -> Self {
        Synchronizer {
            store,
            queue,
            remote,
            events,
        }
    }

    /// Drain the mutation queue exactly once, in order. Returns how many
    /// mutations were replayed; broadcasts sync-complete and per-feature
    /// refresh signals afterwards.
    pub async fn drain(&self) -> Result<DrainSummary, StoreError> {
        let snapshot = self.queue.list_pending()?;
        if snapshot.is_empty() {
            return Ok(DrainSummary { synced: 0 });
        }
        info!(pending = snapshot.len(), "Draining mutation queue");

        let mut synced = 0usize;
        let mut touched: Vec<Feature> = Vec::new();

        for stale in snapshot {
            // Re-read the row: an earlier create in this drain may have
            // remapped identifiers inside this payload.
            let Some(entry) = self.queue.get_pending(stale.id)? else {
                continue;
            };

            let mutation = match entry.decode() {
                Ok(mutation) => mutation,
                Err(err) => {
                    warn!(queue_id = entry.id, kind = %entry.kind, error = %err, "Undecodable mutation");
                    self.queue.mark_failed(entry.id, &err.to_string())?;
                    continue;
                }
            };

            let feature = mutation.refresh_feature();
            match self.replay(mutation).await {
                Ok(()) => {
                    self.queue.mark_done(entry.id)?;
                    synced += 1;
                    if !touched.contains(&feature) {
                        touched.push(feature);
                    }
                }
                Err(err) => {
                    warn!(queue_id = entry.id, kind = %entry.kind, error = %err, "Replay failed; mutation stays pending");
                    self.queue.mark_failed(entry.id, &err.to_string())?;
                }
            }
        }

        info!(synced, "Drain complete");
        self.events.publish(AppEvent::SyncComplete { synced });
        for feature in touched {
            self.events.publish(AppEvent::Refresh(feature));
        }

        Ok(DrainSummary { synced })
    }

    async fn replay(&self, mutation: Mutation) -> Result<(), ReplayError> {
        match mutation {
            Mutation::CreateProduct(p) => {
                let id = p.id.clone();
                self.replay_create("products", &id, serde_json::to_value(&p)?)
                    .await
            }
            Mutation::UpdateProduct(p) => {
                let id = p.id.clone();
                self.replay_update("products", &id, serde_json::to_value(&p)?)
                    .await
            }
            Mutation::DeleteProduct(id) => self.replay_delete("products", &id).await,
            Mutation::CreateCategory(c) => {
                let id = c.id.clone();
                self.replay_create("categories", &id, serde_json::to_value(&c)?)
                    .await
            }
            Mutation::UpdateCategory(c) => {
                let id = c.id.clone();
                self.replay_update("categories", &id, serde_json::to_value(&c)?)
                    .await
            }
            Mutation::DeleteCategory(id) => self.replay_delete("categories", &id).await,
            Mutation::CreatePaymentMethod(m) => {
                let id = m.id.clone();
                self.replay_create("payment_methods", &id, serde_json::to_value(&m)?)
                    .await
            }
            Mutation::UpdatePaymentMethod(m) => {
                let id = m.id.clone();
                self.replay_update("payment_methods", &id, serde_json::to_value(&m)?)
                    .await
            }
            Mutation::DeletePaymentMethod(id) => {
                self.replay_delete("payment_methods", &id).await
            }
            Mutation::CreateAttendance(a) => {
                let id = a.id.clone();
                self.replay_create("attendance_logs", &id, serde_json::to_value(&a)?)
                    .await
            }
            Mutation::UpdateAttendance(a) => {
                let id = a.id.clone();
                self.replay_update("attendance_logs", &id, serde_json::to_value(&a)?)
                    .await
            }
            Mutation::OpenRegister(r) => {
                let id = r.id.clone();
                self.replay_create("cash_registers", &id, serde_json::to_value(&r)?)
                    .await
            }
            Mutation::CloseRegister(r) => {
                let id = r.id.clone();
                self.replay_update("cash_registers", &id, serde_json::to_value(&r)?)
                    .await
            }
            Mutation::CreateExpense(e) => {
                let id = e.id.clone();
                self.replay_create("cash_expenses", &id, serde_json::to_value(&e)?)
                    .await
            }
            Mutation::DeleteExpense(id) => self.replay_delete("cash_expenses", &id).await,
            Mutation::CreateSale(payload) => self.replay_sale(payload).await,
        }
    }

    /// Remote table and mirror store share names for every simple entity,
    /// so one argument serves as both.
    async fn replay_create(
        &self,
        table: &str,
        id: &RecordId,
        mut row: Value,
    ) -> Result<(), ReplayError> {
        let was_local = id.is_local();
        if was_local {
            // The temporary identifier never goes over the wire; the server
            // assigns the real key.
            if let Some(obj) = row.as_object_mut() {
                obj.remove("id");
            }
        }

        let server_row = self.remote.insert(table, &row).await?;

        if was_local {
            self.remap_created(table, id, &server_row);
        } else {
            self.mirror_put(table, &server_row);
        }
        Ok(())
    }

    async fn replay_update(
        &self,
        table: &str,
        id: &RecordId,
        row: Value,
    ) -> Result<(), ReplayError> {
        if id.is_local() {
            // Nothing server-side to mutate yet. Insertion order guarantees
            // the create for this id precedes us when the caller enqueued
            // correctly; once that create syncs, this payload would have
            // been remapped anyway.
            debug!(%id, table, "Update against temporary id; no-op");
            return Ok(());
        }
        let server_row = self.remote.update(table, &id.to_string(), &row).await?;
        self.mirror_put(table, &server_row);
        Ok(())
    }

    async fn replay_delete(&self, table: &str, id: &RecordId) -> Result<(), ReplayError> {
        let key = id.to_string();
        if id.is_local() {
            debug!(%id, table, "Delete against temporary id; removing local row only");
        } else {
            self.remote.delete(table, &key).await?;
        }
        if let Err(err) = self.store.delete(table, &key) {
            warn!(store = table, key = %key, error = %err, "Mirror delete failed");
        }
        Ok(())
    }

    /// Offline sale replay: header insert, per-line insert with the
    /// server-assigned sale id, then the atomic stock decrement RPC, then
    /// migration of the ledger rows into the server-sale mirror.
    ///
    /// The server key is persisted onto the pending payload as soon as the
    /// header lands, so a retry after a partial replay (a failed line insert
    /// or stock call) arrives here with a remote sale id and skips the
    /// header insert instead of minting a duplicate sale.
    async fn replay_sale(&self, payload: SaleWithItems) -> Result<(), ReplayError> {
        let SaleWithItems { sale, items } = payload;
        let branch_id = sale.branch_id.clone();

        let (server_row, new_key) = match &sale.id {
            RecordId::Local(_) => {
                let old_key = sale.id.to_string();
                let mut header = serde_json::to_value(&sale)?;
                if let Some(obj) = header.as_object_mut() {
                    obj.remove("id");
                }
                let server_row = self.remote.insert("sales", &header).await?;
                let new_key = server_row
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ReplayError::BadResponse("sale representation has no id".into())
                    })?
                    .to_string();
                if let Err(err) = self.persist_sale_key(&old_key, &new_key, &server_row) {
                    warn!(old = %old_key, new = %new_key, error = %err, "Sale key persistence failed; a retry may duplicate the header");
                }
                (server_row, new_key)
            }
            // Retry after a partial replay: the header landed on a previous
            // attempt.
            RecordId::Remote(key) => (serde_json::to_value(&sale)?, key.clone()),
        };

        for item in &items {
            let mut row = serde_json::to_value(item)?;
            row["sale_id"] = Value::String(new_key.clone());
            self.remote.insert("sale_items", &row).await?;
        }

        // Custom lines and not-yet-synced products carry no stock to adjust.
        let adjustments: Vec<StockAdjustment> = items
            .iter()
            .filter_map(|item| match &item.product_id {
                Some(RecordId::Remote(key)) => Some(StockAdjustment {
                    product_id: key.clone(),
                    quantity: item.quantity,
                }),
                _ => None,
            })
            .collect();
        if !adjustments.is_empty() {
            self.remote.apply_sale_stock(&branch_id, &adjustments).await?;
        }

        if let Err(err) = self.migrate_ledger_sale(&new_key, &server_row, &items) {
            // The sale is on the server; a stale ledger row costs one
            // pending-looking history entry, not data loss.
            warn!(key = %new_key, error = %err, "Ledger migration failed after sale sync");
        }
        Ok(())
    }

    /// Durably swap the temporary sale id for the server key: re-key the
    /// ledger rows and rewrite pending queue payloads. Runs between the
    /// header insert and the line inserts so any failure past the header
    /// retries against the server sale.
    fn persist_sale_key(
        &self,
        old_key: &str,
        new_key: &str,
        server_row: &Value,
    ) -> Result<(), ReplayError> {
        self.store.delete("sales_local", old_key)?;
        self.store.put("sales_local", server_row)?;
        self.store
            .rewrite_foreign_key("sale_items_local", "sale_id", old_key, new_key)?;
        self.queue.remap_payload_ids(old_key, new_key)?;
        Ok(())
    }

    /// Move a synced sale out of the local-only ledger into the cached
    /// mirror of server sales, together with its line items. By this point
    /// the ledger rows are already keyed by the server id.
    fn migrate_ledger_sale(
        &self,
        key: &str,
        server_row: &Value,
        items: &[crate::models::SaleItem],
    ) -> Result<(), ReplayError> {
        self.store.delete("sales_local", key)?;
        self.store.delete_by_index("sale_items_local", "sale_id", key)?;

        self.store.put("sales_cache", server_row)?;
        for item in items {
            let mut row = serde_json::to_value(item)?;
            row["sale_id"] = Value::String(key.to_string());
            self.store.append("sale_items_cache", &row)?;
        }

        info!(key, "Offline sale migrated to server mirror");
        Ok(())
    }

    /// After a create replays for a temporary identifier: re-key the mirror
    /// row to the server key and cascade through every declared foreign-key
    /// field and every still-pending queue payload.
    ///
    /// Best-effort: the row already exists server-side, so a local
    /// bookkeeping failure must not push the mutation back to pending — a
    /// retry would insert a duplicate remotely.
    fn remap_created(&self, store_name: &str, old_id: &RecordId, server_row: &Value) {
        let Some(new_key) = server_row.get("id").and_then(Value::as_str) else {
            warn!(store = store_name, "Create response carries no id; mirror not remapped");
            return;
        };
        let old_key = old_id.to_string();
        if let Err(err) = self.apply_remap(store_name, &old_key, new_key, server_row) {
            warn!(store = store_name, old = %old_key, new = new_key, error = %err, "Identifier remap incomplete");
        }
    }

    fn apply_remap(
        &self,
        store_name: &str,
        old_key: &str,
        new_key: &str,
        server_row: &Value,
    ) -> Result<(), ReplayError> {
        self.store.delete(store_name, old_key)?;
        self.store.put(store_name, server_row)?;

        for fk in FOREIGN_KEYS {
            let changed = self
                .store
                .rewrite_foreign_key(fk.store, fk.field, old_key, new_key)?;
            if changed > 0 {
                debug!(store = fk.store, field = fk.field, changed, "Cascaded identifier remap");
            }
        }
        self.queue.remap_payload_ids(old_key, new_key)?;

        info!(store = store_name, old = old_key, new = new_key, "Temporary identifier remapped");
        Ok(())
    }

    fn mirror_put(&self, store_name: &str, server_row: &Value) {
        if let Err(err) = self.store.put(store_name, server_row) {
            warn!(store = store_name, error = %err, "Mirror write-through failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Sync service: monitor + synchronizer, wired together
// ---------------------------------------------------------------------------

/// Composition root for the sync layer. Owns the queue handle and the
/// synchronizer, and consults the connectivity monitor's single-flight
/// guard before every drain.
pub struct SyncService {
    queue: MutationQueue,
    monitor: Arc<ConnectivityMonitor>,
    synchronizer: Synchronizer,
    loop_running: Arc<AtomicBool>,
}

impl SyncService {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        monitor: Arc<ConnectivityMonitor>,
        events: EventBus,
    ) -> Self {
        let queue = MutationQueue::new(store.clone());
        let synchronizer = Synchronizer::new(store, queue.clone(), remote, events);
        SyncService {
            queue,
            monitor,
            synchronizer,
            loop_running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Pending-mutation count for badge UI; 0 when the store is degraded.
    pub fn pending_count(&self) -> u64 {
        match self.queue.pending_count() {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, "Pending count unavailable; reporting zero");
                0
            }
        }
    }

    /// Drain now, unless offline or a drain is already in flight — in which
    /// case this is a no-op reporting zero synced mutations.
    pub async fn sync_now(&self) -> Result<DrainSummary, StoreError> {
        if !self.monitor.try_begin_sync(self.pending_count()) {
            return Ok(DrainSummary { synced: 0 });
        }
        let result = self.synchronizer.drain().await;
        self.monitor.finish_sync(self.pending_count());
        result
    }

    /// Platform signaled reconnection: publish the transition and start the
    /// automatic post-reconnect drain.
    pub async fn handle_online(&self) -> Result<DrainSummary, StoreError> {
        self.monitor.set_online(true, self.pending_count());
        self.sync_now().await
    }

    /// Platform signaled disconnection. An in-flight drain is not aborted.
    pub fn handle_offline(&self) {
        self.monitor.set_online(false, self.pending_count());
    }

    /// Periodic background drain, for missed reconnect signals and for
    /// retrying failed replays. Stop with [`SyncService::stop_sync_loop`].
    pub fn spawn_sync_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        service.loop_running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Sync loop started");
            loop {
                tokio::time::sleep(interval).await;
                if !service.loop_running.load(Ordering::SeqCst) {
                    info!("Sync loop stopped");
                    break;
                }
                if !service.monitor.is_online() {
                    continue;
                }
                if let Err(err) = service.sync_now().await {
                    warn!(error = %err, "Scheduled drain failed");
                }
            }
        })
    }

    pub fn stop_sync_loop(&self) {
        self.loop_running.store(false, Ordering::SeqCst);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    use crate::models::{Category, Product, Sale, SaleItem};
    use crate::sales::{self, LineDraft, SaleDraft};

    /// In-memory remote. Assigns `S1`, `S2`, ... to rows arriving without an
    /// id; any row whose JSON contains `"boom"` fails with a 503, as does
    /// any `sale_items` insert while `fail_sale_items` is set.
    struct MockRemote {
        next_id: AtomicU64,
        fail_sale_items: AtomicBool,
        inserted: Mutex<Vec<(String, Value)>>,
        deleted: Mutex<Vec<(String, String)>>,
        stock_calls: Mutex<Vec<(String, Vec<StockAdjustment>)>>,
    }

    impl MockRemote {
        fn new() -> Arc<Self> {
            Arc::new(MockRemote {
                next_id: AtomicU64::new(0),
                fail_sale_items: AtomicBool::new(false),
                inserted: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                stock_calls: Mutex::new(Vec::new()),
            })
        }

        fn fail_if_marked(row: &Value) -> Result<(), RemoteError> {
            if row.to_string().contains("boom") {
                return Err(RemoteError::Status {
                    status: 503,
                    message: "backend server error".into(),
                });
            }
            Ok(())
        }

        fn inserted_into(&self, table: &str) -> Vec<Value> {
            self.inserted
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| t == table)
                .map(|(_, row)| row.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteStore for MockRemote {
        async fn insert(&self, table: &str, row: &Value) -> Result<Value, RemoteError> {
            Self::fail_if_marked(row)?;
            if table == "sale_items" && self.fail_sale_items.load(Ordering::SeqCst) {
                return Err(RemoteError::Status {
                    status: 503,
                    message: "backend server error".into(),
                });
            }
            let mut row = row.clone();
            if row.get("id").and_then(Value::as_str).is_none() {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                row["id"] = json!(format!("S{n}"));
            }
            self.inserted
                .lock()
                .unwrap()
                .push((table.to_string(), row.clone()));
            Ok(row)
        }

        async fn update(&self, _table: &str, key: &str, row: &Value) -> Result<Value, RemoteError> {
            Self::fail_if_marked(row)?;
            let mut row = row.clone();
            row["id"] = json!(key);
            Ok(row)
        }

        async fn delete(&self, table: &str, key: &str) -> Result<(), RemoteError> {
            self.deleted
                .lock()
                .unwrap()
                .push((table.to_string(), key.to_string()));
            Ok(())
        }

        async fn select(&self, table: &str) -> Result<Vec<Value>, RemoteError> {
            Ok(self.inserted_into(table))
        }

        async fn apply_sale_stock(
            &self,
            branch_id: &str,
            items: &[StockAdjustment],
        ) -> Result<(), RemoteError> {
            self.stock_calls
                .lock()
                .unwrap()
                .push((branch_id.to_string(), items.to_vec()));
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<LocalStore>,
        queue: MutationQueue,
        remote: Arc<MockRemote>,
        events: EventBus,
        synchronizer: Synchronizer,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let queue = MutationQueue::new(store.clone());
        let remote = MockRemote::new();
        let events = EventBus::new();
        let synchronizer = Synchronizer::new(
            store.clone(),
            queue.clone(),
            remote.clone(),
            events.clone(),
        );
        Fixture {
            store,
            queue,
            remote,
            events,
            synchronizer,
        }
    }

    fn category(id: RecordId, name: &str) -> Category {
        Category {
            id,
            name: name.into(),
            created_at: Utc::now(),
        }
    }

    fn product(id: RecordId, name: &str, category_id: Option<RecordId>) -> Product {
        Product {
            id,
            name: name.into(),
            barcode: None,
            price: 2.0,
            stock_quantity: 5,
            category_id,
            branch_id: Some("b1".into()),
            image_url: None,
            created_at: Utc::now(),
        }
    }

    /// Offline create of a category then a product referencing it; one
    /// drain must land both under server ids with the reference rewritten.
    #[tokio::test]
    async fn test_drain_remaps_create_chain_across_stores() {
        let f = fixture();

        let cat_id = RecordId::fresh_local();
        let prod_id = RecordId::fresh_local();
        let cat = category(cat_id.clone(), "Drinks");
        let prod = product(prod_id.clone(), "Cola", Some(cat_id.clone()));

        // Offline write path: local mirror + queue entry.
        f.store
            .put("categories", &serde_json::to_value(&cat).unwrap())
            .unwrap();
        f.store
            .put("products", &serde_json::to_value(&prod).unwrap())
            .unwrap();
        f.queue.enqueue(&Mutation::CreateCategory(cat)).unwrap();
        f.queue.enqueue(&Mutation::CreateProduct(prod)).unwrap();

        let summary = f.synchronizer.drain().await.unwrap();
        assert_eq!(summary.synced, 2);
        assert_eq!(f.queue.pending_count().unwrap(), 0);

        // Category landed under the server id.
        let cats = f.store.get_all("categories").unwrap();
        assert_eq!(cats.len(), 1);
        assert_eq!(cats[0]["id"], "S1");

        // Product landed under its own server id with the reference rewritten.
        let prods = f.store.get_all("products").unwrap();
        assert_eq!(prods.len(), 1);
        assert_eq!(prods[0]["id"], "S2");
        assert_eq!(prods[0]["category_id"], "S1");

        // The product arrived at the backend already pointing at S1.
        let sent = f.remote.inserted_into("products");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["category_id"], "S1");

        // Remap atomicity: no trace of either temporary id in any store.
        let old_keys = [cat_id.to_string(), prod_id.to_string()];
        for store in ["categories", "products", "sales_cache", "sale_items_cache"] {
            for row in f.store.get_all(store).unwrap() {
                let text = row.to_string();
                for old in &old_keys {
                    assert!(!text.contains(old.as_str()), "{store} still holds {old}: {text}");
                }
            }
        }
    }

    /// A failing mutation in the middle must not block its neighbours.
    #[tokio::test]
    async fn test_drain_isolates_failures() {
        let f = fixture();

        f.queue
            .enqueue(&Mutation::CreateCategory(category(
                RecordId::fresh_local(),
                "ok-1",
            )))
            .unwrap();
        let failing = f
            .queue
            .enqueue(&Mutation::CreateCategory(category(
                RecordId::fresh_local(),
                "boom",
            )))
            .unwrap();
        f.queue
            .enqueue(&Mutation::CreateCategory(category(
                RecordId::fresh_local(),
                "ok-2",
            )))
            .unwrap();

        let summary = f.synchronizer.drain().await.unwrap();
        assert_eq!(summary.synced, 2);

        let pending = f.queue.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, failing);
        assert_eq!(pending[0].retry_count, 1);
        assert!(pending[0]
            .last_error
            .as_deref()
            .unwrap()
            .contains("backend server error"));
    }

    /// Update/delete against a temporary id has nothing server-side to
    /// mutate; it is marked done without touching the remote.
    #[tokio::test]
    async fn test_local_id_update_and_delete_are_noops() {
        let f = fixture();

        let ghost = RecordId::fresh_local();
        f.queue
            .enqueue(&Mutation::UpdateCategory(category(ghost.clone(), "ghost")))
            .unwrap();
        f.queue.enqueue(&Mutation::DeleteCategory(ghost)).unwrap();

        let summary = f.synchronizer.drain().await.unwrap();
        assert_eq!(summary.synced, 2);
        assert_eq!(f.queue.pending_count().unwrap(), 0);
        assert!(f.remote.inserted.lock().unwrap().is_empty());
        assert!(f.remote.deleted.lock().unwrap().is_empty());
    }

    /// Offline sale: replay inserts header + lines, fires the stock RPC,
    /// and migrates the ledger rows into the server-sale mirror.
    #[tokio::test]
    async fn test_offline_sale_replay_migrates_ledger() {
        let f = fixture();

        let temp_id = sales::record_offline_sale(
            &f.store,
            &f.queue,
            SaleDraft {
                branch_id: "b1".into(),
                customer_name: None,
                payment_method_id: None,
                lines: vec![
                    LineDraft {
                        product_id: Some(RecordId::remote("p1")),
                        description: None,
                        quantity: 2.0,
                        unit_price: 3.0,
                    },
                    LineDraft {
                        product_id: None,
                        description: Some("bag".into()),
                        quantity: 1.0,
                        unit_price: 0.5,
                    },
                ],
            },
        )
        .unwrap();

        let summary = f.synchronizer.drain().await.unwrap();
        assert_eq!(summary.synced, 1);

        // Ledger emptied, mirror populated under the server id.
        assert!(sales::local_ledger(&f.store).is_empty());
        let cached = f.store.get_all("sales_cache").unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0]["id"], "S1");
        assert!(f
            .store
            .get("sales_local", &temp_id.to_string())
            .unwrap()
            .is_none());

        let items = f
            .store
            .get_all_by_index("sale_items_cache", "sale_id", "S1")
            .unwrap();
        assert_eq!(items.len(), 2);

        // Lines went to the backend keyed by the server sale id.
        let sent_items = f.remote.inserted_into("sale_items");
        assert_eq!(sent_items.len(), 2);
        assert!(sent_items.iter().all(|row| row["sale_id"] == "S1"));

        // Stock decremented only for the catalog line.
        let stock = f.remote.stock_calls.lock().unwrap();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].0, "b1");
        assert_eq!(stock[0].1.len(), 1);
        assert_eq!(stock[0].1[0].product_id, "p1");
        assert_eq!(stock[0].1[0].quantity, 2.0);
        drop(stock);

        // History now shows the sale as synced.
        let history = sales::merge_sales(
            sales::cached_sales(&f.store),
            sales::local_ledger(&f.store)
                .into_iter()
                .map(|s| s.sale)
                .collect(),
        );
        assert_eq!(history.len(), 1);
        assert!(history[0].synced);
    }

    /// A replay that fails after the sale header lands must retry against
    /// the server sale, not insert a second header (or decrement stock
    /// twice).
    #[tokio::test]
    async fn test_sale_retry_does_not_duplicate_remote_header() {
        let f = fixture();
        f.remote.fail_sale_items.store(true, Ordering::SeqCst);

        sales::record_offline_sale(
            &f.store,
            &f.queue,
            SaleDraft {
                branch_id: "b1".into(),
                customer_name: None,
                payment_method_id: None,
                lines: vec![LineDraft {
                    product_id: Some(RecordId::remote("p1")),
                    description: None,
                    quantity: 1.0,
                    unit_price: 4.0,
                }],
            },
        )
        .unwrap();

        let first = f.synchronizer.drain().await.unwrap();
        assert_eq!(first.synced, 0);
        assert_eq!(f.remote.inserted_into("sales").len(), 1);

        let pending = f.queue.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].retry_count, 1);

        f.remote.fail_sale_items.store(false, Ordering::SeqCst);
        let second = f.synchronizer.drain().await.unwrap();
        assert_eq!(second.synced, 1);

        assert_eq!(
            f.remote.inserted_into("sales").len(),
            1,
            "header inserted exactly once across retries"
        );
        assert_eq!(f.remote.stock_calls.lock().unwrap().len(), 1);
        assert!(sales::local_ledger(&f.store).is_empty());
        assert_eq!(f.store.get_all("sales_cache").unwrap().len(), 1);
    }

    /// An offline sale whose lines reference an offline-created product:
    /// the product create earlier in the drain must remap the sale payload
    /// before it replays.
    #[tokio::test]
    async fn test_sale_lines_follow_product_remap_within_one_drain() {
        let f = fixture();

        let prod_id = RecordId::fresh_local();
        f.queue
            .enqueue(&Mutation::CreateProduct(product(
                prod_id.clone(),
                "Cola",
                None,
            )))
            .unwrap();

        let sale_id = RecordId::fresh_local();
        f.queue
            .enqueue(&Mutation::CreateSale(SaleWithItems {
                sale: Sale {
                    id: sale_id.clone(),
                    branch_id: "b1".into(),
                    customer_name: None,
                    total: 3.0,
                    payment_method_id: None,
                    created_at: Utc::now(),
                },
                items: vec![SaleItem {
                    sale_id: sale_id.clone(),
                    product_id: Some(prod_id.clone()),
                    description: None,
                    quantity: 1.0,
                    unit_price: 3.0,
                }],
            }))
            .unwrap();

        let summary = f.synchronizer.drain().await.unwrap();
        assert_eq!(summary.synced, 2);

        // Product became S1; the sale line and the stock RPC used S1.
        let sent_items = f.remote.inserted_into("sale_items");
        assert_eq!(sent_items.len(), 1);
        assert_eq!(sent_items[0]["product_id"], "S1");

        let stock = f.remote.stock_calls.lock().unwrap();
        assert_eq!(stock.len(), 1);
        assert_eq!(stock[0].1[0].product_id, "S1");
    }

    #[tokio::test]
    async fn test_drain_broadcasts_completion_and_refresh() {
        let f = fixture();
        let mut rx = f.events.subscribe();

        f.queue
            .enqueue(&Mutation::CreateCategory(category(
                RecordId::fresh_local(),
                "Drinks",
            )))
            .unwrap();

        f.synchronizer.drain().await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            AppEvent::SyncComplete { synced: 1 }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            AppEvent::Refresh(Feature::Inventory)
        );
    }

    /// A second sync_now while one is in flight is dropped: synced count 0,
    /// no duplicate replay.
    #[tokio::test]
    async fn test_sync_now_is_single_flight() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = MockRemote::new();
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        let service = Arc::new(SyncService::new(
            store,
            remote.clone(),
            monitor.clone(),
            EventBus::new(),
        ));

        service
            .queue()
            .enqueue(&Mutation::CreateCategory(category(
                RecordId::fresh_local(),
                "Drinks",
            )))
            .unwrap();

        // Hold the guard as if a drain were in flight.
        assert!(monitor.try_begin_sync(1));
        let blocked = service.sync_now().await.unwrap();
        assert_eq!(blocked.synced, 0);
        assert!(remote.inserted.lock().unwrap().is_empty(), "no replay ran");

        monitor.finish_sync(1);
        let drained = service.sync_now().await.unwrap();
        assert_eq!(drained.synced, 1);
        assert_eq!(remote.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_now_while_offline_is_noop() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = MockRemote::new();
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let service = SyncService::new(store, remote.clone(), monitor, EventBus::new());

        service
            .queue()
            .enqueue(&Mutation::CreateCategory(category(
                RecordId::fresh_local(),
                "Drinks",
            )))
            .unwrap();

        let summary = service.sync_now().await.unwrap();
        assert_eq!(summary.synced, 0);
        assert_eq!(service.pending_count(), 1);
    }

    /// A degraded store must not crash the badge count or report stale
    /// numbers; it reports zero.
    #[tokio::test]
    async fn test_pending_count_degrades_to_zero_on_store_failure() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let service = SyncService::new(
            store.clone(),
            MockRemote::new(),
            Arc::new(ConnectivityMonitor::new(true)),
            EventBus::new(),
        );
        service
            .queue()
            .enqueue(&Mutation::CreateCategory(category(
                RecordId::fresh_local(),
                "Drinks",
            )))
            .unwrap();
        assert_eq!(service.pending_count(), 1);

        // Poison the connection lock.
        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _ = poisoner.with_conn(|_| -> Result<(), StoreError> { panic!("poisoned") });
        })
        .join();

        assert_eq!(service.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_online_triggers_automatic_drain() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = MockRemote::new();
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let service = SyncService::new(store, remote, monitor.clone(), EventBus::new());

        service
            .queue()
            .enqueue(&Mutation::CreateCategory(category(
                RecordId::fresh_local(),
                "Drinks",
            )))
            .unwrap();

        let summary = service.handle_online().await.unwrap();
        assert_eq!(summary.synced, 1);
        assert!(monitor.is_online());
        assert!(!monitor.is_syncing());
        assert_eq!(service.pending_count(), 0);
    }
}
