//! Cache writers: upsert freshly fetched backend rows into the local mirror.
//!
//! Called opportunistically after every successful online read so the mirror
//! stays warm for offline fallback. All writers are idempotent (repeated
//! application converges) and never fail: a failing put degrades the cache,
//! it does not break the read that triggered it.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::db::LocalStore;
use crate::models::{
    AttendanceLog, Branch, CashExpense, CashRegister, Category, Employee, PaymentMethod, Product,
    SaleWithItems,
};

fn upsert_all<T: Serialize>(store: &LocalStore, name: &str, rows: &[T]) -> usize {
    let mut written = 0;
    for row in rows {
        let value = match serde_json::to_value(row) {
            Ok(v) => v,
            Err(err) => {
                warn!(store = name, error = %err, "Skipping uncacheable row");
                continue;
            }
        };
        match store.put(name, &value) {
            Ok(_) => written += 1,
            Err(err) => {
                warn!(store = name, error = %err, "Cache write failed; mirror degraded");
            }
        }
    }
    debug!(store = name, written, "Cached remote rows");
    written
}

pub fn cache_products(store: &LocalStore, rows: &[Product]) -> usize {
    upsert_all(store, "products", rows)
}

pub fn cache_categories(store: &LocalStore, rows: &[Category]) -> usize {
    upsert_all(store, "categories", rows)
}

pub fn cache_payment_methods(store: &LocalStore, rows: &[PaymentMethod]) -> usize {
    upsert_all(store, "payment_methods", rows)
}

pub fn cache_branches(store: &LocalStore, rows: &[Branch]) -> usize {
    upsert_all(store, "branches", rows)
}

pub fn cache_employees(store: &LocalStore, rows: &[Employee]) -> usize {
    upsert_all(store, "employees", rows)
}

pub fn cache_attendance_logs(store: &LocalStore, rows: &[AttendanceLog]) -> usize {
    upsert_all(store, "attendance_logs", rows)
}

pub fn cache_cash_registers(store: &LocalStore, rows: &[CashRegister]) -> usize {
    upsert_all(store, "cash_registers", rows)
}

pub fn cache_cash_expenses(store: &LocalStore, rows: &[CashExpense]) -> usize {
    upsert_all(store, "cash_expenses", rows)
}

/// Cache sales together with their line items.
///
/// Splits the nested payload into `sales_cache` + `sale_items_cache`.
/// Remote line-item identifiers are discarded: items are only ever read
/// back by parent-sale lookup, so the append store assigns throwaway keys.
/// To stay idempotent, previously cached items for each sale are dropped
/// before the fresh ones go in.
pub fn cache_sales_with_items(store: &LocalStore, rows: &[SaleWithItems]) -> usize {
    let mut written = 0;
    for entry in rows {
        let header = match serde_json::to_value(&entry.sale) {
            Ok(v) => v,
            Err(err) => {
                warn!(error = %err, "Skipping uncacheable sale");
                continue;
            }
        };
        if let Err(err) = store.put("sales_cache", &header) {
            warn!(error = %err, "Sale cache write failed; mirror degraded");
            continue;
        }

        let sale_key = entry.sale.id.to_string();
        if let Err(err) = store.delete_by_index("sale_items_cache", "sale_id", &sale_key) {
            warn!(sale_id = %sale_key, error = %err, "Stale item cleanup failed");
        }
        for item in &entry.items {
            match serde_json::to_value(item) {
                Ok(value) => {
                    if let Err(err) = store.append("sale_items_cache", &value) {
                        warn!(sale_id = %sale_key, error = %err, "Sale item cache write failed");
                    }
                }
                Err(err) => warn!(sale_id = %sale_key, error = %err, "Skipping uncacheable item"),
            }
        }
        written += 1;
    }
    written
}

/// Cached line items for one sale, for offline sale-detail views.
pub fn cached_sale_items(store: &LocalStore, sale_key: &str) -> Vec<Value> {
    store.get_all_by_index_or_empty("sale_items_cache", "sale_id", sale_key)
}

// ===========================================================================
// Tests
// ===========================================================================
