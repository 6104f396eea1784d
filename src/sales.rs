//! Local-only sales ledger and the unified sales history view.
//!
//! Sales captured fully offline live in `sales_local`/`sale_items_local`,
//! separate from the cached mirror of server sales so their origin is never
//! ambiguous. The merge utility blends remote sales, the local ledger, and
//! previously cached sales into one deduplicated reverse-chronological list
//! for the history screen.

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::db::LocalStore;
use crate::error::StoreError;
use crate::ids::RecordId;
use crate::models::{Sale, SaleItem, SaleWithItems};
use crate::queue::{Mutation, MutationQueue};

// ---------------------------------------------------------------------------
// Offline capture
// ---------------------------------------------------------------------------

/// A sale as entered at the register, before it has any identifier.
#[derive(Debug, Clone)]
pub struct SaleDraft {
    pub branch_id: String,
    pub customer_name: Option<String>,
    pub payment_method_id: Option<RecordId>,
    pub lines: Vec<LineDraft>,
}

#[derive(Debug, Clone)]
pub struct LineDraft {
    /// Catalog product, or `None` for a custom line.
    pub product_id: Option<RecordId>,
    pub description: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
}

/// Capture a sale while offline: write the header and lines to the
/// local-only ledger under a fresh temporary identifier and enqueue the
/// replay. Returns the temporary identifier.
///
/// Lines reference the parent by that identifier and are migrated with it
/// when the create replays.
pub fn record_offline_sale(
    store: &LocalStore,
    queue: &MutationQueue,
    draft: SaleDraft,
) -> Result<RecordId, StoreError> {
    let id = RecordId::fresh_local();
    let total = draft
        .lines
        .iter()
        .map(|line| line.quantity * line.unit_price)
        .sum();

    let sale = Sale {
        id: id.clone(),
        branch_id: draft.branch_id,
        customer_name: draft.customer_name,
        total,
        payment_method_id: draft.payment_method_id,
        created_at: Utc::now(),
    };
    let items: Vec<SaleItem> = draft
        .lines
        .into_iter()
        .map(|line| SaleItem {
            sale_id: id.clone(),
            product_id: line.product_id,
            description: line.description,
            quantity: line.quantity,
            unit_price: line.unit_price,
        })
        .collect();

    store.put("sales_local", &serde_json::to_value(&sale)?)?;
    for item in &items {
        store.append("sale_items_local", &serde_json::to_value(item)?)?;
    }
    queue.enqueue(&Mutation::CreateSale(SaleWithItems { sale, items }))?;

    Ok(id)
}

/// The pending offline sales, with their lines, oldest first. Degrades to
/// empty when the store is unavailable.
pub fn local_ledger(store: &LocalStore) -> Vec<SaleWithItems> {
    let mut out = Vec::new();
    for row in store.get_all_or_empty("sales_local") {
        let sale: Sale = match serde_json::from_value(row) {
            Ok(sale) => sale,
            Err(err) => {
                warn!(error = %err, "Skipping unreadable ledger sale");
                continue;
            }
        };
        let items = sale_items_from_rows(
            store.get_all_by_index_or_empty("sale_items_local", "sale_id", &sale.id.to_string()),
        );
        out.push(SaleWithItems { sale, items });
    }
    out.sort_by(|a, b| a.sale.created_at.cmp(&b.sale.created_at));
    out
}

/// Previously cached server sales, for offline history reads.
pub fn cached_sales(store: &LocalStore) -> Vec<Sale> {
    store
        .get_all_or_empty("sales_cache")
        .into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(sale) => Some(sale),
            Err(err) => {
                warn!(error = %err, "Skipping unreadable cached sale");
                None
            }
        })
        .collect()
}

fn sale_items_from_rows(rows: Vec<Value>) -> Vec<SaleItem> {
    rows.into_iter()
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect()
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// One entry of the unified sales history.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedSale {
    pub sale: Sale,
    /// True when the server copy is authoritative; false for sales still
    /// waiting in the local ledger.
    pub synced: bool,
}

/// Blend remote (or cached-remote) sales with the local-only ledger into a
/// deduplicated list, newest first.
///
/// A sale present in both sets (by id) keeps the remote copy and is flagged
/// synced; ledger-only sales are flagged unsynced so the UI can badge them
/// as pending. Ties on the timestamp keep input order (stable sort).
pub fn merge_sales(remote: Vec<Sale>, local: Vec<Sale>) -> Vec<MergedSale> {
    let mut merged: Vec<MergedSale> = remote
        .into_iter()
        .map(|sale| MergedSale { sale, synced: true })
        .collect();

    for sale in local {
        if merged.iter().any(|entry| entry.sale.id == sale.id) {
            continue; // remote wins
        }
        merged.push(MergedSale { sale, synced: false });
    }

    merged.sort_by(|a, b| b.sale.created_at.cmp(&a.sale.created_at));
    merged
}

// ===========================================================================
// Tests
// ===========================================================================
