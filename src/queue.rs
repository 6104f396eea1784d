//! Write-ahead mutation queue.
//!
//! An append-only log of domain actions captured while offline (or after a
//! failed live write), drained strictly in creation order by the
//! synchronizer. Rows are never physically deleted — done entries stay
//! behind as an audit trail.
//!
//! Mutation kinds are a closed enum with typed payloads; the `entity:verb`
//! string tag exists only at the persistence boundary and is decoded back by
//! exhaustive match, so a typo in a tag is a decode error, not a silently
//! skipped replay.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::LocalStore;
use crate::error::StoreError;
use crate::events::Feature;
use crate::ids::RecordId;
use crate::models::{
    AttendanceLog, CashExpense, CashRegister, Category, PaymentMethod, Product, SaleWithItems,
};

/// Replay attempts before a mutation is quarantined (status `failed`,
/// excluded from drains and the pending count). The original behavior
/// retried forever; see DESIGN.md for the decision.
pub const MAX_RETRIES: i64 = 10;

// ---------------------------------------------------------------------------
// Mutation kinds
// ---------------------------------------------------------------------------

/// One intended write against the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateProduct(Product),
    UpdateProduct(Product),
    DeleteProduct(RecordId),
    CreateCategory(Category),
    UpdateCategory(Category),
    DeleteCategory(RecordId),
    CreatePaymentMethod(PaymentMethod),
    UpdatePaymentMethod(PaymentMethod),
    DeletePaymentMethod(RecordId),
    CreateAttendance(AttendanceLog),
    UpdateAttendance(AttendanceLog),
    OpenRegister(CashRegister),
    CloseRegister(CashRegister),
    CreateExpense(CashExpense),
    DeleteExpense(RecordId),
    /// Offline sale: header + lines replay together, then the stock RPC.
    CreateSale(SaleWithItems),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown mutation kind '{0}'")]
    UnknownKind(String),
    #[error("mutation payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl Mutation {
    /// Persistence tag, `entity:verb`.
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::CreateProduct(_) => "product:create",
            Mutation::UpdateProduct(_) => "product:update",
            Mutation::DeleteProduct(_) => "product:delete",
            Mutation::CreateCategory(_) => "category:create",
            Mutation::UpdateCategory(_) => "category:update",
            Mutation::DeleteCategory(_) => "category:delete",
            Mutation::CreatePaymentMethod(_) => "payment_method:create",
            Mutation::UpdatePaymentMethod(_) => "payment_method:update",
            Mutation::DeletePaymentMethod(_) => "payment_method:delete",
            Mutation::CreateAttendance(_) => "attendance:create",
            Mutation::UpdateAttendance(_) => "attendance:update",
            Mutation::OpenRegister(_) => "cash_register:open",
            Mutation::CloseRegister(_) => "cash_register:close",
            Mutation::CreateExpense(_) => "cash_expense:create",
            Mutation::DeleteExpense(_) => "cash_expense:delete",
            Mutation::CreateSale(_) => "sale:create",
        }
    }

    /// Feature surface to refresh once this mutation has replayed.
    pub fn refresh_feature(&self) -> Feature {
        match self {
            Mutation::CreateProduct(_)
            | Mutation::UpdateProduct(_)
            | Mutation::DeleteProduct(_)
            | Mutation::CreateCategory(_)
            | Mutation::UpdateCategory(_)
            | Mutation::DeleteCategory(_) => Feature::Inventory,
            Mutation::CreatePaymentMethod(_)
            | Mutation::UpdatePaymentMethod(_)
            | Mutation::DeletePaymentMethod(_) => Feature::Dashboard,
            Mutation::CreateAttendance(_) | Mutation::UpdateAttendance(_) => Feature::Attendance,
            Mutation::OpenRegister(_) | Mutation::CloseRegister(_) => Feature::Cash,
            Mutation::CreateExpense(_) | Mutation::DeleteExpense(_) => Feature::Expenses,
            Mutation::CreateSale(_) => Feature::Sales,
        }
    }

    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Mutation::CreateProduct(p) | Mutation::UpdateProduct(p) => serde_json::to_value(p),
            Mutation::CreateCategory(c) | Mutation::UpdateCategory(c) => serde_json::to_value(c),
            Mutation::CreatePaymentMethod(m) | Mutation::UpdatePaymentMethod(m) => {
                serde_json::to_value(m)
            }
            Mutation::CreateAttendance(a) | Mutation::UpdateAttendance(a) => {
                serde_json::to_value(a)
            }
            Mutation::OpenRegister(r) | Mutation::CloseRegister(r) => serde_json::to_value(r),
            Mutation::CreateExpense(e) => serde_json::to_value(e),
            Mutation::CreateSale(s) => serde_json::to_value(s),
            Mutation::DeleteProduct(id)
            | Mutation::DeleteCategory(id)
            | Mutation::DeletePaymentMethod(id)
            | Mutation::DeleteExpense(id) => serde_json::to_value(id),
        }
    }

    /// Decode a persisted row back into a typed mutation.
    pub fn decode(kind: &str, payload: &str) -> Result<Mutation, DecodeError> {
        let m = match kind {
            "product:create" => Mutation::CreateProduct(serde_json::from_str(payload)?),
            "product:update" => Mutation::UpdateProduct(serde_json::from_str(payload)?),
            "product:delete" => Mutation::DeleteProduct(serde_json::from_str(payload)?),
            "category:create" => Mutation::CreateCategory(serde_json::from_str(payload)?),
            "category:update" => Mutation::UpdateCategory(serde_json::from_str(payload)?),
            "category:delete" => Mutation::DeleteCategory(serde_json::from_str(payload)?),
            "payment_method:create" => {
                Mutation::CreatePaymentMethod(serde_json::from_str(payload)?)
            }
            "payment_method:update" => {
                Mutation::UpdatePaymentMethod(serde_json::from_str(payload)?)
            }
            "payment_method:delete" => {
                Mutation::DeletePaymentMethod(serde_json::from_str(payload)?)
            }
            "attendance:create" => Mutation::CreateAttendance(serde_json::from_str(payload)?),
            "attendance:update" => Mutation::UpdateAttendance(serde_json::from_str(payload)?),
            "cash_register:open" => Mutation::OpenRegister(serde_json::from_str(payload)?),
            "cash_register:close" => Mutation::CloseRegister(serde_json::from_str(payload)?),
            "cash_expense:create" => Mutation::CreateExpense(serde_json::from_str(payload)?),
            "cash_expense:delete" => Mutation::DeleteExpense(serde_json::from_str(payload)?),
            "sale:create" => Mutation::CreateSale(serde_json::from_str(payload)?),
            other => return Err(DecodeError::UnknownKind(other.to_string())),
        };
        Ok(m)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// One row of the `pending_sync` table.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: i64,
    pub kind: String,
    pub payload: String,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn decode(&self) -> Result<Mutation, DecodeError> {
        Mutation::decode(&self.kind, &self.payload)
    }
}

/// Handle to the write-ahead queue. Appended by any feature module;
/// exclusively owned by the synchronizer during a drain.
#[derive(Clone)]
pub struct MutationQueue {
    store: Arc<LocalStore>,
}

impl MutationQueue {
    pub fn new(store: Arc<LocalStore>) -> Self {
        MutationQueue { store }
    }

    /// Append a pending mutation. Purely local: never fails due to
    /// connectivity. Returns the queue sequence id.
    pub fn enqueue(&self, mutation: &Mutation) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(&mutation.payload()?)?;
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let kind = mutation.kind();

        let id = self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_sync (kind, payload, status, retry_count, created_at)
                 VALUES (?1, ?2, 'pending', 0, ?3)",
                params![kind, payload, created_at],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        debug!(kind, queue_id = id, "Mutation enqueued");
        Ok(id)
    }

    /// All pending mutations, creation order ascending (sequence id breaks
    /// timestamp ties, preserving insertion order).
    pub fn list_pending(&self) -> Result<Vec<QueueEntry>, StoreError> {
        let rows: Vec<(i64, String, String, i64, Option<String>, String)> =
            self.store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, kind, payload, retry_count, last_error, created_at
                     FROM pending_sync
                     WHERE status = 'pending'
                     ORDER BY created_at ASC, id ASC",
                )?;
                let mapped = stmt.query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })?;
                let mut out = Vec::new();
                for row in mapped {
                    out.push(row?);
                }
                Ok(out)
            })?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, kind, payload, retry_count, last_error, created_at) in rows {
            let created_at = created_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now());
            entries.push(QueueEntry {
                id,
                kind,
                payload,
                retry_count,
                last_error,
                created_at,
            });
        }
        Ok(entries)
    }

    /// Re-read one entry if it is still pending. The synchronizer reloads
    /// each entry right before replay because an earlier create in the same
    /// drain may have remapped identifiers inside its payload.
    pub fn get_pending(&self, id: i64) -> Result<Option<QueueEntry>, StoreError> {
        let row: Option<(String, String, i64, Option<String>, String)> =
            self.store.with_conn(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT kind, payload, retry_count, last_error, created_at
                         FROM pending_sync
                         WHERE id = ?1 AND status = 'pending'",
                        params![id],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get(3)?,
                                row.get(4)?,
                            ))
                        },
                    )
                    .optional()?)
            })?;

        Ok(row.map(|(kind, payload, retry_count, last_error, created_at)| QueueEntry {
            id,
            kind,
            payload,
            retry_count,
            last_error,
            created_at: created_at
                .parse::<DateTime<Utc>>()
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Mark a mutation successfully replayed.
    pub fn mark_done(&self, id: i64) -> Result<(), StoreError> {
        self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE pending_sync SET status = 'done', last_error = NULL WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
    }

    /// Record a failed replay attempt. The mutation stays pending and is
    /// retried on the next drain until the retry ceiling quarantines it.
    pub fn mark_failed(&self, id: i64, error: &str) -> Result<(), StoreError> {
        let quarantined = self.store.with_conn(|conn| {
            conn.execute(
                "UPDATE pending_sync
                 SET retry_count = retry_count + 1, last_error = ?2
                 WHERE id = ?1",
                params![id, error],
            )?;
            let retries: i64 = conn.query_row(
                "SELECT retry_count FROM pending_sync WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if retries >= MAX_RETRIES {
                conn.execute(
                    "UPDATE pending_sync SET status = 'failed' WHERE id = ?1",
                    params![id],
                )?;
                return Ok(true);
            }
            Ok(false)
        })?;

        if quarantined {
            warn!(queue_id = id, error, "Mutation quarantined after {MAX_RETRIES} failed replays");
        }
        Ok(())
    }

    /// Rewrite every occurrence of a remapped identifier inside pending
    /// payloads, so mutations enqueued against a temporary id replay with
    /// the server key once the corresponding create has synced.
    ///
    /// Identifiers are stored as full JSON strings and temporary tokens are
    /// uuids, so a quoted exact-match replace cannot clip a longer value.
    pub fn remap_payload_ids(&self, old: &str, new: &str) -> Result<usize, StoreError> {
        let old_quoted = format!("\"{old}\"");
        let new_quoted = format!("\"{new}\"");
        self.store.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE pending_sync
                 SET payload = replace(payload, ?1, ?2)
                 WHERE status = 'pending' AND instr(payload, ?1) > 0",
                params![old_quoted, new_quoted],
            )?)
        })
    }

    /// Count of status=pending mutations — the "N operations pending" badge.
    pub fn pending_count(&self) -> Result<u64, StoreError> {
        self.count_status("pending")
    }

    /// Count of quarantined mutations, for surfacing stuck work.
    pub fn failed_count(&self) -> Result<u64, StoreError> {
        self.count_status("failed")
    }

    fn count_status(&self, status: &str) -> Result<u64, StoreError> {
        self.store.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pending_sync WHERE status = ?1",
                params![status],
                |row| row.get(0),
            )?;
            Ok(n as u64)
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
