//! Local durable store: named JSON-document stores over SQLite.
//!
//! Uses rusqlite with WAL mode. Every named store is a two-column table
//! (`key`, `data`) holding one JSON document per row; declared indexes become
//! SQL indexes over `json_extract` expressions. Schema evolution follows the
//! usual migration ladder: a `schema_version` table, numbered migration
//! steps, and `CREATE ... IF NOT EXISTS` everywhere so opening never
//! destroys rows in stores that already exist.
//!
//! This is a cache, never the system of record. Callers on read paths
//! should treat a failing operation as "offline capability degraded" and
//! fall back to empty results (see `get_all_or_empty`).

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::StoreError;

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// How a store's rows are keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyKind {
    /// `key TEXT PRIMARY KEY`, taken from the row's `$.id` field on put.
    Document,
    /// `key INTEGER PRIMARY KEY AUTOINCREMENT`; rows carry no id of their
    /// own and are only read back by index lookup.
    Append,
}

struct StoreDef {
    name: &'static str,
    kind: KeyKind,
    /// JSON fields with a SQL index over `json_extract(data, '$.field')`.
    indexes: &'static [&'static str],
    /// Migration step that introduces this store.
    since: i32,
}

/// Every named store, in one place. Migrations, operation validation, and
/// the generic remap walk all read from this table.
const STORES: &[StoreDef] = &[
    StoreDef { name: "products", kind: KeyKind::Document, indexes: &["category_id", "branch_id"], since: 1 },
    StoreDef { name: "categories", kind: KeyKind::Document, indexes: &[], since: 1 },
    StoreDef { name: "payment_methods", kind: KeyKind::Document, indexes: &[], since: 1 },
    StoreDef { name: "branches", kind: KeyKind::Document, indexes: &[], since: 1 },
    StoreDef { name: "orders", kind: KeyKind::Document, indexes: &["branch_id"], since: 1 },
    StoreDef { name: "branch_config", kind: KeyKind::Document, indexes: &[], since: 1 },
    StoreDef { name: "sales_local", kind: KeyKind::Document, indexes: &["branch_id"], since: 1 },
    StoreDef { name: "sale_items_local", kind: KeyKind::Append, indexes: &["sale_id"], since: 1 },
    StoreDef { name: "cash_registers", kind: KeyKind::Document, indexes: &["branch_id"], since: 2 },
    StoreDef { name: "cash_expenses", kind: KeyKind::Document, indexes: &["branch_id"], since: 2 },
    StoreDef { name: "sales_cache", kind: KeyKind::Document, indexes: &["branch_id"], since: 3 },
    StoreDef { name: "sale_items_cache", kind: KeyKind::Append, indexes: &["sale_id"], since: 3 },
    StoreDef { name: "employees", kind: KeyKind::Document, indexes: &["branch_id"], since: 3 },
    StoreDef { name: "attendance_logs", kind: KeyKind::Document, indexes: &["branch_id", "date", "employee_id"], since: 3 },
];

/// Declares which JSON fields hold a reference into another store.
///
/// The synchronizer's remap step walks this table generically instead of
/// carrying one-off per-entity cascade code: after a create replays and the
/// temporary identifier is swapped for the server key, every (store, field)
/// pair here is rewritten in one pass.
#[derive(Debug, Clone, Copy)]
pub struct ForeignKey {
    pub store: &'static str,
    pub field: &'static str,
}

pub const FOREIGN_KEYS: &[ForeignKey] = &[
    ForeignKey { store: "products", field: "category_id" },
    ForeignKey { store: "sales_cache", field: "payment_method_id" },
    ForeignKey { store: "sales_local", field: "payment_method_id" },
    ForeignKey { store: "sale_items_cache", field: "sale_id" },
    ForeignKey { store: "sale_items_cache", field: "product_id" },
    ForeignKey { store: "sale_items_local", field: "sale_id" },
    ForeignKey { store: "sale_items_local", field: "product_id" },
    ForeignKey { store: "attendance_logs", field: "employee_id" },
    ForeignKey { store: "cash_expenses", field: "register_id" },
];

fn store_def(name: &str) -> Result<&'static StoreDef, StoreError> {
    STORES
        .iter()
        .find(|def| def.name == name)
        .ok_or_else(|| StoreError::UnknownStore(name.to_string()))
}

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

/// Shared handle to the local database. Constructed once per process and
/// passed by reference to the cache writers, queue, and synchronizer.
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (and migrate) the local database at `path`.
    ///
    /// Idempotent: re-opening an already-migrated database is a no-op.
    /// On open failure the file is deleted and the open retried once —
    /// losing the cache is acceptable, failing to start is not.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        info!("Opening local store at {}", path.display());

        let conn = match open_and_configure(path) {
            Ok(c) => c,
            Err(first_err) => {
                warn!("Local store open failed ({first_err}), deleting and retrying once");
                if path.exists() {
                    let _ = fs::remove_file(path);
                    let _ = fs::remove_file(path.with_extension("db-wal"));
                    let _ = fs::remove_file(path.with_extension("db-shm"));
                }
                open_and_configure(path)?
            }
        };

        run_migrations(&conn)?;
        Ok(LocalStore { conn: Mutex::new(conn) })
    }

    /// In-memory store with the full schema applied (tests, mostly).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        run_migrations(&conn)?;
        Ok(LocalStore { conn: Mutex::new(conn) })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }

    /// Upsert a document row by its `$.id` field. Returns the key written.
    pub fn put(&self, store: &str, row: &Value) -> Result<String, StoreError> {
        let def = store_def(store)?;
        debug_assert_eq!(def.kind, KeyKind::Document, "put targets document stores");
        if !row.is_object() {
            return Err(StoreError::NotAnObject);
        }
        let key = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or(StoreError::MissingKey)?
            .to_string();
        let data = serde_json::to_string(row)?;

        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO {store} (key, data) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET data = excluded.data"
                ),
                params![key, data],
            )?;
            Ok(())
        })?;
        Ok(key)
    }

    /// Insert a row into an append-keyed store. Returns the assigned key.
    pub fn append(&self, store: &str, row: &Value) -> Result<i64, StoreError> {
        let def = store_def(store)?;
        debug_assert_eq!(def.kind, KeyKind::Append, "append targets autoincrement stores");
        if !row.is_object() {
            return Err(StoreError::NotAnObject);
        }
        let data = serde_json::to_string(row)?;

        self.with_conn(|conn| {
            conn.execute(
                &format!("INSERT INTO {store} (data) VALUES (?1)"),
                params![data],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get(&self, store: &str, key: &str) -> Result<Option<Value>, StoreError> {
        store_def(store)?;
        let raw: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT data FROM {store} WHERE key = ?1"),
                    params![key],
                    |row| row.get(0),
                )
                .optional()?)
        })?;
        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    /// All rows of a store, in unspecified order. Callers sort in memory.
    pub fn get_all(&self, store: &str) -> Result<Vec<Value>, StoreError> {
        store_def(store)?;
        self.collect_rows(&format!("SELECT data FROM {store}"), &[])
    }

    /// Rows whose indexed JSON field equals `value`.
    pub fn get_all_by_index(
        &self,
        store: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let def = store_def(store)?;
        if !def.indexes.contains(&field) {
            return Err(StoreError::UnknownIndex {
                store: store.to_string(),
                field: field.to_string(),
            });
        }
        self.collect_rows(
            &format!("SELECT data FROM {store} WHERE json_extract(data, '$.{field}') = ?1"),
            &[value],
        )
    }

    /// Remove a row by key. Idempotent: absent keys are not an error.
    pub fn delete(&self, store: &str, key: &str) -> Result<(), StoreError> {
        store_def(store)?;
        self.with_conn(|conn| {
            conn.execute(&format!("DELETE FROM {store} WHERE key = ?1"), params![key])?;
            Ok(())
        })
    }

    /// Remove every row whose indexed field equals `value`. Returns the
    /// number of rows removed.
    pub fn delete_by_index(
        &self,
        store: &str,
        field: &str,
        value: &str,
    ) -> Result<usize, StoreError> {
        let def = store_def(store)?;
        if !def.indexes.contains(&field) {
            return Err(StoreError::UnknownIndex {
                store: store.to_string(),
                field: field.to_string(),
            });
        }
        self.with_conn(|conn| {
            Ok(conn.execute(
                &format!("DELETE FROM {store} WHERE json_extract(data, '$.{field}') = ?1"),
                params![value],
            )?)
        })
    }

    /// Rewrite every occurrence of `old` in a declared foreign-key field to
    /// `new`, in one statement. Only (store, field) pairs present in
    /// [`FOREIGN_KEYS`] are accepted.
    pub fn rewrite_foreign_key(
        &self,
        store: &str,
        field: &str,
        old: &str,
        new: &str,
    ) -> Result<usize, StoreError> {
        store_def(store)?;
        let declared = FOREIGN_KEYS
            .iter()
            .any(|fk| fk.store == store && fk.field == field);
        if !declared {
            return Err(StoreError::UnknownIndex {
                store: store.to_string(),
                field: field.to_string(),
            });
        }
        self.with_conn(|conn| {
            Ok(conn.execute(
                &format!(
                    "UPDATE {store}
                     SET data = json_set(data, '$.{field}', ?1)
                     WHERE json_extract(data, '$.{field}') = ?2"
                ),
                params![new, old],
            )?)
        })
    }

    /// Read-path helper: all rows, or empty when the store is unusable.
    /// Never fails. Degraded capability (a sqlite-level failure) warns;
    /// anything else is a caller bug and logs at error level.
    pub fn get_all_or_empty(&self, store: &str) -> Vec<Value> {
        match self.get_all(store) {
            Ok(rows) => rows,
            Err(err) if err.is_degraded_capability() => {
                warn!(store, error = %err, "Local store read failed; returning empty");
                Vec::new()
            }
            Err(err) => {
                error!(store, error = %err, "Local store misuse; returning empty");
                Vec::new()
            }
        }
    }

    /// Read-path helper mirroring `get_all_or_empty` for index lookups.
    pub fn get_all_by_index_or_empty(&self, store: &str, field: &str, value: &str) -> Vec<Value> {
        match self.get_all_by_index(store, field, value) {
            Ok(rows) => rows,
            Err(err) if err.is_degraded_capability() => {
                warn!(store, field, error = %err, "Local store index read failed; returning empty");
                Vec::new()
            }
            Err(err) => {
                error!(store, field, error = %err, "Local store misuse; returning empty");
                Vec::new()
            }
        }
    }

    fn collect_rows(&self, sql: &str, bind: &[&str]) -> Result<Vec<Value>, StoreError> {
        let texts: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(bind.iter()), |row| {
                row.get::<_, String>(0)
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })?;

        let mut values = Vec::with_capacity(texts.len());
        for text in texts {
            values.push(serde_json::from_str(&text)?);
        }
        Ok(values)
    }
}

// ---------------------------------------------------------------------------
// Open + migrations
// ---------------------------------------------------------------------------

fn open_and_configure(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating local store from v{current} to v{CURRENT_SCHEMA_VERSION}");

    for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
        migrate_step(conn, version)?;
        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![version],
        )?;
    }

    Ok(())
}

/// Apply one migration step: create the stores (and their indexes)
/// introduced at `version`, plus any step-specific tables.
fn migrate_step(conn: &Connection, version: i32) -> Result<(), StoreError> {
    for def in STORES.iter().filter(|def| def.since == version) {
        create_store(conn, def)?;
    }

    // v1 also creates the write-ahead mutation queue. It keeps typed
    // columns (not a JSON document) because the synchronizer queries and
    // mutates individual fields on every drain.
    if version == 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_sync (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_sync_status ON pending_sync(status);
            CREATE INDEX IF NOT EXISTS idx_pending_sync_created_at ON pending_sync(created_at);",
        )?;
    }

    Ok(())
}

fn create_store(conn: &Connection, def: &StoreDef) -> Result<(), StoreError> {
    let key_column = match def.kind {
        KeyKind::Document => "key TEXT PRIMARY KEY",
        KeyKind::Append => "key INTEGER PRIMARY KEY AUTOINCREMENT",
    };
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {name} ({key_column}, data TEXT NOT NULL);",
        name = def.name,
    ))?;

    for field in def.indexes {
        conn.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{name}_{field}
             ON {name} (json_extract(data, '$.{field}'));",
            name = def.name,
        ))?;
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
