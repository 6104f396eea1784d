//! Remote store contract and its HTTP implementation.
//!
//! The hosted backend exposes table-style CRUD (`/rest/<table>`) returning a
//! representation on insert/update, plus one remote-procedure call
//! (`/rpc/apply_sale_stock`) for atomic stock decrement at sale time. The
//! synchronizer only ever talks to the [`RemoteStore`] trait so tests can
//! substitute an in-memory remote with scripted failures.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::RemoteError;

/// Default timeout for backend requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// One line of the atomic stock decrement RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub product_id: String,
    pub quantity: f64,
}

/// Table-style CRUD plus the stock RPC, as consumed by the synchronizer and
/// (for live writes) by feature modules.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert a row; returns the server representation (with the
    /// server-assigned identifier).
    async fn insert(&self, table: &str, row: &Value) -> Result<Value, RemoteError>;

    /// Update the row keyed by `key`; returns the server representation.
    async fn update(&self, table: &str, key: &str, row: &Value) -> Result<Value, RemoteError>;

    async fn delete(&self, table: &str, key: &str) -> Result<(), RemoteError>;

    async fn select(&self, table: &str) -> Result<Vec<Value>, RemoteError>;

    /// Atomically decrement stock for the given lines at `branch_id`.
    async fn apply_sale_stock(
        &self,
        branch_id: &str,
        items: &[StockAdjustment],
    ) -> Result<(), RemoteError>;
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "terminal not authorized".to_string(),
        404 => "backend endpoint not found".to_string(),
        s if s >= 500 => format!("backend server error (HTTP {s})"),
        s => format!("unexpected response from backend (HTTP {s})"),
    }
}

/// Pull a useful message out of an error body, falling back to the status
/// mapping. Validation details matter: they end up on the queue row as
/// `last_error` and are the only diagnostic for a stuck mutation.
fn error_detail(status: StatusCode, body: &str) -> RemoteError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .or_else(|| json.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| status_error(status));
    RemoteError::Status {
        status: status.as_u16(),
        message,
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

pub struct HttpRemote {
    client: Client,
    config: RemoteConfig,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(HttpRemote { client, config })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/{table}", self.config.base_url)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<(StatusCode, String), RemoteError> {
        let resp = req
            .header("X-Api-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| RemoteError::from_transport(&self.config.base_url, &e))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(error_detail(status, &body));
        }
        Ok((status, body))
    }

    /// Insert/update responses arrive either as a bare object or as a
    /// one-element array (return=representation style).
    fn representation(body: &str) -> Result<Value, RemoteError> {
        let parsed: Value = serde_json::from_str(body)
            .map_err(|e| RemoteError::BadResponse(format!("invalid JSON: {e}")))?;
        match parsed {
            Value::Array(mut rows) if !rows.is_empty() => Ok(rows.remove(0)),
            Value::Object(_) => Ok(parsed),
            other => Err(RemoteError::BadResponse(format!(
                "expected row representation, got {other}"
            ))),
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn insert(&self, table: &str, row: &Value) -> Result<Value, RemoteError> {
        debug!(table, "remote insert");
        let req = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(row);
        let (_, body) = self.send(req).await?;
        Self::representation(&body)
    }

    async fn update(&self, table: &str, key: &str, row: &Value) -> Result<Value, RemoteError> {
        debug!(table, key, "remote update");
        let req = self
            .client
            .patch(format!("{}?id=eq.{key}", self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(row);
        let (_, body) = self.send(req).await?;
        Self::representation(&body)
    }

    async fn delete(&self, table: &str, key: &str) -> Result<(), RemoteError> {
        debug!(table, key, "remote delete");
        let req = self
            .client
            .delete(format!("{}?id=eq.{key}", self.table_url(table)));
        self.send(req).await?;
        Ok(())
    }

    async fn select(&self, table: &str) -> Result<Vec<Value>, RemoteError> {
        let req = self.client.get(self.table_url(table));
        let (_, body) = self.send(req).await?;
        let parsed: Value = serde_json::from_str(&body)
            .map_err(|e| RemoteError::BadResponse(format!("invalid JSON: {e}")))?;
        match parsed {
            Value::Array(rows) => Ok(rows),
            other => Err(RemoteError::BadResponse(format!(
                "expected row array, got {other}"
            ))),
        }
    }

    async fn apply_sale_stock(
        &self,
        branch_id: &str,
        items: &[StockAdjustment],
    ) -> Result<(), RemoteError> {
        debug!(branch_id, lines = items.len(), "remote stock decrement");
        let req = self
            .client
            .post(format!("{}/rpc/apply_sale_stock", self.config.base_url))
            .json(&serde_json::json!({
                "branch_id": branch_id,
                "items": items,
            }));
        self.send(req).await?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
