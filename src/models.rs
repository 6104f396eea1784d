//! Typed domain entities mirrored from the hosted backend.
//!
//! Field layouts match the backend tables 1:1 (denormalized foreign keys by
//! value, no referential integrity in the local store). Keys that can point
//! at rows created offline are [`RecordId`]-typed so the synchronizer's remap
//! step can find and rewrite them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::RecordId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub price: f64,
    #[serde(default)]
    pub stock_quantity: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: RecordId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: RecordId,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: RecordId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: RecordId,
    pub branch_id: String,
    pub full_name: String,
    pub role: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// One attendance row per employee per day. `date` is a calendar date string
/// (`YYYY-MM-DD`) because that is how the backend keys its attendance index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceLog {
    pub id: RecordId,
    pub employee_id: RecordId,
    pub branch_id: String,
    pub date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_in: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_out: Option<DateTime<Utc>>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashRegister {
    pub id: RecordId,
    pub branch_id: String,
    pub opened_at: DateTime<Utc>,
    pub opening_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_amount: Option<f64>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashExpense {
    pub id: RecordId,
    pub branch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register_id: Option<RecordId>,
    pub description: String,
    pub amount: f64,
    pub created_at: DateTime<Utc>,
}

/// Sale header. Line items live in their own store, keyed by `sale_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub id: RecordId,
    pub branch_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    pub total: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<RecordId>,
    pub created_at: DateTime<Utc>,
}

/// Sale line: a catalog product or a custom line (`product_id` absent).
///
/// Carries no identifier of its own — lines are only ever read back by
/// parent-sale lookup, so the local store assigns a throwaway key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleItem {
    pub sale_id: RecordId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
}

/// Nested sale payload as fetched from (or replayed to) the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleWithItems {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_serializes_foreign_key_as_tagged_string() {
        let product = Product {
            id: RecordId::remote("p1"),
            name: "Cola".into(),
            barcode: None,
            price: 1.5,
            stock_quantity: 24,
            category_id: Some(RecordId::Local("c9".into())),
            branch_id: Some("b1".into()),
            image_url: None,
            created_at: "2026-03-01T10:00:00Z".parse().unwrap(),
        };

        let value = serde_json::to_value(&product).unwrap();
        assert_eq!(value["id"], "p1");
        assert_eq!(value["category_id"], "local-c9");
        // Absent optionals stay off the wire
        assert!(value.get("barcode").is_none());
    }

    #[test]
    fn test_remote_row_deserializes_with_missing_optionals() {
        let raw = serde_json::json!({
            "id": "e1",
            "branch_id": "b1",
            "full_name": "Sam Reyes",
            "role": "cashier"
        });
        let employee: Employee = serde_json::from_value(raw).unwrap();
        assert!(employee.is_active, "is_active defaults to true");
        assert_eq!(employee.id, RecordId::remote("e1"));
    }
}
