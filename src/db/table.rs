// src/db/table.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::item::{ItemKey, ItemRecord, ItemStatus};

// Attribute names touched by partial updates. Must match the serde renames
// on `ItemRecord`.
pub const ATTR_NAME: &str = "Name";
pub const ATTR_DESCRIPTION: &str = "Description";
pub const ATTR_PRICE: &str = "Price";
pub const ATTR_CATEGORY: &str = "Category";
pub const ATTR_STATUS: &str = "Status";
pub const ATTR_SKU: &str = "SKU";
pub const ATTR_INVENTORY: &str = "InventoryCount";
pub const ATTR_TAGS: &str = "Tags";
pub const ATTR_UPDATED_AT: &str = "UpdatedAt";
pub const ATTR_UPDATED_BY: &str = "UpdatedBy";

#[derive(Debug, Error)]
pub enum TableError {
    /// The change's condition did not hold: the record is missing, or an
    /// inventory adjustment would take the count out of range.
    #[error("conditional check failed")]
    ConditionFailed,

    /// Throttling, timeouts, exhausted pools. Safe to retry for reads.
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("failed to decode record: {0}")]
    Decode(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

impl TableError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TableError::Transient(_))
    }
}

/// Every mutable field of an item, written as a whole.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceFields {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: i32,
    pub status: i32,
    pub sku: String,
    pub inventory_count: i32,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

/// A typed update expression. Every change requires the record to exist;
/// `AdjustInventory` additionally requires `InventoryCount + delta` to stay
/// within `0..=i32::MAX`.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemChange {
    Replace(ReplaceFields),
    Discontinue {
        updated_at: DateTime<Utc>,
    },
    AdjustInventory {
        delta: i32,
        updated_at: DateTime<Utc>,
        updated_by: String,
    },
}

impl ItemChange {
    /// Attributes set outright, keyed by record attribute name.
    pub fn assignments(&self) -> Result<Vec<(&'static str, Value)>, TableError> {
        let assignments = match self {
            ItemChange::Replace(fields) => vec![
                (ATTR_NAME, json!(fields.name)),
                (ATTR_DESCRIPTION, json!(fields.description)),
                (ATTR_PRICE, encode(&fields.price)?),
                (ATTR_CATEGORY, json!(fields.category)),
                (ATTR_STATUS, json!(fields.status)),
                (ATTR_SKU, json!(fields.sku)),
                (ATTR_INVENTORY, json!(fields.inventory_count)),
                // Empty tags are written as an empty list, never dropped.
                (ATTR_TAGS, json!(fields.tags)),
                (ATTR_UPDATED_AT, encode(&fields.updated_at)?),
                (ATTR_UPDATED_BY, json!(fields.updated_by)),
            ],
            ItemChange::Discontinue { updated_at } => vec![
                (ATTR_STATUS, json!(ItemStatus::Discontinued.code())),
                (ATTR_UPDATED_AT, encode(updated_at)?),
            ],
            ItemChange::AdjustInventory {
                updated_at,
                updated_by,
                ..
            } => vec![
                (ATTR_UPDATED_AT, encode(updated_at)?),
                (ATTR_UPDATED_BY, json!(updated_by)),
            ],
        };
        Ok(assignments)
    }

    /// Server-side increment of `InventoryCount`, if any.
    pub fn inventory_delta(&self) -> Option<i32> {
        match self {
            ItemChange::AdjustInventory { delta, .. } => Some(*delta),
            _ => None,
        }
    }

    /// Whether the condition attached to this change holds for `record`.
    pub fn permits(&self, record: &ItemRecord) -> bool {
        match self.inventory_delta() {
            Some(delta) => adjusted_count(record.inventory_count, delta).is_some(),
            None => true,
        }
    }
}

/// `count + delta` when the result is a valid stored count.
pub fn adjusted_count(count: i32, delta: i32) -> Option<i32> {
    count.checked_add(delta).filter(|next| *next >= 0)
}

/// Bounds the current count must satisfy for `delta` to apply, as
/// `(floor, ceiling)` in i64 so the extremes of i32 negate cleanly.
pub fn count_bounds(delta: i32) -> (i64, i64) {
    let delta = i64::from(delta);
    (0i64.max(-delta), i64::from(i32::MAX) - 0i64.max(delta))
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Value, TableError> {
    serde_json::to_value(value).map_err(|e| TableError::Encode(e.to_string()))
}

/// One range read over a single partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub pk: String,
    pub sk_prefix: String,
    pub limit: i32,
    /// Sort key to resume after (exclusive).
    pub exclusive_start: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    pub sk: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RawPage {
    pub rows: Vec<Result<ItemRecord, DecodeFailure>>,
    /// Sort key of the last row evaluated, present while the backend
    /// reports more rows may follow.
    pub last_evaluated: Option<String>,
}

/// The partition/sort-key table behind the item store.
#[async_trait]
pub trait ItemTable: Send + Sync {
    /// Unconditional insert or overwrite.
    async fn put(&self, record: &ItemRecord) -> Result<(), TableError>;

    async fn get(&self, key: &ItemKey) -> Result<Option<ItemRecord>, TableError>;

    /// Applies `change` atomically with its condition and returns the record
    /// as it was before the change.
    async fn apply(&self, key: &ItemKey, change: &ItemChange) -> Result<ItemRecord, TableError>;

    async fn query(&self, request: &PageRequest) -> Result<RawPage, TableError>;

    /// Backend name for logs.
    fn backend(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(count: i32) -> ItemRecord {
        let now = Utc::now();
        ItemRecord {
            pk: "TENANT#1".into(),
            sk: "ITEM#a".into(),
            item_id: "a".into(),
            tenant_id: 1,
            name: "n".into(),
            description: String::new(),
            price: Decimal::ZERO,
            category: 0,
            status: 1,
            sku: String::new(),
            inventory_count: count,
            tags: vec![],
            created_at: now,
            updated_at: now,
            created_by: String::new(),
            updated_by: String::new(),
        }
    }

    #[test]
    fn adjustment_permitted_only_down_to_zero() {
        let change = |delta| ItemChange::AdjustInventory {
            delta,
            updated_at: Utc::now(),
            updated_by: "bob".into(),
        };
        assert!(change(-10).permits(&record(10)));
        assert!(!change(-11).permits(&record(10)));
        assert!(!change(i32::MIN).permits(&record(i32::MAX)));
        assert!(!change(1).permits(&record(i32::MAX)));
    }

    #[test]
    fn bounds_cover_both_directions() {
        assert_eq!(count_bounds(-15), (15, i64::from(i32::MAX)));
        assert_eq!(count_bounds(5), (0, i64::from(i32::MAX) - 5));
        assert_eq!(count_bounds(0), (0, i64::from(i32::MAX)));
        assert_eq!(count_bounds(i32::MIN), (2_147_483_648, i64::from(i32::MAX)));
    }

    #[test]
    fn replace_writes_empty_tags_as_empty_list() {
        let change = ItemChange::Replace(ReplaceFields {
            name: "n".into(),
            description: String::new(),
            price: Decimal::new(5, 0),
            category: 1,
            status: 2,
            sku: String::new(),
            inventory_count: 0,
            tags: vec![],
            updated_at: Utc::now(),
            updated_by: "bob".into(),
        });
        let assignments = change.assignments().unwrap();
        let tags = assignments.iter().find(|(attr, _)| *attr == ATTR_TAGS).unwrap();
        assert_eq!(tags.1, json!([]));
        assert!(change.permits(&record(0)));
    }

    #[test]
    fn discontinue_sets_status_code() {
        let change = ItemChange::Discontinue { updated_at: Utc::now() };
        let assignments = change.assignments().unwrap();
        assert_eq!(assignments[0], (ATTR_STATUS, json!(4)));
        assert_eq!(change.inventory_delta(), None);
    }
}
