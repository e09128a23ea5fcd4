// src/models/item.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Partition key prefix: one partition per tenant.
pub const TENANT_KEY_PREFIX: &str = "TENANT#";
/// Sort key prefix shared by every item record of a tenant.
pub const ITEM_KEY_PREFIX: &str = "ITEM#";

// ---
// 1. Category
// ---
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
pub enum ItemCategory {
    #[default]
    #[serde(rename = "ITEM_CATEGORY_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "ITEM_CATEGORY_ELECTRONICS")]
    Electronics,
    #[serde(rename = "ITEM_CATEGORY_CLOTHING")]
    Clothing,
    #[serde(rename = "ITEM_CATEGORY_BOOKS")]
    Books,
    #[serde(rename = "ITEM_CATEGORY_HOME")]
    Home,
    #[serde(rename = "ITEM_CATEGORY_SPORTS")]
    Sports,
}

impl ItemCategory {
    /// Number stored in the `Category` attribute.
    pub fn code(self) -> i32 {
        match self {
            ItemCategory::Unspecified => 0,
            ItemCategory::Electronics => 1,
            ItemCategory::Clothing => 2,
            ItemCategory::Books => 3,
            ItemCategory::Home => 4,
            ItemCategory::Sports => 5,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ItemCategory::Unspecified),
            1 => Some(ItemCategory::Electronics),
            2 => Some(ItemCategory::Clothing),
            3 => Some(ItemCategory::Books),
            4 => Some(ItemCategory::Home),
            5 => Some(ItemCategory::Sports),
            _ => None,
        }
    }

    /// `Unspecified` used as a filter matches everything.
    pub fn matches(self, other: ItemCategory) -> bool {
        self == ItemCategory::Unspecified || self == other
    }
}

// ---
// 2. Status
// ---
// Closed set, no transition table: any status may follow any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
pub enum ItemStatus {
    #[default]
    #[serde(rename = "ITEM_STATUS_UNSPECIFIED")]
    Unspecified,
    #[serde(rename = "ITEM_STATUS_ACTIVE")]
    Active,
    #[serde(rename = "ITEM_STATUS_INACTIVE")]
    Inactive,
    #[serde(rename = "ITEM_STATUS_OUT_OF_STOCK")]
    OutOfStock,
    #[serde(rename = "ITEM_STATUS_DISCONTINUED")]
    Discontinued,
}

impl ItemStatus {
    pub fn code(self) -> i32 {
        match self {
            ItemStatus::Unspecified => 0,
            ItemStatus::Active => 1,
            ItemStatus::Inactive => 2,
            ItemStatus::OutOfStock => 3,
            ItemStatus::Discontinued => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ItemStatus::Unspecified),
            1 => Some(ItemStatus::Active),
            2 => Some(ItemStatus::Inactive),
            3 => Some(ItemStatus::OutOfStock),
            4 => Some(ItemStatus::Discontinued),
            _ => None,
        }
    }

    pub fn matches(self, other: ItemStatus) -> bool {
        self == ItemStatus::Unspecified || self == other
    }
}

// ---
// 3. Item (what the RPC surface returns)
// ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    #[serde(rename = "id")]
    pub item_id: String,
    pub tenant_id: i64,
    pub name: String,
    pub description: String,
    #[schema(value_type = f64)]
    pub price: Decimal,
    pub category: ItemCategory,
    pub status: ItemStatus,
    pub sku: String,
    pub inventory_count: i32,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub updated_by: String,
}

// ---
// 4. Storage key
// ---
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub pk: String,
    pub sk: String,
}

impl ItemKey {
    pub fn new(tenant_id: i64, item_id: &str) -> Self {
        Self {
            pk: partition_key(tenant_id),
            sk: sort_key(item_id),
        }
    }
}

pub fn partition_key(tenant_id: i64) -> String {
    format!("{TENANT_KEY_PREFIX}{tenant_id}")
}

pub fn sort_key(item_id: &str) -> String {
    format!("{ITEM_KEY_PREFIX}{item_id}")
}

// ---
// 5. ItemRecord (the shape persisted in the backing table)
// ---
// Attribute names are shared by every backend, so a table written by one
// deployment stays readable by another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
    #[serde(rename = "ItemID")]
    pub item_id: String,
    #[serde(rename = "TenantID")]
    pub tenant_id: i64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description", default)]
    pub description: String,
    #[serde(rename = "Price")]
    pub price: Decimal,
    #[serde(rename = "Category")]
    pub category: i32,
    #[serde(rename = "Status")]
    pub status: i32,
    #[serde(rename = "SKU", default)]
    pub sku: String,
    #[serde(rename = "InventoryCount")]
    pub inventory_count: i32,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
    #[serde(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "UpdatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "CreatedBy", default)]
    pub created_by: String,
    #[serde(rename = "UpdatedBy", default)]
    pub updated_by: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unknown category code {0}")]
    UnknownCategory(i32),
    #[error("unknown status code {0}")]
    UnknownStatus(i32),
}

impl ItemRecord {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            pk: self.pk.clone(),
            sk: self.sk.clone(),
        }
    }
}

impl From<&Item> for ItemRecord {
    fn from(item: &Item) -> Self {
        let key = ItemKey::new(item.tenant_id, &item.item_id);
        Self {
            pk: key.pk,
            sk: key.sk,
            item_id: item.item_id.clone(),
            tenant_id: item.tenant_id,
            name: item.name.clone(),
            description: item.description.clone(),
            price: item.price,
            category: item.category.code(),
            status: item.status.code(),
            sku: item.sku.clone(),
            inventory_count: item.inventory_count,
            tags: item.tags.clone(),
            created_at: item.created_at,
            updated_at: item.updated_at,
            created_by: item.created_by.clone(),
            updated_by: item.updated_by.clone(),
        }
    }
}

impl TryFrom<ItemRecord> for Item {
    type Error = RecordError;

    fn try_from(record: ItemRecord) -> Result<Self, Self::Error> {
        let category = ItemCategory::from_code(record.category)
            .ok_or(RecordError::UnknownCategory(record.category))?;
        let status =
            ItemStatus::from_code(record.status).ok_or(RecordError::UnknownStatus(record.status))?;

        Ok(Self {
            item_id: record.item_id,
            tenant_id: record.tenant_id,
            name: record.name,
            description: record.description,
            price: record.price,
            category,
            status,
            sku: record.sku,
            inventory_count: record.inventory_count,
            tags: record.tags,
            created_at: record.created_at,
            updated_at: record.updated_at,
            created_by: record.created_by,
            updated_by: record.updated_by,
        })
    }
}

// ---
// 6. Store inputs and outputs
// ---
#[derive(Debug, Clone)]
pub struct NewItem {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: ItemCategory,
    pub sku: String,
    pub inventory_count: i32,
    pub tags: Vec<String>,
    pub created_by: String,
}

/// Full replacement of every mutable field. Fields the caller leaves out are
/// overwritten, so callers resend unchanged values.
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub category: ItemCategory,
    pub status: ItemStatus,
    pub sku: String,
    pub inventory_count: i32,
    pub tags: Vec<String>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub category: ItemCategory,
    pub status: ItemStatus,
    /// Accepted for wire compatibility, not applied.
    pub search_query: String,
    pub page_size: i32,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemPage {
    pub items: Vec<Item>,
    pub next_page_token: Option<String>,
    pub returned_count: i32,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InventoryAdjustment {
    pub item: Item,
    pub previous_count: i32,
}
