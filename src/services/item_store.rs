// src/services/item_store.rs

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::{
    common::{
        clock::{Clock, SystemClock},
        error::StoreError,
        ids::{IdGenerator, UuidGenerator},
        page_token,
        retry::RetryPolicy,
    },
    db::{
        ItemChange, ItemTable, PageRequest, TableError,
        table::{ReplaceFields, adjusted_count},
    },
    models::item::{
        ITEM_KEY_PREFIX, InventoryAdjustment, Item, ItemKey, ItemPage, ItemStatus, ItemUpdate,
        ListQuery, NewItem, partition_key,
    },
};

pub const DEFAULT_PAGE_SIZE: i32 = 100;
pub const MAX_PAGE_SIZE: i32 = 1000;

// Conditional adjustments that lose a race against another writer are
// attempted again this many times in total.
const ADJUST_ATTEMPTS: u32 = 3;

/// `<= 0` falls back to the default, anything above the maximum is capped.
pub fn normalize_page_size(page_size: i32) -> i32 {
    if page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.min(MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ListConfig {
    /// Raw table pages a single listing may read while filling one page.
    pub max_scan_pages: u32,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self { max_scan_pages: 10 }
    }
}

fn infrastructure(
    operation: &'static str,
    tenant_id: i64,
    item_id: &str,
) -> impl FnOnce(TableError) -> StoreError {
    let item_id = item_id.to_owned();
    move |source| StoreError::Infrastructure {
        operation,
        tenant_id,
        item_id,
        source,
    }
}

fn not_found(tenant_id: i64, item_id: &str) -> StoreError {
    tracing::warn!(tenant_id, item_id, "item not found");
    StoreError::ItemNotFound {
        tenant_id,
        item_id: item_id.to_owned(),
    }
}

fn check_fields(name: &str, price: Decimal, inventory_count: i32) -> Result<(), StoreError> {
    if name.trim().is_empty() {
        return Err(StoreError::InvalidInput("name is required".into()));
    }
    if price.is_sign_negative() && !price.is_zero() {
        return Err(StoreError::InvalidInput("price cannot be negative".into()));
    }
    if inventory_count < 0 {
        return Err(StoreError::InvalidInput(
            "inventory_count cannot be negative".into(),
        ));
    }
    Ok(())
}

/// Tenant-scoped item CRUD over a partition/sort-key table.
#[derive(Clone)]
pub struct ItemStore {
    table: Arc<dyn ItemTable>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    list: ListConfig,
    retry: RetryPolicy,
}

impl ItemStore {
    pub fn new(table: Arc<dyn ItemTable>) -> Self {
        Self {
            table,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            list: ListConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_list_config(mut self, list: ListConfig) -> Self {
        self.list = list;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn backend(&self) -> &'static str {
        self.table.backend()
    }

    // --- CREATE ---
    #[tracing::instrument(skip(self, new_item))]
    pub async fn create_item(&self, tenant_id: i64, new_item: NewItem) -> Result<Item, StoreError> {
        check_fields(&new_item.name, new_item.price, new_item.inventory_count)?;

        let now = self.clock.now();
        let item = Item {
            item_id: self.ids.next_id(),
            tenant_id,
            name: new_item.name,
            description: new_item.description,
            price: new_item.price,
            category: new_item.category,
            status: ItemStatus::Active,
            sku: new_item.sku,
            inventory_count: new_item.inventory_count,
            tags: new_item.tags,
            created_at: now,
            updated_at: now,
            updated_by: new_item.created_by.clone(),
            created_by: new_item.created_by,
        };

        self.table
            .put(&(&item).into())
            .await
            .map_err(infrastructure("create_item", tenant_id, &item.item_id))?;

        tracing::info!(item_id = %item.item_id, "item created");
        Ok(item)
    }

    // --- READ ---
    #[tracing::instrument(skip(self))]
    pub async fn get_item(&self, tenant_id: i64, item_id: &str) -> Result<Item, StoreError> {
        let key = ItemKey::new(tenant_id, item_id);
        let record = self
            .retry
            .run("get_item", || self.table.get(&key))
            .await
            .map_err(infrastructure("get_item", tenant_id, item_id))?
            .ok_or_else(|| not_found(tenant_id, item_id))?;

        let item = Item::try_from(record).map_err(|e| {
            infrastructure("get_item", tenant_id, item_id)(TableError::Decode(e.to_string()))
        })?;

        tracing::debug!("item retrieved");
        Ok(item)
    }

    // --- UPDATE (full replace) ---
    #[tracing::instrument(skip(self, update))]
    pub async fn update_item(
        &self,
        tenant_id: i64,
        item_id: &str,
        update: ItemUpdate,
    ) -> Result<Item, StoreError> {
        check_fields(&update.name, update.price, update.inventory_count)?;

        let change = ItemChange::Replace(ReplaceFields {
            name: update.name,
            description: update.description,
            price: update.price,
            category: update.category.code(),
            status: update.status.code(),
            sku: update.sku,
            inventory_count: update.inventory_count,
            tags: update.tags,
            updated_at: self.clock.now(),
            updated_by: update.updated_by,
        });

        self.apply_existing("update_item", tenant_id, item_id, &change)
            .await?;
        tracing::info!("item updated");

        self.get_item(tenant_id, item_id).await
    }

    // --- DELETE (soft) ---
    #[tracing::instrument(skip(self))]
    pub async fn delete_item(&self, tenant_id: i64, item_id: &str) -> Result<(), StoreError> {
        let change = ItemChange::Discontinue {
            updated_at: self.clock.now(),
        };
        self.apply_existing("delete_item", tenant_id, item_id, &change)
            .await?;

        tracing::info!("item discontinued");
        Ok(())
    }

    async fn apply_existing(
        &self,
        operation: &'static str,
        tenant_id: i64,
        item_id: &str,
        change: &ItemChange,
    ) -> Result<(), StoreError> {
        let key = ItemKey::new(tenant_id, item_id);
        match self.table.apply(&key, change).await {
            Ok(_) => Ok(()),
            Err(TableError::ConditionFailed) => Err(not_found(tenant_id, item_id)),
            Err(err) => Err(infrastructure(operation, tenant_id, item_id)(err)),
        }
    }

    // --- LIST ---
    /// Reads raw table pages until `page_size` items match the filters, the
    /// partition runs out, or the scan budget is spent. The returned token
    /// resumes right after the last record evaluated for this page.
    #[tracing::instrument(skip(self, query))]
    pub async fn list_items(&self, tenant_id: i64, query: ListQuery) -> Result<ItemPage, StoreError> {
        let page_size = normalize_page_size(query.page_size);
        if !query.search_query.is_empty() {
            tracing::debug!(search_query = %query.search_query, "search query is not applied");
        }

        let mut start = match query.page_token.as_deref() {
            Some(token) if !token.is_empty() => Some(
                page_token::decode(token, tenant_id).map_err(|e| {
                    StoreError::InvalidInput(format!("invalid page token: {e}"))
                })?,
            ),
            _ => None,
        };

        let wanted = usize::try_from(page_size).unwrap_or(1);
        let mut items = Vec::with_capacity(wanted);
        let mut resume_after = None;

        for _ in 0..self.list.max_scan_pages.max(1) {
            let request = PageRequest {
                pk: partition_key(tenant_id),
                sk_prefix: ITEM_KEY_PREFIX.to_string(),
                limit: page_size,
                exclusive_start: start.clone(),
            };
            let raw = self
                .retry
                .run("list_items", || self.table.query(&request))
                .await
                .map_err(infrastructure("list_items", tenant_id, ""))?;

            let mut rows = raw.rows.into_iter();
            let mut filled_at = None;
            for row in rows.by_ref() {
                let record = match row {
                    Ok(record) => record,
                    Err(failure) => {
                        tracing::warn!(sk = ?failure.sk, reason = %failure.reason, "skipping undecodable item record");
                        continue;
                    }
                };
                let sk = record.sk.clone();
                let item = match Item::try_from(record) {
                    Ok(item) => item,
                    Err(err) => {
                        tracing::warn!(sk = %sk, reason = %err, "skipping undecodable item record");
                        continue;
                    }
                };

                if query.category.matches(item.category) && query.status.matches(item.status) {
                    items.push(item);
                    if items.len() == wanted {
                        filled_at = Some(sk);
                        break;
                    }
                }
            }

            if let Some(sk) = filled_at {
                let more = !rows.as_slice().is_empty() || raw.last_evaluated.is_some();
                resume_after = more.then_some(sk);
                break;
            }

            match raw.last_evaluated {
                Some(sk) => {
                    start = Some(sk.clone());
                    resume_after = Some(sk);
                }
                None => {
                    resume_after = None;
                    break;
                }
            }
        }

        let next_page_token = resume_after.map(|sk| page_token::encode(tenant_id, &sk));
        let returned_count = i32::try_from(items.len()).unwrap_or(i32::MAX);
        tracing::debug!(returned_count, has_more = next_page_token.is_some(), "items listed");

        Ok(ItemPage {
            has_more: next_page_token.is_some(),
            items,
            next_page_token,
            returned_count,
        })
    }

    // --- INVENTORY ---
    /// Adds `quantity_change` to the stored count in one conditional write.
    /// Fails with `InsufficientInventory` (carrying the current count) when
    /// the result would be negative, and writes nothing in that case.
    #[tracing::instrument(skip(self, updated_by))]
    pub async fn update_inventory(
        &self,
        tenant_id: i64,
        item_id: &str,
        quantity_change: i32,
        reason: &str,
        updated_by: &str,
    ) -> Result<InventoryAdjustment, StoreError> {
        let key = ItemKey::new(tenant_id, item_id);

        let mut attempt = 1;
        let previous_count = loop {
            let change = ItemChange::AdjustInventory {
                delta: quantity_change,
                updated_at: self.clock.now(),
                updated_by: updated_by.to_owned(),
            };

            match self.table.apply(&key, &change).await {
                Ok(before) => break before.inventory_count,
                Err(TableError::ConditionFailed) => {}
                Err(err) => {
                    return Err(infrastructure("update_inventory", tenant_id, item_id)(err));
                }
            }

            // The condition failed: find out whether the item is missing or
            // the count is out of range.
            let current = self.get_item(tenant_id, item_id).await?.inventory_count;
            let next = i64::from(current) + i64::from(quantity_change);
            if next > i64::from(i32::MAX) {
                return Err(StoreError::InvalidInput(format!(
                    "inventory count would overflow: current {current}, change {quantity_change}"
                )));
            }
            if adjusted_count(current, quantity_change).is_none() {
                tracing::warn!(
                    previous_count = current,
                    reason,
                    "insufficient inventory"
                );
                return Err(StoreError::InsufficientInventory {
                    previous_count: current,
                    quantity_change,
                });
            }
            // Another writer moved the count in between; the change fits now.
            if attempt >= ADJUST_ATTEMPTS {
                tracing::warn!(attempts = attempt, "inventory adjustment kept losing to concurrent writes");
                return Err(StoreError::Contention {
                    tenant_id,
                    item_id: item_id.to_owned(),
                    attempts: attempt,
                });
            }
            attempt += 1;
        };

        let item = self.get_item(tenant_id, item_id).await?;
        tracing::info!(
            previous_count,
            new_count = item.inventory_count,
            reason,
            "inventory updated"
        );

        Ok(InventoryAdjustment {
            item,
            previous_count,
        })
    }
}
