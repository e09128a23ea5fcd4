// src/db/memory_table.rs

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::RwLock;

use crate::db::table::{
    ATTR_INVENTORY, DecodeFailure, ItemChange, ItemTable, PageRequest, RawPage, TableError,
    adjusted_count,
};
use crate::models::item::{ItemKey, ItemRecord};

/// In-process table with the same key layout as the managed store. Rows are
/// kept as JSON documents so reads go through the same decode path as the
/// other backends.
#[derive(Debug, Default)]
pub struct MemoryTable {
    rows: RwLock<BTreeMap<ItemKey, Value>>,
    // Number of upcoming reads that fail with `TableError::Transient`.
    failing_reads: AtomicUsize,
}

impl MemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document as-is, without going through `ItemRecord`.
    pub async fn insert_raw(&self, key: ItemKey, document: Value) {
        self.rows.write().await.insert(key, document);
    }

    /// Makes the next `count` reads (`get` or `query`) fail transiently.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn injected_failure(&self) -> Result<(), TableError> {
        let consumed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(TableError::Transient("injected read failure".into())),
            Err(_) => Ok(()),
        }
    }
}

fn decode(document: &Value) -> Result<ItemRecord, String> {
    serde_json::from_value(document.clone()).map_err(|e| e.to_string())
}

#[async_trait]
impl ItemTable for MemoryTable {
    async fn put(&self, record: &ItemRecord) -> Result<(), TableError> {
        let document =
            serde_json::to_value(record).map_err(|e| TableError::Encode(e.to_string()))?;
        self.rows.write().await.insert(record.key(), document);
        Ok(())
    }

    async fn get(&self, key: &ItemKey) -> Result<Option<ItemRecord>, TableError> {
        self.injected_failure()?;
        let rows = self.rows.read().await;
        rows.get(key)
            .map(|document| decode(document).map_err(TableError::Decode))
            .transpose()
    }

    async fn apply(&self, key: &ItemKey, change: &ItemChange) -> Result<ItemRecord, TableError> {
        // Condition check and write under one lock.
        let mut rows = self.rows.write().await;
        let document = rows.get_mut(key).ok_or(TableError::ConditionFailed)?;
        let before = decode(document).map_err(TableError::Decode)?;

        if !change.permits(&before) {
            return Err(TableError::ConditionFailed);
        }

        let fields = document
            .as_object_mut()
            .ok_or_else(|| TableError::Decode("stored row is not an object".into()))?;
        for (attr, value) in change.assignments()? {
            fields.insert(attr.to_string(), value);
        }
        if let Some(delta) = change.inventory_delta() {
            let count = adjusted_count(before.inventory_count, delta)
                .ok_or(TableError::ConditionFailed)?;
            fields.insert(ATTR_INVENTORY.to_string(), json!(count));
        }

        Ok(before)
    }

    async fn query(&self, request: &PageRequest) -> Result<RawPage, TableError> {
        self.injected_failure()?;
        let rows = self.rows.read().await;

        let lower = match &request.exclusive_start {
            Some(sk) => Bound::Excluded(ItemKey {
                pk: request.pk.clone(),
                sk: sk.clone(),
            }),
            None => Bound::Included(ItemKey {
                pk: request.pk.clone(),
                sk: request.sk_prefix.clone(),
            }),
        };
        let limit = usize::try_from(request.limit.max(1)).unwrap_or(1);

        let mut matching = rows
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| key.pk == request.pk)
            .filter(|(key, _)| key.sk.starts_with(&request.sk_prefix))
            .peekable();

        let mut page = Vec::with_capacity(limit);
        let mut last_sk = None;
        while page.len() < limit {
            let Some((key, document)) = matching.next() else {
                break;
            };
            last_sk = Some(key.sk.clone());
            page.push(decode(document).map_err(|reason| DecodeFailure {
                sk: Some(key.sk.clone()),
                reason,
            }));
        }

        // Only report a resume point while rows remain.
        let last_evaluated = if matching.peek().is_some() { last_sk } else { None };

        Ok(RawPage {
            rows: page,
            last_evaluated,
        })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn record(tenant_id: i64, item_id: &str, count: i32) -> ItemRecord {
        let key = ItemKey::new(tenant_id, item_id);
        let now = Utc::now();
        ItemRecord {
            pk: key.pk,
            sk: key.sk,
            item_id: item_id.into(),
            tenant_id,
            name: format!("item {item_id}"),
            description: String::new(),
            price: Decimal::new(100, 2),
            category: 1,
            status: 1,
            sku: String::new(),
            inventory_count: count,
            tags: vec![],
            created_at: now,
            updated_at: now,
            created_by: "alice".into(),
            updated_by: "alice".into(),
        }
    }

    fn request(tenant_id: i64, limit: i32, start: Option<&str>) -> PageRequest {
        PageRequest {
            pk: format!("TENANT#{tenant_id}"),
            sk_prefix: "ITEM#".into(),
            limit,
            exclusive_start: start.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn query_stays_inside_the_partition() {
        let table = MemoryTable::new();
        table.put(&record(1, "a", 1)).await.unwrap();
        table.put(&record(2, "b", 1)).await.unwrap();
        table.put(&record(3, "c", 1)).await.unwrap();

        let page = table.query(&request(2, 10, None)).await.unwrap();
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].as_ref().unwrap().item_id, "b");
        assert_eq!(page.last_evaluated, None);
    }

    #[tokio::test]
    async fn query_reports_resume_point_only_while_rows_remain() {
        let table = MemoryTable::new();
        for id in ["a", "b", "c"] {
            table.put(&record(1, id, 1)).await.unwrap();
        }

        let first = table.query(&request(1, 2, None)).await.unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(first.last_evaluated.as_deref(), Some("ITEM#b"));

        let second = table
            .query(&request(1, 2, first.last_evaluated.as_deref()))
            .await
            .unwrap();
        assert_eq!(second.rows.len(), 1);
        assert_eq!(second.last_evaluated, None);
    }

    #[tokio::test]
    async fn corrupt_rows_come_back_as_decode_failures() {
        let table = MemoryTable::new();
        table.put(&record(1, "a", 1)).await.unwrap();
        table
            .insert_raw(ItemKey::new(1, "b"), json!({ "PK": "TENANT#1", "SK": "ITEM#b" }))
            .await;

        let page = table.query(&request(1, 10, None)).await.unwrap();
        assert!(page.rows[0].is_ok());
        let failure = page.rows[1].as_ref().unwrap_err();
        assert_eq!(failure.sk.as_deref(), Some("ITEM#b"));
    }

    #[tokio::test]
    async fn adjustment_below_zero_fails_and_writes_nothing() {
        let table = MemoryTable::new();
        let stored = record(1, "a", 3);
        table.put(&stored).await.unwrap();

        let change = ItemChange::AdjustInventory {
            delta: -4,
            updated_at: Utc::now(),
            updated_by: "bob".into(),
        };
        let err = table.apply(&stored.key(), &change).await.unwrap_err();
        assert!(matches!(err, TableError::ConditionFailed));

        let after = table.get(&stored.key()).await.unwrap().unwrap();
        assert_eq!(after, stored);
    }

    #[tokio::test]
    async fn apply_returns_state_before_change() {
        let table = MemoryTable::new();
        let stored = record(1, "a", 3);
        table.put(&stored).await.unwrap();

        let change = ItemChange::AdjustInventory {
            delta: 2,
            updated_at: Utc::now(),
            updated_by: "bob".into(),
        };
        let before = table.apply(&stored.key(), &change).await.unwrap();
        assert_eq!(before.inventory_count, 3);

        let after = table.get(&stored.key()).await.unwrap().unwrap();
        assert_eq!(after.inventory_count, 5);
        assert_eq!(after.updated_by, "bob");
    }

    #[tokio::test]
    async fn apply_on_missing_key_fails_condition() {
        let table = MemoryTable::new();
        let change = ItemChange::Discontinue {
            updated_at: Utc::now(),
        };
        let err = table.apply(&ItemKey::new(1, "nope"), &change).await.unwrap_err();
        assert!(matches!(err, TableError::ConditionFailed));
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn injected_failures_are_transient_and_run_out() {
        let table = MemoryTable::new();
        table.fail_next_reads(1);
        let key = ItemKey::new(1, "a");
        assert!(table.get(&key).await.unwrap_err().is_transient());
        assert!(table.get(&key).await.unwrap().is_none());
    }
}
