// src/db/pg_table.rs

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::db::table::{
    DecodeFailure, ItemChange, ItemTable, PageRequest, RawPage, TableError, count_bounds,
};
use crate::models::item::{ItemKey, ItemRecord};

/// The partition/sort-key layout on PostgreSQL: one row per record, the
/// attributes in a JSONB column.
#[derive(Clone)]
pub struct PgTable {
    pool: PgPool,
}

impl PgTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!().run(&self.pool).await
    }
}

fn classify(err: sqlx::Error) -> TableError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            TableError::Transient(err.to_string())
        }
        // serialization_failure, deadlock_detected
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) =>
        {
            TableError::Transient(err.to_string())
        }
        _ => TableError::Backend(err.to_string()),
    }
}

fn decode(attrs: Value) -> Result<ItemRecord, String> {
    serde_json::from_value(attrs).map_err(|e| e.to_string())
}

#[async_trait]
impl ItemTable for PgTable {
    #[tracing::instrument(skip(self, record), fields(sk = %record.sk))]
    async fn put(&self, record: &ItemRecord) -> Result<(), TableError> {
        sqlx::query(
            r#"
            INSERT INTO store_items (pk, sk, attrs)
            VALUES ($1, $2, $3)
            ON CONFLICT (pk, sk) DO UPDATE SET attrs = EXCLUDED.attrs
            "#,
        )
        .bind(&record.pk)
        .bind(&record.sk)
        .bind(Json(record))
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &ItemKey) -> Result<Option<ItemRecord>, TableError> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT attrs FROM store_items WHERE pk = $1 AND sk = $2")
                .bind(&key.pk)
                .bind(&key.sk)
                .fetch_optional(&self.pool)
                .await
                .map_err(classify)?;

        row.map(|(attrs,)| decode(attrs).map_err(TableError::Decode))
            .transpose()
    }

    #[tracing::instrument(skip(self, change))]
    async fn apply(&self, key: &ItemKey, change: &ItemChange) -> Result<ItemRecord, TableError> {
        let assignments: Map<String, Value> = change
            .assignments()?
            .into_iter()
            .map(|(attr, value)| (attr.to_string(), value))
            .collect();
        let delta = change.inventory_delta().map(i64::from);
        let (floor, ceiling) = change
            .inventory_delta()
            .map(count_bounds)
            .unwrap_or((0, i64::from(i32::MAX)));

        // The CTE locks the row and hands back its attributes as they were
        // before the update. No row returned means the condition failed.
        let row: Option<(Value,)> = sqlx::query_as(
            r#"
            WITH old AS (
                SELECT pk, sk, attrs FROM store_items
                WHERE pk = $1 AND sk = $2
                FOR UPDATE
            )
            UPDATE store_items AS s
            SET attrs = CASE
                    WHEN $4::bigint IS NULL THEN s.attrs || $3::jsonb
                    ELSE s.attrs || $3::jsonb || jsonb_build_object(
                        'InventoryCount', (s.attrs->>'InventoryCount')::bigint + $4::bigint
                    )
                END
            FROM old
            WHERE s.pk = old.pk AND s.sk = old.sk
              AND ($4::bigint IS NULL
                   OR (old.attrs->>'InventoryCount')::bigint BETWEEN $5 AND $6)
            RETURNING old.attrs
            "#,
        )
        .bind(&key.pk)
        .bind(&key.sk)
        .bind(Json(Value::Object(assignments)))
        .bind(delta)
        .bind(floor)
        .bind(ceiling)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        match row {
            Some((before,)) => decode(before).map_err(TableError::Decode),
            None => Err(TableError::ConditionFailed),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn query(&self, request: &PageRequest) -> Result<RawPage, TableError> {
        let limit = i64::from(request.limit.max(1));

        // One extra row tells whether the partition continues past this page.
        let mut rows: Vec<(String, Value)> = sqlx::query_as(
            r#"
            SELECT sk, attrs FROM store_items
            WHERE pk = $1
              AND starts_with(sk, $2)
              AND ($3::text IS NULL OR sk > $3)
            ORDER BY sk
            LIMIT $4
            "#,
        )
        .bind(&request.pk)
        .bind(&request.sk_prefix)
        .bind(request.exclusive_start.as_deref())
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        let more = rows.len() as i64 > limit;
        rows.truncate(limit as usize);
        let last_evaluated = if more {
            rows.last().map(|(sk, _)| sk.clone())
        } else {
            None
        };

        let rows = rows
            .into_iter()
            .map(|(sk, attrs)| {
                decode(attrs).map_err(|reason| DecodeFailure {
                    sk: Some(sk),
                    reason,
                })
            })
            .collect();

        Ok(RawPage {
            rows,
            last_evaluated,
        })
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}
