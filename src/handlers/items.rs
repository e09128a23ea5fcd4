// src/handlers/items.rs

use std::{future::Future, time::Instant};

use axum::extract::State;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::{
    common::{
        error::{AppResult, StoreError},
        extract::RpcJson,
    },
    config::AppState,
    middleware::CanaryContext,
    models::item::{Item, ItemCategory, ItemStatus, ItemUpdate, ListQuery, NewItem},
    telemetry::MetricsSink,
};

pub const SERVICE_PREFIX: &str = "/store.v1.StoreService";

// ---
// Custom validation
// ---
fn validate_not_negative(val: &Decimal) -> Result<(), ValidationError> {
    if val.is_sign_negative() && !val.is_zero() {
        let mut err = ValidationError::new("range");
        err.add_param("min".into(), &0.0);
        err.message = Some("price cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Times one store call and records it under `operation`.
async fn observe<T, F>(metrics: &dyn MetricsSink, operation: &'static str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let started = Instant::now();
    let result = call.await;
    let elapsed = started.elapsed();
    match &result {
        Ok(_) => metrics.record_success(operation, elapsed),
        Err(_) => metrics.record_error(operation, elapsed),
    }
    tracing::debug!(
        operation,
        duration_ms = elapsed.as_millis() as u64,
        ok = result.is_ok(),
        "store call finished"
    );
    result
}

// ---
// Payloads: CreateItem
// ---
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateItemRequest {
    #[validate(range(min = 1, message = "tenant_id must be positive"))]
    pub tenant_id: i64,

    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,

    pub description: String,

    #[validate(custom(function = "validate_not_negative"))]
    #[schema(value_type = f64)]
    pub price: Decimal,

    pub category: ItemCategory,

    pub sku: String,

    #[validate(range(min = 0, message = "inventory_count cannot be negative"))]
    pub inventory_count: i32,

    pub tags: Vec<String>,

    pub created_by: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateItemResponse {
    pub item: Item,
}

#[utoipa::path(
    post,
    path = "/store.v1.StoreService/CreateItem",
    tag = "StoreService",
    request_body = CreateItemRequest,
    responses(
        (status = 200, description = "Item created, status ACTIVE", body = CreateItemResponse),
        (status = 400, description = "INVALID_ARGUMENT"),
        (status = 500, description = "INTERNAL"),
        (status = 504, description = "DEADLINE_EXCEEDED")
    )
)]
pub async fn create_item(
    State(state): State<AppState>,
    canary: CanaryContext,
    RpcJson(req): RpcJson<CreateItemRequest>,
) -> AppResult<RpcJson<CreateItemResponse>> {
    req.validate()?;

    let tenant_id = req.tenant_id;
    let new_item = NewItem {
        name: req.name,
        description: req.description,
        price: req.price,
        category: req.category,
        sku: req.sku,
        inventory_count: req.inventory_count,
        tags: req.tags,
        created_by: req.created_by,
    };

    let item = observe(
        state.metrics.as_ref(),
        "create",
        state.store.create_item(tenant_id, new_item),
    )
    .await?;

    tracing::info!(
        tenant_id,
        item_id = %item.item_id,
        canary = ?canary.0,
        "item created via rpc"
    );
    Ok(RpcJson(CreateItemResponse { item }))
}

// ---
// Payloads: GetItem
// ---
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct GetItemRequest {
    #[validate(range(min = 1, message = "tenant_id must be positive"))]
    pub tenant_id: i64,

    #[validate(length(min = 1, message = "id is required"))]
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GetItemResponse {
    pub item: Item,
}

#[utoipa::path(
    post,
    path = "/store.v1.StoreService/GetItem",
    tag = "StoreService",
    request_body = GetItemRequest,
    responses(
        (status = 200, description = "Item found (soft-deleted items included)", body = GetItemResponse),
        (status = 400, description = "INVALID_ARGUMENT"),
        (status = 404, description = "NOT_FOUND"),
        (status = 500, description = "INTERNAL"),
        (status = 504, description = "DEADLINE_EXCEEDED")
    )
)]
pub async fn get_item(
    State(state): State<AppState>,
    RpcJson(req): RpcJson<GetItemRequest>,
) -> AppResult<RpcJson<GetItemResponse>> {
    req.validate()?;

    let item = observe(
        state.metrics.as_ref(),
        "get",
        state.store.get_item(req.tenant_id, &req.id),
    )
    .await?;

    Ok(RpcJson(GetItemResponse { item }))
}

// ---
// Payloads: UpdateItem
// ---
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateItemRequest {
    #[validate(range(min = 1, message = "tenant_id must be positive"))]
    pub tenant_id: i64,

    #[validate(length(min = 1, message = "id is required"))]
    pub id: String,

    #[validate(length(min = 1, message = "name is required"))]
    pub name: String,

    pub description: String,

    #[validate(custom(function = "validate_not_negative"))]
    #[schema(value_type = f64)]
    pub price: Decimal,

    pub category: ItemCategory,

    pub status: ItemStatus,

    pub sku: String,

    #[validate(range(min = 0, message = "inventory_count cannot be negative"))]
    pub inventory_count: i32,

    pub tags: Vec<String>,

    pub updated_by: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateItemResponse {
    pub item: Item,
}

#[utoipa::path(
    post,
    path = "/store.v1.StoreService/UpdateItem",
    tag = "StoreService",
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Every mutable field replaced", body = UpdateItemResponse),
        (status = 400, description = "INVALID_ARGUMENT"),
        (status = 404, description = "NOT_FOUND"),
        (status = 500, description = "INTERNAL"),
        (status = 504, description = "DEADLINE_EXCEEDED")
    )
)]
pub async fn update_item(
    State(state): State<AppState>,
    RpcJson(req): RpcJson<UpdateItemRequest>,
) -> AppResult<RpcJson<UpdateItemResponse>> {
    req.validate()?;

    let update = ItemUpdate {
        name: req.name,
        description: req.description,
        price: req.price,
        category: req.category,
        status: req.status,
        sku: req.sku,
        inventory_count: req.inventory_count,
        tags: req.tags,
        updated_by: req.updated_by,
    };

    let item = observe(
        state.metrics.as_ref(),
        "update",
        state.store.update_item(req.tenant_id, &req.id, update),
    )
    .await?;

    Ok(RpcJson(UpdateItemResponse { item }))
}

// ---
// Payloads: DeleteItem
// ---
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteItemRequest {
    #[validate(range(min = 1, message = "tenant_id must be positive"))]
    pub tenant_id: i64,

    #[validate(length(min = 1, message = "id is required"))]
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeleteItemResponse {
    pub success: bool,
}

#[utoipa::path(
    post,
    path = "/store.v1.StoreService/DeleteItem",
    tag = "StoreService",
    request_body = DeleteItemRequest,
    responses(
        (status = 200, description = "Item marked DISCONTINUED", body = DeleteItemResponse),
        (status = 400, description = "INVALID_ARGUMENT"),
        (status = 404, description = "NOT_FOUND"),
        (status = 500, description = "INTERNAL"),
        (status = 504, description = "DEADLINE_EXCEEDED")
    )
)]
pub async fn delete_item(
    State(state): State<AppState>,
    RpcJson(req): RpcJson<DeleteItemRequest>,
) -> AppResult<RpcJson<DeleteItemResponse>> {
    req.validate()?;

    observe(
        state.metrics.as_ref(),
        "delete",
        state.store.delete_item(req.tenant_id, &req.id),
    )
    .await?;

    Ok(RpcJson(DeleteItemResponse { success: true }))
}

// ---
// Payloads: ListItems
// ---
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct ListItemsRequest {
    #[validate(range(min = 1, message = "tenant_id must be positive"))]
    pub tenant_id: i64,

    /// `ITEM_CATEGORY_UNSPECIFIED` lists every category.
    pub category: ItemCategory,

    /// `ITEM_STATUS_UNSPECIFIED` lists every status.
    pub status: ItemStatus,

    pub search_query: String,

    /// Values ≤ 0 mean 100; values above 1000 are capped.
    pub page_size: i32,

    pub page_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListItemsResponse {
    pub items: Vec<Item>,
    /// Empty when there is nothing left to read.
    pub next_page_token: String,
    /// Number of items in this page.
    pub total_count: i32,
    pub has_more: bool,
}

#[utoipa::path(
    post,
    path = "/store.v1.StoreService/ListItems",
    tag = "StoreService",
    request_body = ListItemsRequest,
    responses(
        (status = 200, description = "One page of the tenant's items", body = ListItemsResponse),
        (status = 400, description = "INVALID_ARGUMENT (bad tenant or page token)"),
        (status = 500, description = "INTERNAL"),
        (status = 504, description = "DEADLINE_EXCEEDED")
    )
)]
pub async fn list_items(
    State(state): State<AppState>,
    RpcJson(req): RpcJson<ListItemsRequest>,
) -> AppResult<RpcJson<ListItemsResponse>> {
    req.validate()?;

    let query = ListQuery {
        category: req.category,
        status: req.status,
        search_query: req.search_query,
        page_size: req.page_size,
        page_token: Some(req.page_token).filter(|token| !token.is_empty()),
    };

    let page = observe(
        state.metrics.as_ref(),
        "list",
        state.store.list_items(req.tenant_id, query),
    )
    .await?;

    Ok(RpcJson(ListItemsResponse {
        items: page.items,
        next_page_token: page.next_page_token.unwrap_or_default(),
        total_count: page.returned_count,
        has_more: page.has_more,
    }))
}

// ---
// Payloads: UpdateInventory
// ---
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateInventoryRequest {
    #[validate(range(min = 1, message = "tenant_id must be positive"))]
    pub tenant_id: i64,

    #[validate(length(min = 1, message = "item_id is required"))]
    pub item_id: String,

    /// Signed delta applied to the stored count.
    pub quantity_change: i32,

    pub reason: String,

    pub updated_by: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInventoryResponse {
    pub item: Item,
    pub previous_count: i32,
}

#[utoipa::path(
    post,
    path = "/store.v1.StoreService/UpdateInventory",
    tag = "StoreService",
    request_body = UpdateInventoryRequest,
    responses(
        (status = 200, description = "Count adjusted", body = UpdateInventoryResponse),
        (status = 400, description = "INVALID_ARGUMENT, or FAILED_PRECONDITION with details.previousCount. \
            Deviation: every other failure maps to INTERNAL, but a shortage uses FAILED_PRECONDITION \
            so that previousCount reaches the caller."),
        (status = 404, description = "NOT_FOUND"),
        (status = 409, description = "ABORTED: concurrent writers kept winning the conditional update; nothing was written, safe to retry"),
        (status = 500, description = "INTERNAL"),
        (status = 504, description = "DEADLINE_EXCEEDED")
    )
)]
pub async fn update_inventory(
    State(state): State<AppState>,
    canary: CanaryContext,
    RpcJson(req): RpcJson<UpdateInventoryRequest>,
) -> AppResult<RpcJson<UpdateInventoryResponse>> {
    req.validate()?;

    let adjustment = observe(
        state.metrics.as_ref(),
        "update_inventory",
        state.store.update_inventory(
            req.tenant_id,
            &req.item_id,
            req.quantity_change,
            &req.reason,
            &req.updated_by,
        ),
    )
    .await?;

    tracing::info!(
        tenant_id = req.tenant_id,
        item_id = %req.item_id,
        quantity_change = req.quantity_change,
        previous_count = adjustment.previous_count,
        canary = ?canary.0,
        "inventory updated via rpc"
    );
    Ok(RpcJson(UpdateInventoryResponse {
        item: adjustment.item,
        previous_count: adjustment.previous_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_price_is_rejected() {
        let req = CreateItemRequest {
            tenant_id: 1,
            name: "lamp".into(),
            price: Decimal::new(-1, 2),
            ..Default::default()
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("price"));
    }

    #[test]
    fn zero_price_is_accepted() {
        let req = CreateItemRequest {
            tenant_id: 1,
            name: "free sample".into(),
            ..Default::default()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn tenant_and_id_are_required() {
        let errors = GetItemRequest::default().validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("tenant_id"));
        assert!(fields.contains_key("id"));
    }

    #[tokio::test]
    async fn observe_passes_the_store_result_through() {
        let metrics = crate::telemetry::NoopMetrics;
        let ok = observe(&metrics, "get", async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = observe(&metrics, "get", async {
            Err::<i32, _>(StoreError::InvalidInput("bad".into()))
        })
        .await;
        assert!(matches!(err, Err(StoreError::InvalidInput(_))));
    }

    #[test]
    fn request_fields_use_camel_case() {
        let req: UpdateInventoryRequest = serde_json::from_str(
            r#"{"tenantId": 3, "itemId": "abc", "quantityChange": -2, "updatedBy": "bob"}"#,
        )
        .unwrap();
        assert_eq!(req.tenant_id, 3);
        assert_eq!(req.item_id, "abc");
        assert_eq!(req.quantity_change, -2);
        assert_eq!(req.reason, "");
    }

    #[test]
    fn enums_travel_as_proto_names() {
        let req: ListItemsRequest = serde_json::from_str(
            r#"{"tenantId": 1, "category": "ITEM_CATEGORY_BOOKS", "status": "ITEM_STATUS_ACTIVE"}"#,
        )
        .unwrap();
        assert_eq!(req.category, ItemCategory::Books);
        assert_eq!(req.status, ItemStatus::Active);
        assert_eq!(req.page_token, "");
    }
}
