#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use store_service::common::ids::SequentialIds;
use store_service::common::retry::RetryPolicy;
use store_service::config::AppState;
use store_service::db::{ItemTable, MemoryTable};
use store_service::router;
use store_service::services::ItemStore;
use store_service::telemetry::PrometheusMetrics;

/// Router over an in-memory table, plus a handle on that table.
pub struct TestApp {
    pub router: Router,
    pub table: Arc<MemoryTable>,
}

/// Same middleware stack as the binary. Ids are sequential so listings
/// come back in creation order.
pub fn build_test_app() -> TestApp {
    let table = Arc::new(MemoryTable::new());
    TestApp {
        router: build_router_over(table.clone(), Duration::from_secs(30)),
        table,
    }
}

/// Full router over any table, with the given request deadline.
pub fn build_router_over(table: Arc<dyn ItemTable>, request_timeout: Duration) -> Router {
    let store = ItemStore::new(table)
        .with_ids(Arc::new(SequentialIds::default()))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        });
    let metrics = PrometheusMetrics::new().unwrap();
    let state = AppState::from_parts(store, Arc::new(metrics));
    router(state, request_timeout)
}

/// POST a JSON body to `/store.v1.StoreService/{method}`.
pub async fn rpc(app: &Router, method: &str, body: Value) -> Response<Body> {
    rpc_with_headers(app, method, body, &[]).await
}

pub async fn rpc_with_headers(
    app: &Router,
    method: &str,
    body: Value,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(format!("/store.v1.StoreService/{method}"))
        .header(CONTENT_TYPE, "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Sends an RPC, asserts 200 and returns the body.
pub async fn rpc_ok(app: &Router, method: &str, body: Value) -> Value {
    let response = rpc(app, method, body).await;
    let status = response.status();
    let json = body_json(response).await;
    assert_eq!(status, StatusCode::OK, "{method} failed: {json}");
    json
}

/// Creates an item and returns it.
pub async fn create_item(app: &Router, tenant_id: i64, name: &str, inventory_count: i32) -> Value {
    let json = rpc_ok(
        app,
        "CreateItem",
        json!({
            "tenantId": tenant_id,
            "name": name,
            "description": format!("{name} description"),
            "price": 19.99,
            "category": "ITEM_CATEGORY_BOOKS",
            "sku": format!("SKU-{name}"),
            "inventoryCount": inventory_count,
            "tags": ["new", "featured"],
            "createdBy": "alice",
        }),
    )
    .await;
    json["item"].clone()
}
