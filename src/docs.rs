// src/docs.rs

use utoipa::OpenApi;
use utoipa::openapi::{
    RefOr, Required, Schema, Type,
    path::{ParameterBuilder, ParameterIn},
    schema::ObjectBuilder,
};

use crate::handlers;
use crate::middleware::canary::CANARY_HEADER;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::items::create_item,
        handlers::items::get_item,
        handlers::items::update_item,
        handlers::items::delete_item,
        handlers::items::list_items,
        handlers::items::update_inventory,
    ),
    components(
        schemas(
            // --- Items ---
            models::item::Item,
            models::item::ItemCategory,
            models::item::ItemStatus,

            // --- Requests ---
            handlers::items::CreateItemRequest,
            handlers::items::GetItemRequest,
            handlers::items::UpdateItemRequest,
            handlers::items::DeleteItemRequest,
            handlers::items::ListItemsRequest,
            handlers::items::UpdateInventoryRequest,

            // --- Responses ---
            handlers::items::CreateItemResponse,
            handlers::items::GetItemResponse,
            handlers::items::UpdateItemResponse,
            handlers::items::DeleteItemResponse,
            handlers::items::ListItemsResponse,
            handlers::items::UpdateInventoryResponse,
        )
    ),
    tags(
        (name = "StoreService", description = "Tenant-scoped catalog items")
    ),
    modifiers(&CanaryAddon)
)]
pub struct ApiDoc;

/// Documents the optional routing tag header on every RPC.
struct CanaryAddon;

impl utoipa::Modify for CanaryAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let schema = ObjectBuilder::new()
            .schema_type(Type::String)
            .pattern(Some("^[0-9]+$"))
            .build();
        let header = ParameterBuilder::new()
            .name(CANARY_HEADER)
            .parameter_in(ParameterIn::Header)
            .required(Required::False)
            .description(Some("Canary routing tag, echoed on the response"))
            .schema(Some(RefOr::T(Schema::Object(schema))))
            .build();

        for item in openapi.paths.paths.values_mut() {
            if let Some(operation) = item.post.as_mut() {
                operation
                    .parameters
                    .get_or_insert_with(Vec::new)
                    .push(header.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rpc_is_documented() {
        let doc = ApiDoc::openapi();
        for method in [
            "CreateItem",
            "GetItem",
            "UpdateItem",
            "DeleteItem",
            "ListItems",
            "UpdateInventory",
        ] {
            let path = format!("/store.v1.StoreService/{method}");
            let item = doc.paths.paths.get(&path).unwrap();
            let params = item.post.as_ref().unwrap().parameters.as_ref().unwrap();
            assert!(params.iter().any(|p| p.name == CANARY_HEADER), "{path}");
            let responses = &item.post.as_ref().unwrap().responses.responses;
            assert!(responses.contains_key("504"), "{path}");
        }
    }

    #[test]
    fn inventory_failures_are_documented() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();
        let responses = &json["paths"]["/store.v1.StoreService/UpdateInventory"]["post"]["responses"];

        assert!(responses["400"]["description"]
            .as_str()
            .unwrap()
            .contains("Deviation"));
        assert!(responses["409"]["description"]
            .as_str()
            .unwrap()
            .starts_with("ABORTED"));
    }
}
