// src/db/dynamo_table.rs

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_dynamodb::Client;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType, ReturnValue,
    ScalarAttributeType,
};

use crate::db::table::{
    ATTR_INVENTORY, DecodeFailure, ItemChange, ItemTable, PageRequest, RawPage, TableError,
    count_bounds,
};
use crate::models::item::{ItemKey, ItemRecord};

type Attributes = HashMap<String, AttributeValue>;

#[derive(Debug, Clone)]
pub struct DynamoTable {
    client: Client,
    table: String,
}

impl DynamoTable {
    pub fn new(client: Client, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Builds a client from the ambient AWS configuration. `endpoint`
    /// points the client at a local stack instead of the regional service.
    pub async fn connect(region: &str, endpoint: Option<&str>, table: &str) -> Self {
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_owned()))
            .load()
            .await;
        let mut builder = aws_sdk_dynamodb::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self::new(Client::from_conf(builder.build()), table)
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Creates the PK/SK table when it does not exist yet. Meant for local runs.
    #[tracing::instrument(skip(self), fields(table = %self.table))]
    pub async fn ensure_table(&self) -> anyhow::Result<()> {
        match self.client.describe_table().table_name(&self.table).send().await {
            Ok(_) => return Ok(()),
            Err(err) if err.code() == Some("ResourceNotFoundException") => {}
            Err(err) => return Err(err).context("failed to describe table"),
        }

        tracing::info!("creating table");
        self.client
            .create_table()
            .table_name(&self.table)
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name("PK")
                    .key_type(KeyType::Hash)
                    .build()?,
            )
            .key_schema(
                KeySchemaElement::builder()
                    .attribute_name("SK")
                    .key_type(KeyType::Range)
                    .build()?,
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name("PK")
                    .attribute_type(ScalarAttributeType::S)
                    .build()?,
            )
            .attribute_definitions(
                AttributeDefinition::builder()
                    .attribute_name("SK")
                    .attribute_type(ScalarAttributeType::S)
                    .build()?,
            )
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .context("failed to create table")?;

        Ok(())
    }
}

fn key_attributes(pk: &str, sk: &str) -> Attributes {
    HashMap::from([
        ("PK".to_string(), AttributeValue::S(pk.to_owned())),
        ("SK".to_string(), AttributeValue::S(sk.to_owned())),
    ])
}

fn classify<E, R>(err: SdkError<E, R>) -> TableError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let transport = matches!(err, SdkError::TimeoutError(_) | SdkError::DispatchFailure(_));
    let code = err.code().map(str::to_owned);
    let message = DisplayErrorContext(&err).to_string();

    match code.as_deref() {
        Some("ConditionalCheckFailedException") => TableError::ConditionFailed,
        Some(
            "ProvisionedThroughputExceededException"
            | "ThrottlingException"
            | "RequestLimitExceeded"
            | "InternalServerError"
            | "ServiceUnavailable",
        ) => TableError::Transient(message),
        _ if transport => TableError::Transient(message),
        _ => TableError::Backend(message),
    }
}

/// Translates a change into an update expression plus its condition.
struct UpdateExpression {
    update: String,
    condition: String,
    names: HashMap<String, String>,
    values: Attributes,
}

fn update_expression(change: &ItemChange) -> Result<UpdateExpression, TableError> {
    let mut sets = Vec::new();
    let mut names = HashMap::new();
    let mut values = HashMap::new();

    for (i, (attr, value)) in change.assignments()?.into_iter().enumerate() {
        let value: AttributeValue = serde_dynamo::to_attribute_value(value)
            .map_err(|e| TableError::Encode(e.to_string()))?;
        sets.push(format!("#a{i} = :a{i}"));
        names.insert(format!("#a{i}"), attr.to_string());
        values.insert(format!(":a{i}"), value);
    }

    let mut condition = "attribute_exists(PK)".to_string();
    if let Some(delta) = change.inventory_delta() {
        sets.push("#inv = #inv + :delta".to_string());
        names.insert("#inv".to_string(), ATTR_INVENTORY.to_string());
        values.insert(":delta".to_string(), AttributeValue::N(delta.to_string()));
        condition.push_str(" AND #inv BETWEEN :floor AND :ceiling");
        let (floor, ceiling) = count_bounds(delta);
        values.insert(":floor".to_string(), AttributeValue::N(floor.to_string()));
        values.insert(":ceiling".to_string(), AttributeValue::N(ceiling.to_string()));
    }

    Ok(UpdateExpression {
        update: format!("SET {}", sets.join(", ")),
        condition,
        names,
        values,
    })
}

#[async_trait]
impl ItemTable for DynamoTable {
    #[tracing::instrument(skip(self, record), fields(sk = %record.sk))]
    async fn put(&self, record: &ItemRecord) -> Result<(), TableError> {
        let item: Attributes =
            serde_dynamo::to_item(record).map_err(|e| TableError::Encode(e.to_string()))?;

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .send()
            .await
            .map_err(classify)?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, key: &ItemKey) -> Result<Option<ItemRecord>, TableError> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .set_key(Some(key_attributes(&key.pk, &key.sk)))
            .consistent_read(true)
            .send()
            .await
            .map_err(classify)?;

        output
            .item
            .map(|item| {
                serde_dynamo::from_item(item).map_err(|e| TableError::Decode(e.to_string()))
            })
            .transpose()
    }

    #[tracing::instrument(skip(self, change))]
    async fn apply(&self, key: &ItemKey, change: &ItemChange) -> Result<ItemRecord, TableError> {
        let expression = update_expression(change)?;

        let output = self
            .client
            .update_item()
            .table_name(&self.table)
            .set_key(Some(key_attributes(&key.pk, &key.sk)))
            .update_expression(expression.update)
            .condition_expression(expression.condition)
            .set_expression_attribute_names(Some(expression.names))
            .set_expression_attribute_values(Some(expression.values))
            .return_values(ReturnValue::AllOld)
            .send()
            .await
            .map_err(classify)?;

        let before = output
            .attributes
            .ok_or_else(|| TableError::Decode("update returned no previous attributes".into()))?;
        serde_dynamo::from_item(before).map_err(|e| TableError::Decode(e.to_string()))
    }

    #[tracing::instrument(skip(self))]
    async fn query(&self, request: &PageRequest) -> Result<RawPage, TableError> {
        let output = self
            .client
            .query()
            .table_name(&self.table)
            .key_condition_expression("PK = :pk AND begins_with(SK, :sk_prefix)")
            .expression_attribute_values(":pk", AttributeValue::S(request.pk.clone()))
            .expression_attribute_values(":sk_prefix", AttributeValue::S(request.sk_prefix.clone()))
            .limit(request.limit.max(1))
            .set_exclusive_start_key(
                request
                    .exclusive_start
                    .as_deref()
                    .map(|sk| key_attributes(&request.pk, sk)),
            )
            .send()
            .await
            .map_err(classify)?;

        let rows = output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(|item| {
                let sk = item
                    .get("SK")
                    .and_then(|value| value.as_s().ok())
                    .cloned();
                serde_dynamo::from_item(item).map_err(|e| DecodeFailure {
                    sk,
                    reason: e.to_string(),
                })
            })
            .collect();

        let last_evaluated = output
            .last_evaluated_key
            .and_then(|key| key.get("SK").and_then(|value| value.as_s().ok()).cloned());

        Ok(RawPage {
            rows,
            last_evaluated,
        })
    }

    fn backend(&self) -> &'static str {
        "dynamodb"
    }
}
