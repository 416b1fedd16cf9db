//! DynamoDB-backed stock catalog, sales ledger, history log and delivery queue.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use chrono::{DateTime, Utc};
use domain::prescriptions::model::{DeliveryRequest, NewMedicine, Sale, StockItem, StockUpdate};
use domain::prescriptions::services::{
    CollaboratorError, CollaboratorResult, DeliveryService, HistoryRepository, SaleLedger,
    StockStore,
};
use domain::prescriptions::HistoryEntry;
use serde::Serialize;
use serde_dynamo::{from_item, from_items, to_attribute_value, to_item};
use ulid::Ulid;

use crate::sdk_error;

type Item = HashMap<String, AttributeValue>;

fn codec_error(source: &'static str) -> impl Fn(serde_dynamo::Error) -> CollaboratorError {
    move |e| CollaboratorError::new(source, e.to_string())
}

pub struct DynamoStock {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoStock {
    pub fn new(client: aws_sdk_dynamodb::Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

/// Catalog order is the order DynamoDB returns items in; it is stable for a
/// table whose keys do not change.
#[async_trait]
impl StockStore for DynamoStock {
    async fn catalog(&self) -> CollaboratorResult<Vec<StockItem>> {
        let mut items = Vec::new();
        let mut start_key: Option<Item> = None;

        loop {
            let page = self
                .client
                .scan()
                .table_name(&self.table)
                .set_exclusive_start_key(start_key.take())
                .send()
                .await
                .map_err(sdk_error("stock"))?;

            let batch: Vec<StockItem> =
                from_items(page.items().to_vec()).map_err(codec_error("stock"))?;
            items.extend(batch);

            match page.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn search(&self, name_query: &str) -> CollaboratorResult<Vec<StockItem>> {
        let query = name_query.trim().to_lowercase();
        Ok(self
            .catalog()
            .await?
            .into_iter()
            .filter(|item| {
                item.generic_name.to_lowercase().contains(&query)
                    || item.brand_name.to_lowercase().contains(&query)
            })
            .collect())
    }

    async fn add_medicine(&self, record: NewMedicine) -> CollaboratorResult<StockItem> {
        let item = StockItem {
            medicine_id: Ulid::new().to_string(),
            generic_name: record.generic_name,
            brand_name: record.brand_name,
            dosage_form: record.dosage_form,
            quantity: record.quantity,
            unit_price: record.unit_price,
        };

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(&item).map_err(codec_error("stock"))?))
            .condition_expression("attribute_not_exists(medicine_id)")
            .send()
            .await
            .map_err(sdk_error("stock"))?;

        tracing::info!(medicine_id = %item.medicine_id, name = %item.generic_name, "Medicine added to stock");
        Ok(item)
    }

    async fn update_stock(
        &self,
        stock_id: &str,
        fields: StockUpdate,
    ) -> CollaboratorResult<StockItem> {
        let mut assignments = Vec::new();
        let mut request = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("medicine_id", AttributeValue::S(stock_id.to_string()))
            .condition_expression("attribute_exists(medicine_id)")
            .return_values(ReturnValue::AllNew);

        if let Some(quantity) = fields.quantity {
            assignments.push("#quantity = :quantity");
            request = request
                .expression_attribute_names("#quantity", "quantity")
                .expression_attribute_values(
                    ":quantity",
                    to_attribute_value(quantity).map_err(codec_error("stock"))?,
                );
        }
        if let Some(unit_price) = fields.unit_price {
            assignments.push("#unit_price = :unit_price");
            request = request
                .expression_attribute_names("#unit_price", "unit_price")
                .expression_attribute_values(
                    ":unit_price",
                    to_attribute_value(unit_price).map_err(codec_error("stock"))?,
                );
        }
        if assignments.is_empty() {
            return Err(CollaboratorError::new("stock", "Nothing to update"));
        }

        let output = request
            .update_expression(format!("SET {}", assignments.join(", ")))
            .send()
            .await
            .map_err(sdk_error("stock"))?;

        let attributes = output
            .attributes()
            .cloned()
            .ok_or_else(|| CollaboratorError::new("stock", format!("{} returned no attributes", stock_id)))?;
        from_item(attributes).map_err(codec_error("stock"))
    }
}

pub struct DynamoSales {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoSales {
    pub fn new(client: aws_sdk_dynamodb::Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl SaleLedger for DynamoSales {
    async fn create_sale(&self, sale: &Sale) -> CollaboratorResult<Sale> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(sale).map_err(codec_error("sales"))?))
            .condition_expression("attribute_not_exists(id)")
            .send()
            .await
            .map_err(sdk_error("sales"))?;

        tracing::info!(sale_id = %sale.id, total = %sale.total_amount, "Sale recorded");
        Ok(sale.clone())
    }

    async fn find_sale(&self, sale_id: &str) -> CollaboratorResult<Option<Sale>> {
        let output = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(sale_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(sdk_error("sales"))?;

        output
            .item()
            .cloned()
            .map(from_item)
            .transpose()
            .map_err(codec_error("sales"))
    }

    async fn mark_stock_applied(&self, sale_id: &str) -> CollaboratorResult<()> {
        self.client
            .update_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(sale_id.to_string()))
            .update_expression("SET stock_applied = :applied")
            .expression_attribute_values(":applied", AttributeValue::Bool(true))
            .condition_expression("attribute_exists(id)")
            .send()
            .await
            .map_err(sdk_error("sales"))?;
        Ok(())
    }

    /// Voided sales stay in the ledger, flagged, for audit.
    async fn void_sale(&self, sale_id: &str) -> CollaboratorResult<()> {
        self.client
            .update_item()
            .table_name(&self.table)
            .key("id", AttributeValue::S(sale_id.to_string()))
            .update_expression("SET voided = :voided, voided_at = :voided_at")
            .expression_attribute_values(":voided", AttributeValue::Bool(true))
            .expression_attribute_values(":voided_at", AttributeValue::S(Utc::now().to_rfc3339()))
            .condition_expression("attribute_exists(id)")
            .send()
            .await
            .map_err(sdk_error("sales"))?;

        tracing::warn!(sale_id, "Sale voided");
        Ok(())
    }
}

/// History rows: partition `prescription_id`, sort `sequence`.
pub struct DynamoHistory {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoHistory {
    pub fn new(client: aws_sdk_dynamodb::Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl HistoryRepository for DynamoHistory {
    async fn append(&self, entry: HistoryEntry) -> CollaboratorResult<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(&entry).map_err(codec_error("history"))?))
            .send()
            .await
            .map_err(sdk_error("history"))?;
        Ok(())
    }

    async fn entries(&self, prescription_id: &str) -> CollaboratorResult<Vec<HistoryEntry>> {
        let output = self
            .client
            .query()
            .table_name(&self.table)
            .key_condition_expression("prescription_id = :id")
            .expression_attribute_values(":id", AttributeValue::S(prescription_id.to_string()))
            .scan_index_forward(true)
            .send()
            .await
            .map_err(sdk_error("history"))?;

        from_items(output.items().to_vec()).map_err(codec_error("history"))
    }
}

#[derive(Serialize)]
struct DeliveryRecord<'a> {
    id: String,
    status: &'static str,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    request: &'a DeliveryRequest,
}

/// Delivery requests are queued for the delivery service to pick up.
pub struct DynamoDelivery {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoDelivery {
    pub fn new(client: aws_sdk_dynamodb::Client, table: &str) -> Self {
        Self {
            client,
            table: table.to_string(),
        }
    }
}

#[async_trait]
impl DeliveryService for DynamoDelivery {
    async fn create_delivery_request(&self, request: &DeliveryRequest) -> CollaboratorResult<()> {
        let record = DeliveryRecord {
            id: Ulid::new().to_string(),
            status: "requested",
            created_at: Utc::now(),
            request,
        };

        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(to_item(&record).map_err(codec_error("delivery"))?))
            .send()
            .await
            .map_err(sdk_error("delivery"))?;

        tracing::info!(delivery_id = %record.id, pharmacy_id = %request.pharmacy_id, "Delivery requested");
        Ok(())
    }
}
