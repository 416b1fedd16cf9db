//! AWS-backed pipeline collaborators

/// OCR via Textract
pub mod textract;

/// Claude on Bedrock: analysis, interactions, dosages
pub mod bedrock;

/// DynamoDB stores: stock, sales, history, delivery
pub mod dynamo;

/// S3 image references
pub mod s3;

use std::{env, sync::Arc};

use aws_config::SdkConfig;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use domain::prescriptions::services::CollaboratorError;
use domain::prescriptions::{HistoryRepository, Services};
use domain::PipelineConfig;

pub(crate) fn sdk_error<E: std::error::Error>(source: &'static str) -> impl Fn(E) -> CollaboratorError {
    move |e| CollaboratorError::new(source, DisplayErrorContext(e).to_string())
}

pub(crate) fn env_or(var: &str, default: &str) -> String {
    env::var(var).unwrap_or(default.to_string())
}

/// Collaborators for the prescription aggregate, wired to AWS.
pub fn services(sdk: &SdkConfig, config: &PipelineConfig) -> Services {
    let dynamodb = aws_sdk_dynamodb::Client::new(sdk);
    let claude = Arc::new(bedrock::Claude::new(
        aws_sdk_bedrockruntime::Client::new(sdk),
        aws_sdk_s3::Client::new(sdk),
        &env_or("BEDROCK_MODEL_ID", bedrock::DEFAULT_MODEL_ID),
    ));

    Services {
        extractor: Arc::new(textract::TextractExtractor::new(aws_sdk_textract::Client::new(sdk))),
        analyzer: claude.clone(),
        interactions: claude.clone(),
        dosages: claude,
        stock: Arc::new(dynamo::DynamoStock::new(
            dynamodb.clone(),
            &env_or("DYNAMODB_STOCK_TABLE", "pharmacy-stock"),
        )),
        sales: Arc::new(dynamo::DynamoSales::new(
            dynamodb.clone(),
            &env_or("DYNAMODB_SALES_TABLE", "pharmacy-sales"),
        )),
        delivery: Arc::new(dynamo::DynamoDelivery::new(
            dynamodb,
            &env_or("DYNAMODB_DELIVERY_TABLE", "pharmacy-delivery-requests"),
        )),
        alternatives: Arc::new(config.alternative_lookup()),
        matching: config.matching,
        pharmacy_id: config.pharmacy_id.clone(),
    }
}

pub fn history(sdk: &SdkConfig) -> Arc<dyn HistoryRepository> {
    Arc::new(dynamo::DynamoHistory::new(
        aws_sdk_dynamodb::Client::new(sdk),
        &env_or("DYNAMODB_HISTORY_TABLE", "pharmacy-prescription-history"),
    ))
}
