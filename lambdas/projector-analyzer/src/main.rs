use aws_config::BehaviorVersion;
use aws_lambda_events::event::s3::S3Event;
use cqrs_es::AggregateError;
use domain::prescriptions::{self, cqrs::PrescriptionCqrs};
use domain::PipelineConfig;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::collections::HashMap;
use ulid::Ulid;

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let dynamodb_client = aws_sdk_dynamodb::Client::new(&config);

    let pipeline = PipelineConfig::from_env();
    let prescriptions_repo = prescriptions::cqrs::init_repo(dynamodb_client.clone());
    let prescriptions_cqrs = prescriptions::cqrs::init(
        dynamodb_client,
        prescriptions_repo,
        adapters::history(&config),
        adapters::services(&config, &pipeline),
    );

    lambda_runtime::run(service_fn(|event: LambdaEvent<Value>| async {
        handle_event(event, &prescriptions_cqrs).await
    }))
    .await
}

async fn handle_event(event: LambdaEvent<Value>, cqrs: &PrescriptionCqrs) -> Result<Value, Error> {
    let is_s3 = event
        .payload
        .get("Records")
        .and_then(|r| r.as_array())
        .and_then(|records| records.first())
        .is_some_and(|record| record.get("s3").is_some());

    if is_s3 {
        let s3_event: S3Event = serde_json::from_value(event.payload)?;
        handle_s3_event(s3_event, cqrs).await?;
    } else {
        tracing::warn!("Unknown event type");
    }

    Ok(serde_json::json!({"statusCode": 200}))
}

async fn handle_s3_event(event: S3Event, cqrs: &PrescriptionCqrs) -> Result<(), Error> {
    tracing::info!(records = event.records.len(), "Processing S3 records");

    for record in event.records {
        let bucket = record.s3.bucket.name.ok_or("Missing bucket name")?;
        let key = decode_key(&record.s3.object.key.ok_or("Missing object key")?);

        let Some(prescription_id) = id_from_key(&key) else {
            tracing::warn!(key = %key, "Invalid S3 key format");
            continue;
        };

        tracing::info!(prescription_id, bucket = %bucket, key = %key, "Prescription image uploaded");

        let capture = prescriptions::Command::Capture {
            id: prescription_id.to_string(),
            image_uri: adapters::s3::uri(&bucket, &key),
        };
        match cqrs.execute_with_metadata(prescription_id, capture, metadata()).await {
            Ok(()) => {}
            // Redelivered notification: the prescription is already captured
            Err(AggregateError::UserError(domain::Error::Uniqueness { .. })) => {
                tracing::info!(prescription_id, "Already captured");
            }
            Err(e) => return Err(e.into()),
        }

        cqrs.execute_with_metadata(prescription_id, prescriptions::Command::Process, metadata())
            .await?;

        tracing::info!(prescription_id, "Prescription processed");
    }

    Ok(())
}

fn metadata() -> HashMap<String, String> {
    HashMap::from([("command_id".to_string(), Ulid::new().to_string())])
}

/// `prescriptions/{id}/{file}` → `id`
fn id_from_key(key: &str) -> Option<&str> {
    let mut parts = key.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("prescriptions"), Some(id), Some(file)) if !id.is_empty() && !file.is_empty() => Some(id),
        _ => None,
    }
}

/// S3 notifications carry form-encoded keys.
fn decode_key(key: &str) -> String {
    let bytes = key.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => decoded.push(b' '),
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                let hex = [bytes[i + 1], bytes[i + 2]];
                let digits = std::str::from_utf8(&hex).unwrap_or("00");
                decoded.push(u8::from_str_radix(digits, 16).unwrap_or(b'%'));
                i += 2;
            }
            byte => decoded.push(byte),
        }
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
