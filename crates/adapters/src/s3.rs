use aws_sdk_s3::error::DisplayErrorContext;
use domain::prescriptions::services::{CollaboratorError, CollaboratorResult};

/// Splits `s3://bucket/key` into bucket and key.
pub fn parse_uri(uri: &str) -> Option<(&str, &str)> {
    let (bucket, key) = uri.strip_prefix("s3://")?.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

pub fn uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

pub fn media_type(key: &str) -> &'static str {
    let lower = key.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

pub async fn download(client: &aws_sdk_s3::Client, bucket: &str, key: &str) -> CollaboratorResult<Vec<u8>> {
    let response = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| CollaboratorError::new("s3", DisplayErrorContext(e).to_string()))?;

    let data = response
        .body
        .collect()
        .await
        .map_err(|e| CollaboratorError::new("s3", e.to_string()))?;
    Ok(data.to_vec())
}
