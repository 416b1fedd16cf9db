use async_trait::async_trait;
use aws_sdk_textract::types::{BlockType, Document, S3Object};
use domain::prescriptions::services::{CollaboratorError, CollaboratorResult, TextExtractor};

use crate::{s3, sdk_error};

pub struct TextractExtractor {
    client: aws_sdk_textract::Client,
}

impl TextractExtractor {
    pub fn new(client: aws_sdk_textract::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextExtractor for TextractExtractor {
    async fn extract_text(&self, image_uri: &str) -> CollaboratorResult<String> {
        let (bucket, key) = s3::parse_uri(image_uri).ok_or_else(|| {
            CollaboratorError::new("textract", format!("Not an S3 image reference: {}", image_uri))
        })?;

        let document = Document::builder()
            .s3_object(S3Object::builder().bucket(bucket).name(key).build())
            .build();

        let output = self
            .client
            .detect_document_text()
            .document(document)
            .send()
            .await
            .map_err(sdk_error("textract"))?;

        let lines: Vec<&str> = output
            .blocks()
            .iter()
            .filter(|block| block.block_type() == Some(&BlockType::Line))
            .filter_map(|block| block.text())
            .collect();

        tracing::info!(image_uri, lines = lines.len(), "Textract detected text");
        Ok(lines.join("\n"))
    }
}
