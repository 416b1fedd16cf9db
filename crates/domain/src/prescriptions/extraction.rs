//! Text extraction stage. Hard gate: no partial text is accepted.

use serde::{Deserialize, Serialize};

use super::services::TextExtractor;

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractionResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            extracted_text: None,
            error: Some(error.into()),
        }
    }
}

/// Never fails: every problem is reported as `success = false`.
pub async fn extract_text(extractor: &dyn TextExtractor, image_uri: &str) -> ExtractionResult {
    if image_uri.trim().is_empty() {
        return ExtractionResult::failed("No image was captured");
    }

    match extractor.extract_text(image_uri).await {
        Ok(text) if text.trim().is_empty() => {
            tracing::warn!(image_uri, "OCR returned no text");
            ExtractionResult::failed("No readable text found in the image")
        }
        Ok(text) => ExtractionResult {
            success: true,
            extracted_text: Some(text),
            error: None,
        },
        Err(e) => {
            tracing::warn!(image_uri, error = %e, "Text extraction failed");
            ExtractionResult::failed(format!("Text extraction failed: {}", e.message))
        }
    }
}
