//! Claude on Bedrock as the prescription analyzer and safety checker.
//!
//! Every call sends one user turn and expects a JSON document back. The
//! model sometimes wraps the document in prose or a fenced block, so the
//! reply is trimmed to its outermost JSON value before parsing.

use async_trait::async_trait;
use aws_sdk_bedrockruntime::primitives::Blob;
use base64::Engine;
use domain::prescriptions::model::{
    AnalyzedPrescription, PatientInfo, PrescribedMedication, PrescriptionWarning,
};
use domain::prescriptions::services::{
    CollaboratorError, CollaboratorResult, DosageVerifier, InteractionChecker,
    PrescriptionAnalyzer,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{s3, sdk_error};

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-5-sonnet-20240620-v1:0";

const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";
const MAX_TOKENS: u32 = 4096;

const ANALYSIS_PROMPT: &str = r#"You are reading a handwritten or printed medical prescription.
Use the OCR text below together with the image. Reply with a single JSON object and nothing else:
{"patientInfo":{"name":string?,"age":number?,"gender":string?,"weight":number?},
 "doctorInfo":{"name":string?,"license":string?,"clinic":string?},
 "medications":[{"name":string,"genericName":string?,"dosageForm":string?,"dosage":string,
   "frequency":string,"duration":string,"instructions":string,"confidence":number}],
 "instructions":[string],"date":string,"confidence":number,
 "warnings":[{"type":"interaction"|"dosage"|"allergy"|"age_restriction"|"pregnancy",
   "severity":"low"|"medium"|"high"|"critical","message":string,"medications":[string]}]}
Frequencies keep the prescription's notation (for example "1+0+1" or "twice daily").
Confidence values are between 0 and 1."#;

const INTERACTIONS_PROMPT: &str = r#"List clinically relevant drug-drug interactions between these medications.
Reply with a JSON array and nothing else. Each element:
{"type":"interaction","severity":"low"|"medium"|"high"|"critical","message":string,"medications":[string]}
Reply [] when there are none."#;

const DOSAGES_PROMPT: &str = r#"Check each prescribed dosage against the patient's age and weight.
Reply with a JSON array and nothing else. Each element:
{"type":"dosage"|"age_restriction"|"pregnancy"|"allergy","severity":"low"|"medium"|"high"|"critical","message":string,"medications":[string]}
Reply [] when every dosage is appropriate."#;

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

pub struct Claude {
    client: aws_sdk_bedrockruntime::Client,
    s3: aws_sdk_s3::Client,
    model_id: String,
}

impl Claude {
    pub fn new(client: aws_sdk_bedrockruntime::Client, s3: aws_sdk_s3::Client, model_id: &str) -> Self {
        Self {
            client,
            s3,
            model_id: model_id.to_string(),
        }
    }

    async fn complete(&self, content: Vec<Value>) -> CollaboratorResult<String> {
        let body = json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": content }],
        });
        let body = serde_json::to_vec(&body).map_err(|e| CollaboratorError::new("bedrock", e.to_string()))?;

        let output = self
            .client
            .invoke_model()
            .model_id(&self.model_id)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(sdk_error("bedrock"))?;

        let response: MessagesResponse = serde_json::from_slice(output.body().as_ref())
            .map_err(|e| CollaboratorError::new("bedrock", format!("Unexpected response: {}", e)))?;

        Ok(response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }

    async fn image_block(&self, image_uri: &str) -> CollaboratorResult<Value> {
        let (bucket, key) = s3::parse_uri(image_uri).ok_or_else(|| {
            CollaboratorError::new("bedrock", format!("Not an S3 image reference: {}", image_uri))
        })?;
        let bytes = s3::download(&self.s3, bucket, key).await?;

        Ok(json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": s3::media_type(key),
                "data": base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        }))
    }
}

/// Outermost JSON object or array in a model reply.
pub fn json_payload(reply: &str) -> Option<&str> {
    let start = reply.find(['{', '['])?;
    let close = if reply[start..].starts_with('{') { '}' } else { ']' };
    let end = reply.rfind(close)?;
    (end > start).then(|| &reply[start..=end])
}

pub fn parse_reply<T: DeserializeOwned>(reply: &str) -> CollaboratorResult<T> {
    let payload = json_payload(reply)
        .ok_or_else(|| CollaboratorError::new("bedrock", "Reply contained no JSON"))?;
    serde_json::from_str(payload)
        .map_err(|e| CollaboratorError::new("bedrock", format!("Malformed reply: {}", e)))
}

#[async_trait]
impl PrescriptionAnalyzer for Claude {
    async fn analyze(&self, text: &str, image_uri: &str) -> CollaboratorResult<AnalyzedPrescription> {
        let image = self.image_block(image_uri).await?;
        let prompt = format!("{}\n\nOCR text:\n{}", ANALYSIS_PROMPT, text);

        let reply = self
            .complete(vec![image, json!({ "type": "text", "text": prompt })])
            .await?;
        let prescription: AnalyzedPrescription = parse_reply(&reply)?;

        tracing::info!(
            image_uri,
            medications = prescription.medications.len(),
            confidence = prescription.confidence,
            "Claude analyzed prescription"
        );
        Ok(prescription)
    }
}

#[async_trait]
impl InteractionChecker for Claude {
    async fn check_interactions(
        &self,
        medication_names: &[String],
    ) -> CollaboratorResult<Vec<PrescriptionWarning>> {
        let prompt = format!("{}\n\nMedications: {}", INTERACTIONS_PROMPT, medication_names.join(", "));
        let reply = self.complete(vec![json!({ "type": "text", "text": prompt })]).await?;
        parse_reply(&reply)
    }
}

#[async_trait]
impl DosageVerifier for Claude {
    async fn verify_dosages(
        &self,
        medications: &[PrescribedMedication],
        patient: &PatientInfo,
    ) -> CollaboratorResult<Vec<PrescriptionWarning>> {
        let details = json!({ "patient": patient, "medications": medications });
        let prompt = format!("{}\n\n{}", DOSAGES_PROMPT, details);
        let reply = self.complete(vec![json!({ "type": "text", "text": prompt })]).await?;
        parse_reply(&reply)
    }
}
