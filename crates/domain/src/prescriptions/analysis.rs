//! Structured analysis stage. Hard gate.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::model::AnalyzedPrescription;
use super::services::PrescriptionAnalyzer;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prescription: Option<AnalyzedPrescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            prescription: None,
            error: Some(error.into()),
        }
    }
}

/// Runs the analyzer and enforces its contract: at least one medication,
/// confidences within [0, 1], the OCR text and image reference carried.
/// Warnings the analyzer raised are kept for the verifier to extend.
pub async fn analyze(
    analyzer: &dyn PrescriptionAnalyzer,
    text: &str,
    image_uri: &str,
) -> AnalysisResult {
    let mut prescription = match analyzer.analyze(text, image_uri).await {
        Ok(prescription) => prescription,
        Err(e) => {
            tracing::warn!(image_uri, error = %e, "Prescription analysis failed");
            return AnalysisResult::failed(format!("Prescription analysis failed: {}", e.message));
        }
    };

    prescription
        .medications
        .retain(|m| !m.name.trim().is_empty());
    if prescription.medications.is_empty() {
        return AnalysisResult::failed("No medications could be identified on the prescription");
    }

    if prescription.id.is_empty() {
        prescription.id = Ulid::new().to_string();
    }
    prescription.confidence = clamp_unit(prescription.confidence);
    for medication in &mut prescription.medications {
        medication.confidence = clamp_unit(medication.confidence);
    }
    prescription.raw_text = text.to_string();
    prescription.image_uri = image_uri.to_string();

    tracing::info!(
        prescription_id = %prescription.id,
        medications = prescription.medications.len(),
        confidence = prescription.confidence,
        "Prescription analyzed"
    );

    AnalysisResult {
        success: true,
        prescription: Some(prescription),
        error: None,
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prescriptions::memory::FixedAnalyzer;
    use crate::prescriptions::model::{PrescribedMedication, PrescriptionWarning, Severity, WarningType};

    fn candidate(medications: Vec<PrescribedMedication>) -> AnalyzedPrescription {
        AnalyzedPrescription {
            medications,
            confidence: 1.4,
            warnings: vec![PrescriptionWarning::new(
                WarningType::Dosage,
                Severity::Low,
                "dosage unreadable",
            )],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fills_contract_fields() {
        let analyzer = FixedAnalyzer::returning(candidate(vec![PrescribedMedication::new(
            "Napa", "1+0+1", "5 days",
        )]));

        let result = analyze(&analyzer, "raw ocr", "s3://b/k").await;
        let prescription = result.prescription.unwrap();
        assert!(result.success);
        assert!(!prescription.id.is_empty());
        assert_eq!(prescription.confidence, 1.0);
        assert_eq!(prescription.raw_text, "raw ocr");
        assert_eq!(prescription.image_uri, "s3://b/k");
        assert_eq!(prescription.warnings.len(), 1);
    }

    #[tokio::test]
    async fn empty_medication_list_fails() {
        let analyzer = FixedAnalyzer::returning(candidate(vec![PrescribedMedication::new(
            " ", "", "",
        )]));
        let result = analyze(&analyzer, "raw", "s3://b/k").await;
        assert!(!result.success);
        assert!(result.prescription.is_none());
    }

    #[tokio::test]
    async fn analyzer_error_fails() {
        let analyzer = FixedAnalyzer::failing("model timeout");
        let result = analyze(&analyzer, "raw", "s3://b/k").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("model timeout"));
    }
}
