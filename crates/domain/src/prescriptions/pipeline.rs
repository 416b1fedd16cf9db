//! Drives the automatic stages for one prescription:
//! extraction → analysis → safety verification → inventory reconciliation.
//!
//! Extraction and analysis are hard gates; a failure there ends the run
//! with a `StageFailed` event. Safety and inventory never stop the run.
//! Work already recorded on the aggregate (extracted text) is reused, so
//! a retry resumes at the stage that failed.

use chrono::Utc;

use super::aggregate::{Prescription, StageFailure};
use super::{analysis, extraction, reconcile, safety, Event, Services};

pub async fn run(prescription: &Prescription, services: &Services) -> Vec<Event> {
    let id = prescription.id.clone();
    let mut events = Vec::new();

    let text = match &prescription.raw_text {
        Some(text) => text.clone(),
        None => {
            let result = extraction::extract_text(services.extractor.as_ref(), &prescription.image_uri).await;
            match result.extracted_text {
                Some(text) if result.success => {
                    tracing::info!(prescription_id = %id, chars = text.len(), "Text extracted");
                    events.push(Event::TextExtracted {
                        id: id.clone(),
                        text: text.clone(),
                        updated_at: Utc::now(),
                    });
                    text
                }
                _ => {
                    let message = result
                        .error
                        .unwrap_or_else(|| "Text extraction failed".to_string());
                    events.push(Event::StageFailed {
                        id,
                        failure: StageFailure::extraction(format!(
                            "{message}. Retake the photo, retry, or cancel."
                        )),
                        updated_at: Utc::now(),
                    });
                    return events;
                }
            }
        }
    };

    let result = analysis::analyze(services.analyzer.as_ref(), &text, &prescription.image_uri).await;
    let mut analyzed = match result.prescription {
        Some(analyzed) if result.success => analyzed,
        _ => {
            let message = result
                .error
                .unwrap_or_else(|| "Prescription analysis failed".to_string());
            events.push(Event::StageFailed {
                id,
                failure: StageFailure::analysis(format!("{message}. Retry or cancel.")),
                updated_at: Utc::now(),
            });
            return events;
        }
    };
    // The aggregate id is the prescription's identity from here on.
    analyzed.id = id.clone();

    events.push(Event::PrescriptionAnalyzed {
        id: id.clone(),
        prescription: analyzed.clone(),
        updated_at: Utc::now(),
    });

    let warnings = safety::verify(services.interactions.as_ref(), services.dosages.as_ref(), &analyzed).await;
    tracing::info!(prescription_id = %id, warnings = warnings.len(), "Safety verified");
    events.push(Event::SafetyVerified {
        id: id.clone(),
        warnings,
        updated_at: Utc::now(),
    });

    let medications = reconcile::reconcile(
        services.stock.as_ref(),
        services.alternatives.as_ref(),
        &services.matching,
        &analyzed.medications,
    )
    .await;
    tracing::info!(
        prescription_id = %id,
        found = medications.iter().filter(|m| m.found_in_stock).count(),
        total = medications.len(),
        "Inventory reconciled"
    );
    events.push(Event::InventoryReconciled {
        id,
        medications,
        updated_at: Utc::now(),
    });

    events
}
