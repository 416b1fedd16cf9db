//! Safety verification stage. Advisory only: a failing check is logged
//! and contributes no warnings.

use super::model::{AnalyzedPrescription, PrescriptionWarning};
use super::services::{DosageVerifier, InteractionChecker};

/// Returns `analyzer ++ interactions ++ dosages`, most severe first.
/// Warnings from different sources are never merged, even when they flag
/// the same medications.
pub async fn verify(
    interactions: &dyn InteractionChecker,
    dosages: &dyn DosageVerifier,
    prescription: &AnalyzedPrescription,
) -> Vec<PrescriptionWarning> {
    let names = prescription.medication_names();
    let mut warnings = prescription.warnings.clone();

    match interactions.check_interactions(&names).await {
        Ok(found) => warnings.extend(found),
        Err(e) => tracing::warn!(
            prescription_id = %prescription.id,
            error = %e,
            "Interaction check failed, continuing without it"
        ),
    }

    match dosages
        .verify_dosages(&prescription.medications, &prescription.patient_info)
        .await
    {
        Ok(found) => warnings.extend(found),
        Err(e) => tracing::warn!(
            prescription_id = %prescription.id,
            error = %e,
            "Dosage verification failed, continuing without it"
        ),
    }

    sort_by_severity(&mut warnings);
    warnings
}

/// Stable: equal severities keep their source order.
pub fn sort_by_severity(warnings: &mut [PrescriptionWarning]) {
    warnings.sort_by(|a, b| b.severity.cmp(&a.severity));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prescriptions::memory::{FixedDosages, FixedInteractions};
    use crate::prescriptions::model::{PrescribedMedication, Severity, WarningType};

    fn warning(kind: WarningType, severity: Severity, message: &str) -> PrescriptionWarning {
        PrescriptionWarning::new(kind, severity, message)
    }

    fn prescription(names: &[&str]) -> AnalyzedPrescription {
        AnalyzedPrescription {
            id: "rx-1".into(),
            medications: names
                .iter()
                .map(|n| PrescribedMedication::new(n, "once daily", "5 days"))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn orders_most_severe_first() {
        let mut warnings = vec![
            warning(WarningType::Dosage, Severity::Low, "a"),
            warning(WarningType::Interaction, Severity::Critical, "b"),
            warning(WarningType::Allergy, Severity::Medium, "c"),
        ];
        sort_by_severity(&mut warnings);
        let order: Vec<Severity> = warnings.iter().map(|w| w.severity).collect();
        assert_eq!(order, vec![Severity::Critical, Severity::Medium, Severity::Low]);
    }

    #[tokio::test]
    async fn concatenates_sources_without_dedup() {
        let mut rx = prescription(&["Warfarin", "Aspirin"]);
        rx.warnings = vec![warning(WarningType::Dosage, Severity::Low, "analyzer")];
        let pair = ["Warfarin", "Aspirin"];
        let interactions = FixedInteractions::returning(vec![warning(
            WarningType::Interaction,
            Severity::High,
            "bleeding risk",
        )
        .with_medications(&pair)]);
        let dosages = FixedDosages::returning(vec![warning(
            WarningType::Interaction,
            Severity::Medium,
            "bleeding risk",
        )
        .with_medications(&pair)]);

        let warnings = verify(&interactions, &dosages, &rx).await;
        let messages: Vec<&str> = warnings.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages, vec!["bleeding risk", "bleeding risk", "analyzer"]);
        assert_eq!(warnings[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn failing_checks_are_soft() {
        let mut rx = prescription(&["Warfarin", "Aspirin"]);
        rx.warnings = vec![warning(WarningType::Dosage, Severity::Medium, "analyzer")];

        let warnings = verify(
            &FixedInteractions::failing("kb offline"),
            &FixedDosages::failing("kb offline"),
            &rx,
        )
        .await;
        assert_eq!(warnings, rx.warnings);
    }

    #[tokio::test]
    async fn single_medication_still_checks_interactions() {
        let interactions = FixedInteractions::returning(vec![warning(
            WarningType::Interaction,
            Severity::High,
            "warfarin interacts with common foods",
        )
        .with_medications(&["Warfarin"])]);
        let warnings = verify(&interactions, &FixedDosages::returning(vec![]), &prescription(&["Warfarin"])).await;
        assert_eq!(interactions.calls(), 1);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, Severity::High);
    }
}
