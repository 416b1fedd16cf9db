//! Inventory reconciliation stage. Never fails: every medication leaves
//! with an annotation, matched or not.

use super::matcher::{self, display_name, MatchConfig};
use super::model::{PrescribedMedication, StockItem};
use super::services::{AlternativeLookup, StockStore};

pub async fn reconcile(
    stock: &dyn StockStore,
    alternatives: &dyn AlternativeLookup,
    config: &MatchConfig,
    medications: &[PrescribedMedication],
) -> Vec<PrescribedMedication> {
    let catalog = match stock.catalog().await {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::warn!(error = %e, "Stock catalog unavailable, marking all medications as not found");
            Vec::new()
        }
    };

    let mut reconciled = Vec::with_capacity(medications.len());
    for medication in medications {
        reconciled.push(annotate(medication, &catalog, alternatives, config).await);
    }
    reconciled
}

async fn annotate(
    medication: &PrescribedMedication,
    catalog: &[StockItem],
    alternatives: &dyn AlternativeLookup,
    config: &MatchConfig,
) -> PrescribedMedication {
    let mut annotated = medication.clone();
    let ranked = matcher::rank(medication, catalog);

    let matches: Vec<_> = ranked
        .iter()
        .filter(|s| s.score >= config.match_threshold)
        .collect();

    // Only a name contained in the catalog entry is trusted as a match;
    // a similar spelling may be a different drug.
    if let Some(best) = matches.iter().find(|s| s.contained) {
        annotated.found_in_stock = true;
        annotated.stock_quantity = Some(best.item.quantity);
        annotated.stock_id = Some(best.item.medicine_id.clone());
        annotated.alternative_medicines = None;

        let contenders: Vec<_> = matches
            .iter()
            .filter(|s| best.score - s.score <= config.ambiguity_margin)
            .map(|s| s.candidate())
            .collect();
        annotated.match_candidates = if contenders.len() > 1 {
            tracing::info!(
                medication = %medication.name,
                candidates = contenders.len(),
                "Ambiguous stock match"
            );
            contenders
        } else {
            Vec::new()
        };
        return annotated;
    }

    let mut suggestions = alternatives.alternatives(medication).await;
    for near in ranked
        .iter()
        .filter(|s| s.score >= config.alternative_threshold && s.score < config.match_threshold)
    {
        let name = display_name(near.item);
        if !suggestions.iter().any(|s| s.eq_ignore_ascii_case(&name)) {
            suggestions.push(name);
        }
    }

    let unconfirmed: Vec<_> = matches.iter().map(|s| s.candidate()).collect();
    if unconfirmed.is_empty() {
        tracing::info!(
            medication = %medication.name,
            alternatives = suggestions.len(),
            "Medication not found in stock"
        );
    } else {
        tracing::info!(
            medication = %medication.name,
            candidates = unconfirmed.len(),
            alternatives = suggestions.len(),
            "Similar names in stock need confirmation"
        );
    }

    annotated.found_in_stock = false;
    annotated.stock_quantity = None;
    annotated.stock_id = None;
    annotated.match_candidates = unconfirmed;
    annotated.alternative_medicines = Some(suggestions);
    annotated
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_decimal::Decimal;

    use super::*;
    use crate::prescriptions::memory::InMemoryStock;
    use crate::prescriptions::services::StaticAlternatives;

    fn item(id: &str, generic: &str, brand: &str, quantity: u32) -> StockItem {
        StockItem {
            medicine_id: id.into(),
            generic_name: generic.into(),
            brand_name: brand.into(),
            dosage_form: None,
            quantity,
            unit_price: Decimal::from(5),
        }
    }

    fn catalog() -> InMemoryStock {
        InMemoryStock::new(vec![
            item("m1", "Paracetamol 500mg", "Napa", 100),
            item("m2", "Omeprazole", "Seclo", 40),
            item("m3", "Paracetamol 500mg", "Ace", 12),
        ])
    }

    #[tokio::test]
    async fn generic_substring_marks_found_with_quantity() {
        let mut med = PrescribedMedication::new("Fever tablet", "1+0+1", "5 days");
        med.generic_name = Some("paracetamol".into());

        let out = reconcile(&catalog(), &StaticAlternatives::default(), &MatchConfig::default(), &[med]).await;
        assert!(out[0].found_in_stock);
        assert_eq!(out[0].stock_quantity, Some(100));
        assert_eq!(out[0].stock_id.as_deref(), Some("m1"));
        assert!(out[0].alternative_medicines.is_none());
    }

    #[tokio::test]
    async fn equal_matches_are_reported_as_candidates() {
        let mut med = PrescribedMedication::new("Fever tablet", "", "");
        med.generic_name = Some("Paracetamol".into());

        let out = reconcile(&catalog(), &StaticAlternatives::default(), &MatchConfig::default(), &[med]).await;
        let ids: Vec<&str> = out[0].match_candidates.iter().map(|c| c.medicine_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
    }

    #[tokio::test]
    async fn unmatched_medication_gets_alternatives() {
        let lookup = StaticAlternatives::new(HashMap::from([(
            "pantoprazole".to_string(),
            vec!["Maxpro".to_string()],
        )]));
        let med = PrescribedMedication::new("Pantoprazole", "once daily", "14 days");

        let out = reconcile(&catalog(), &lookup, &MatchConfig::default(), &[med]).await;
        assert!(!out[0].found_in_stock);
        assert!(out[0].stock_quantity.is_none());
        let alternatives = out[0].alternative_medicines.clone().unwrap();
        assert_eq!(alternatives[0], "Maxpro");
        assert!(alternatives.contains(&"Seclo".to_string()));
    }

    #[tokio::test]
    async fn catalog_failure_annotates_everything_as_missing() {
        let stock = catalog();
        stock.fail_catalog();
        let med = PrescribedMedication::new("Napa", "", "");

        let out = reconcile(&stock, &StaticAlternatives::default(), &MatchConfig::default(), &[med]).await;
        assert_eq!(out.len(), 1);
        assert!(!out[0].found_in_stock);
        assert_eq!(out[0].alternative_medicines, Some(vec![]));
    }

    #[tokio::test]
    async fn look_alike_names_are_never_matched() {
        let stock = InMemoryStock::new(vec![
            item("amio", "Amiodarone", "Cordarone", 30),
            item("lova", "Lovastatin", "Mevacor", 30),
        ]);
        let meds = vec![
            PrescribedMedication::new("Amlodipine", "once daily", "30 days"),
            PrescribedMedication::new("Losartan", "once daily", "30 days"),
        ];

        let out = reconcile(&stock, &StaticAlternatives::default(), &MatchConfig::default(), &meds).await;
        for med in &out {
            assert!(!med.found_in_stock, "{} was matched", med.name);
            assert!(med.stock_id.is_none());
            assert!(med.stock_quantity.is_none());
        }
        assert_eq!(out[0].match_candidates[0].medicine_id, "amio");
        assert_eq!(out[1].match_candidates[0].medicine_id, "lova");
    }

    #[tokio::test]
    async fn misspelling_is_offered_for_confirmation() {
        let stock = InMemoryStock::new(vec![item("amx", "Amoxicillin", "Moxacil", 50)]);
        let med = PrescribedMedication::new("amoxicilin", "1+1+1", "7 days");

        let out = reconcile(&stock, &StaticAlternatives::default(), &MatchConfig::default(), &[med]).await;
        assert!(!out[0].found_in_stock);
        let ids: Vec<&str> = out[0].match_candidates.iter().map(|c| c.medicine_id.as_str()).collect();
        assert_eq!(ids, vec!["amx"]);
        assert_eq!(out[0].alternative_medicines, Some(vec![]));
    }
}
