//! Scored matching of free-text prescription names against stock entries.
//!
//! Containment against the generic name is the primary signal and brand
//! name containment the secondary one. Token overlap and edit distance
//! catch misspellings OCR and handwriting introduce, but only surface
//! candidates for the pharmacist: a fuzzy score never counts as a match
//! on its own. Candidates are ranked by score; equal scores keep catalog
//! order.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::model::{MatchCandidate, PrescribedMedication, StockItem};

const GENERIC_CONTAINMENT: f64 = 1.0;
const BRAND_CONTAINMENT: f64 = 0.9;
const FORM_BONUS: f64 = 0.05;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct MatchConfig {
    /// Minimum score for a stock item to count as the prescribed medicine.
    pub match_threshold: f64,
    /// Candidates within this distance of the best are reported as ambiguous.
    pub ambiguity_margin: f64,
    /// Minimum score for a stock item to be offered as an alternative.
    pub alternative_threshold: f64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.6,
            ambiguity_margin: 0.05,
            alternative_threshold: 0.35,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Scored<'a> {
    pub item: &'a StockItem,
    pub score: f64,
    /// One name contains the other; otherwise the score is a similarity.
    pub contained: bool,
}

impl Scored<'_> {
    pub fn candidate(&self) -> MatchCandidate {
        MatchCandidate {
            medicine_id: self.item.medicine_id.clone(),
            name: display_name(self.item),
            score: self.score,
        }
    }
}

pub fn display_name(item: &StockItem) -> String {
    if item.brand_name.is_empty() {
        item.generic_name.clone()
    } else {
        item.brand_name.clone()
    }
}

/// Every catalog entry scored against the medication, best first.
pub fn rank<'a>(medication: &PrescribedMedication, catalog: &'a [StockItem]) -> Vec<Scored<'a>> {
    let mut scored: Vec<Scored<'a>> = catalog
        .iter()
        .map(|item| {
            let (score, contained) = evaluate(medication, item);
            Scored {
                item,
                score,
                contained,
            }
        })
        .filter(|s| s.score > 0.0)
        .collect();

    // Stable: ties stay in catalog order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

pub fn score(medication: &PrescribedMedication, item: &StockItem) -> f64 {
    evaluate(medication, item).0
}

fn evaluate(medication: &PrescribedMedication, item: &StockItem) -> (f64, bool) {
    let generic = item.generic_name.to_lowercase();
    let brand = item.brand_name.to_lowercase();

    let mut best: f64 = 0.0;
    let mut contained = false;
    for name in medication.search_names() {
        let name = name.trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let (candidate, by_containment) = if contains_either(&name, &generic) {
            (GENERIC_CONTAINMENT, true)
        } else if contains_either(&name, &brand) {
            (BRAND_CONTAINMENT, true)
        } else {
            (similarity(&name, &generic).max(similarity(&name, &brand)), false)
        };
        if candidate > best {
            best = candidate;
            contained = by_containment;
        }
    }

    if best > 0.0 && best < GENERIC_CONTAINMENT && forms_agree(medication, item) {
        best = (best + FORM_BONUS).min(GENERIC_CONTAINMENT);
    }
    (best, contained)
}

fn contains_either(a: &str, b: &str) -> bool {
    !b.is_empty() && (a.contains(b) || b.contains(a))
}

fn forms_agree(medication: &PrescribedMedication, item: &StockItem) -> bool {
    match (&medication.dosage_form, &item.dosage_form) {
        (Some(a), Some(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

fn similarity(a: &str, b: &str) -> f64 {
    if b.is_empty() {
        return 0.0;
    }
    token_overlap(a, b).max(edit_similarity(a, b))
}

fn tokens(s: &str) -> HashSet<&str> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Jaccard overlap of alphanumeric tokens.
fn token_overlap(a: &str, b: &str) -> f64 {
    let a = tokens(a);
    let b = tokens(b);
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// `1 - levenshtein / longest`, over chars.
fn edit_similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / longest as f64
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn item(id: &str, generic: &str, brand: &str) -> StockItem {
        StockItem {
            medicine_id: id.into(),
            generic_name: generic.into(),
            brand_name: brand.into(),
            dosage_form: None,
            quantity: 10,
            unit_price: Decimal::ONE,
        }
    }

    #[test]
    fn levenshtein_distances() {
        let chars = |s: &str| s.chars().collect::<Vec<_>>();
        assert_eq!(levenshtein(&chars("kitten"), &chars("sitting")), 3);
        assert_eq!(levenshtein(&chars(""), &chars("abc")), 3);
        assert_eq!(levenshtein(&chars("same"), &chars("same")), 0);
    }

    #[test]
    fn generic_containment_is_full_score() {
        let mut med = PrescribedMedication::new("Napa", "", "");
        med.generic_name = Some("paracetamol".into());
        assert_eq!(score(&med, &item("1", "Paracetamol 500mg", "Napa")), 1.0);
    }

    #[test]
    fn brand_containment_is_secondary() {
        let med = PrescribedMedication::new("Seclo", "", "");
        assert_eq!(score(&med, &item("1", "Omeprazole", "Seclo 20")), BRAND_CONTAINMENT);
    }

    #[test]
    fn misspelling_scores_by_edit_distance() {
        let med = PrescribedMedication::new("amoxicilin", "", "");
        let s = score(&med, &item("1", "amoxicillin", "Moxacil"));
        assert!(s > 0.9 && s < 1.0, "{s}");
    }

    #[test]
    fn ranking_keeps_catalog_order_on_ties() {
        let catalog = vec![
            item("a", "Metformin", "Comet"),
            item("b", "Paracetamol", "Napa"),
            item("c", "Paracetamol", "Ace"),
        ];
        let mut med = PrescribedMedication::new("Fever tab", "", "");
        med.generic_name = Some("Paracetamol".into());

        let ranked = rank(&med, &catalog);
        assert_eq!(ranked[0].item.medicine_id, "b");
        assert_eq!(ranked[1].item.medicine_id, "c");
    }

    #[test]
    fn form_agreement_breaks_near_ties() {
        let mut syrup = item("1", "cefixime", "Fixim");
        syrup.dosage_form = Some("Syrup".into());
        let mut med = PrescribedMedication::new("cefixme", "", "");
        med.dosage_form = Some("syrup".into());

        let with_form = score(&med, &syrup);
        med.dosage_form = Some("capsule".into());
        assert!(with_form > score(&med, &syrup));
    }

    #[test]
    fn look_alike_names_score_without_containment() {
        let catalog = vec![item("amio", "Amiodarone", "Cordarone")];
        let med = PrescribedMedication::new("Amlodipine", "", "");

        let ranked = rank(&med, &catalog);
        assert!(!ranked[0].contained);
        assert!(ranked[0].score >= 0.5, "{}", ranked[0].score);
    }

    #[test]
    fn containment_is_flagged() {
        let catalog = vec![item("1", "Omeprazole", "Seclo 20")];
        let ranked = rank(&PrescribedMedication::new("Seclo", "", ""), &catalog);
        assert!(ranked[0].contained);
    }
}
