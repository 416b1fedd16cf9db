//! Turns a confirmed selection into a sale and its stock effects.
//!
//! Decisions for medications that are missing, only resemble stock items,
//! or are ambiguously matched are collected up front ([`required_decisions`])
//! so the pharmacist answers them in one prompt. Execution then runs as a
//! saga: catalog inserts, sale, stock decrements, delivery. A failed
//! decrement reverts the decrements already applied and voids the sale.
//!
//! The sale id is fixed per attempt, so an attempt interrupted after the
//! sale was written is recognised when fulfillment runs again.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::aggregate::{Stage, StageFailure, UserAction};
use super::model::{
    AnalyzedPrescription, Customer, DeliveryRequest, MatchCandidate, NewMedicine, PaymentMode,
    PrescribedMedication, Sale, SaleLineItem, StockItem, StockUpdate,
};
use super::quantity::derive_quantity;
use super::services::{CollaboratorError, Services};
use crate::errors::Error;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MissingDecision {
    Skip,
    AddToInventory,
}

/// One selected medication, by position on the prescription.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct Selection {
    pub index: usize,
    /// Stock item picked among the medication's candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_id: Option<String>,
    /// Required when the medication was not found in stock
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<MissingDecision>,
}

impl Selection {
    pub fn index(index: usize) -> Self {
        Self {
            index,
            stock_id: None,
            decision: None,
        }
    }

    pub fn decide(mut self, decision: MissingDecision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn choose(mut self, stock_id: &str) -> Self {
        self.stock_id = Some(stock_id.to_string());
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FulfillmentRequest {
    pub selection: Vec<Selection>,
    /// Defaults to the full sale total
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_amount: Option<Decimal>,
    #[serde(default)]
    pub payment_mode: PaymentMode,
    /// Present when the customer asked for home delivery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery: Option<Customer>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionReason {
    NotInStock { alternatives: Vec<String> },
    Ambiguous { candidates: Vec<MatchCandidate> },
    /// Not matched, but similarly named items are stocked
    Unconfirmed {
        candidates: Vec<MatchCandidate>,
        alternatives: Vec<String>,
    },
}

/// A question the pharmacist must answer before fulfillment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DecisionRequest {
    pub index: usize,
    pub medication: String,
    pub reason: DecisionReason,
    pub actions: Vec<UserAction>,
}

/// Every selected medication that needs a decision, in selection order.
pub fn required_decisions(
    prescription: &AnalyzedPrescription,
    selection: &[usize],
) -> Vec<DecisionRequest> {
    selection
        .iter()
        .filter_map(|&index| {
            let medication = prescription.medications.get(index)?;
            let reason = if !medication.found_in_stock && !medication.match_candidates.is_empty() {
                DecisionReason::Unconfirmed {
                    candidates: medication.match_candidates.clone(),
                    alternatives: medication.alternative_medicines.clone().unwrap_or_default(),
                }
            } else if !medication.found_in_stock {
                DecisionReason::NotInStock {
                    alternatives: medication.alternative_medicines.clone().unwrap_or_default(),
                }
            } else if medication.match_candidates.len() > 1 {
                DecisionReason::Ambiguous {
                    candidates: medication.match_candidates.clone(),
                }
            } else {
                return None;
            };
            let actions = match reason {
                DecisionReason::NotInStock { .. } => {
                    vec![UserAction::Skip, UserAction::AddToInventory]
                }
                DecisionReason::Ambiguous { .. } => vec![UserAction::ChooseStockItem],
                DecisionReason::Unconfirmed { .. } => vec![
                    UserAction::ChooseStockItem,
                    UserAction::Skip,
                    UserAction::AddToInventory,
                ],
            };
            Some(DecisionRequest {
                index,
                medication: medication.name.clone(),
                reason,
                actions,
            })
        })
        .collect()
}

/// Checks a selection against the reconciled prescription: non-empty, in
/// range, no repeats, and every open decision answered.
pub fn validate_request(
    prescription: &AnalyzedPrescription,
    request: &FulfillmentRequest,
) -> Result<(), Error> {
    if request.selection.is_empty() {
        return Err(Error::validation("Select at least one medication, or cancel"));
    }
    if request.paid_amount.is_some_and(|paid| paid < Decimal::ZERO) {
        return Err(Error::validation("Paid amount cannot be negative"));
    }

    let mut seen = HashSet::new();
    for selected in &request.selection {
        let medication = prescription.medications.get(selected.index).ok_or_else(|| {
            Error::validation(format!("No medication at position {}", selected.index))
        })?;
        if !seen.insert(selected.index) {
            return Err(Error::validation(format!(
                "{} is selected more than once",
                medication.name
            )));
        }

        if !medication.found_in_stock {
            match &selected.stock_id {
                Some(stock_id) if !is_candidate(medication, stock_id) => {
                    return Err(Error::validation(format!(
                        "{stock_id} is not a stock match for {}",
                        medication.name
                    )));
                }
                Some(_) => {}
                None if selected.decision.is_some() => {}
                None if medication.match_candidates.is_empty() => {
                    return Err(Error::validation(format!(
                        "{} is not in stock: skip it or add it to inventory",
                        medication.name
                    )));
                }
                None => {
                    return Err(Error::validation(format!(
                        "{} only resembles stocked items: choose one, skip it or add it to inventory",
                        medication.name
                    )));
                }
            }
            continue;
        }

        match &selected.stock_id {
            Some(stock_id) if !is_candidate(medication, stock_id) => {
                return Err(Error::validation(format!(
                    "{stock_id} is not a stock match for {}",
                    medication.name
                )));
            }
            None if medication.match_candidates.len() > 1 => {
                return Err(Error::validation(format!(
                    "{} matches several stock items: choose one",
                    medication.name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_candidate(medication: &PrescribedMedication, stock_id: &str) -> bool {
    medication.stock_id.as_deref() == Some(stock_id)
        || medication
            .match_candidates
            .iter()
            .any(|c| c.medicine_id == stock_id)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentStatus {
    Dispensed,
    Partial,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct StockLevel {
    pub medicine_id: String,
    pub quantity: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FulfillmentReceipt {
    pub sale: Sale,
    pub status: FulfillmentStatus,
    /// Medications the pharmacist chose to skip
    pub skipped: Vec<String>,
    /// Medications added to the catalog during fulfillment
    pub added_to_inventory: Vec<String>,
    pub stock_levels: Vec<StockLevel>,
    pub delivery_requested: bool,
}

#[derive(Error, Debug, PartialEq)]
pub enum FulfillmentError {
    #[error("Nothing to fulfill: every selected medication was skipped")]
    NothingToFulfill,

    #[error("Stock catalog unavailable: {0}")]
    StockUnavailable(CollaboratorError),

    #[error("Could not add {medication} to inventory: {source}")]
    CatalogInsert {
        medication: String,
        source: CollaboratorError,
    },

    #[error("{medication} is no longer in the stock catalog")]
    StockItemGone { medication: String },

    #[error("Sale could not be saved: {0}")]
    SaleRejected(CollaboratorError),

    #[error("An earlier attempt stopped after recording sale {sale_id}; it was voided")]
    Interrupted { sale_id: String },

    #[error("Stock update failed for {medication}: {source}")]
    StockUpdate {
        medication: String,
        source: CollaboratorError,
    },
}

impl FulfillmentError {
    pub fn next_action(&self) -> String {
        match self {
            Self::NothingToFulfill => {
                "Select at least one medication to dispense, or cancel".to_string()
            }
            Self::StockUnavailable(_) => "Retry once the stock catalog is reachable".to_string(),
            Self::CatalogInsert { medication, .. } => {
                format!("Retry, or skip {medication}")
            }
            Self::StockItemGone { medication } => {
                format!("Skip {medication} or add it to inventory, then confirm again")
            }
            Self::SaleRejected(_) => "Retry the sale; no stock was changed".to_string(),
            Self::Interrupted { .. } => {
                "Check stock levels of the selected medications, then retry".to_string()
            }
            Self::StockUpdate { .. } => {
                "Retry; the sale was voided and stock restored".to_string()
            }
        }
    }

    fn actions(&self) -> Vec<UserAction> {
        match self {
            Self::NothingToFulfill => vec![UserAction::ChangeSelection, UserAction::Cancel],
            Self::CatalogInsert { .. } => {
                vec![UserAction::Retry, UserAction::Skip, UserAction::Cancel]
            }
            Self::StockItemGone { .. } => {
                vec![UserAction::Skip, UserAction::AddToInventory, UserAction::Cancel]
            }
            _ => vec![UserAction::Retry, UserAction::Cancel],
        }
    }

    pub fn to_failure(&self) -> StageFailure {
        StageFailure {
            stage: Stage::Fulfillment,
            message: format!("{self}. {}", self.next_action()),
            actions: self.actions(),
        }
    }
}

struct Line {
    item: SaleLineItem,
    medication: String,
}

/// Runs the confirmed selection under `sale_id`. Medications are handled
/// in selection order.
pub async fn execute(
    services: &Services,
    prescription: &AnalyzedPrescription,
    request: &FulfillmentRequest,
    sale_id: &str,
) -> Result<FulfillmentReceipt, FulfillmentError> {
    let catalog = services
        .stock
        .catalog()
        .await
        .map_err(FulfillmentError::StockUnavailable)?;

    let mut lines: Vec<Line> = Vec::new();
    let mut skipped = Vec::new();
    let mut added_to_inventory = Vec::new();

    for selected in &request.selection {
        let Some(medication) = prescription.medications.get(selected.index) else {
            continue;
        };

        let stock = match matched_item(medication, selected, &catalog)? {
            Some(item) => item.clone(),
            None => match selected.decision {
                Some(MissingDecision::AddToInventory) => {
                    let item = add_to_inventory(services, medication).await?;
                    added_to_inventory.push(medication.name.clone());
                    item
                }
                Some(MissingDecision::Skip) | None => {
                    tracing::info!(
                        prescription_id = %prescription.id,
                        medication = %medication.name,
                        "Medication skipped"
                    );
                    skipped.push(medication.name.clone());
                    continue;
                }
            },
        };

        let quantity = derive_quantity(&medication.frequency, &medication.duration);
        lines.push(Line {
            item: SaleLineItem::new(&stock, &medication.name, quantity),
            medication: medication.name.clone(),
        });
    }

    if lines.is_empty() {
        return Err(FulfillmentError::NothingToFulfill);
    }

    let status = if skipped.is_empty() {
        FulfillmentStatus::Dispensed
    } else {
        FulfillmentStatus::Partial
    };

    let earlier = services
        .sales
        .find_sale(sale_id)
        .await
        .map_err(FulfillmentError::SaleRejected)?;
    if let Some(sale) = earlier {
        let stock_levels = resume(services, &sale, &lines).await?;
        let delivery_requested = match &request.delivery {
            Some(customer) => request_delivery(services, customer, &sale).await,
            None => false,
        };
        return Ok(FulfillmentReceipt {
            sale,
            status,
            skipped,
            added_to_inventory,
            stock_levels,
            delivery_requested,
        });
    }

    let sale = Sale::from_lines(
        sale_id.to_string(),
        &prescription.id,
        lines.iter().map(|l| l.item.clone()).collect(),
        request.paid_amount,
        request.payment_mode,
    );
    let mut sale = services
        .sales
        .create_sale(&sale)
        .await
        .map_err(FulfillmentError::SaleRejected)?;
    tracing::info!(
        prescription_id = %prescription.id,
        sale_id = %sale.id,
        total = %sale.total_amount,
        "Sale recorded"
    );

    let (stock_levels, applied) = decrement_stock(services, &sale, &lines, catalog).await?;
    if let Err(source) = services.sales.mark_stock_applied(&sale.id).await {
        tracing::error!(sale_id = %sale.id, error = %source, "Sale could not be marked, compensating");
        compensate(services, &sale, applied).await;
        return Err(FulfillmentError::SaleRejected(source));
    }
    sale.stock_applied = true;

    let delivery_requested = match &request.delivery {
        Some(customer) => request_delivery(services, customer, &sale).await,
        None => false,
    };

    Ok(FulfillmentReceipt {
        sale,
        status,
        skipped,
        added_to_inventory,
        stock_levels,
        delivery_requested,
    })
}

/// A sale already recorded under this attempt's id. Completed stock
/// effects are reported as they stand; anything else is voided, since
/// which decrements landed is unknown.
async fn resume(
    services: &Services,
    sale: &Sale,
    lines: &[Line],
) -> Result<Vec<StockLevel>, FulfillmentError> {
    if !sale.stock_applied || sale.voided {
        if !sale.voided {
            services
                .sales
                .void_sale(&sale.id)
                .await
                .map_err(FulfillmentError::SaleRejected)?;
        }
        tracing::warn!(sale_id = %sale.id, "Interrupted sale voided");
        return Err(FulfillmentError::Interrupted {
            sale_id: sale.id.clone(),
        });
    }

    tracing::info!(sale_id = %sale.id, "Resuming fulfillment of applied sale");
    let current: HashMap<String, u32> = services
        .stock
        .catalog()
        .await
        .map_err(FulfillmentError::StockUnavailable)?
        .into_iter()
        .map(|i| (i.medicine_id, i.quantity))
        .collect();
    Ok(stock_levels(lines, &current))
}

fn matched_item<'a>(
    medication: &PrescribedMedication,
    selected: &Selection,
    catalog: &'a [StockItem],
) -> Result<Option<&'a StockItem>, FulfillmentError> {
    let matched = medication.stock_id.as_ref().filter(|_| medication.found_in_stock);
    let Some(stock_id) = selected.stock_id.as_ref().or(matched) else {
        return Ok(None);
    };

    match catalog.iter().find(|i| &i.medicine_id == stock_id) {
        Some(item) => Ok(Some(item)),
        None if selected.decision.is_some() => {
            tracing::warn!(medication = %medication.name, %stock_id, "Stock item no longer in catalog, applying decision");
            Ok(None)
        }
        None => {
            tracing::warn!(medication = %medication.name, %stock_id, "Stock item no longer in catalog");
            Err(FulfillmentError::StockItemGone {
                medication: medication.name.clone(),
            })
        }
    }
}

/// Reuses a catalog entry with the same names, so a retried attempt does
/// not insert the medication twice.
async fn add_to_inventory(
    services: &Services,
    medication: &PrescribedMedication,
) -> Result<StockItem, FulfillmentError> {
    let insert_error = |source| FulfillmentError::CatalogInsert {
        medication: medication.name.clone(),
        source,
    };
    let record = NewMedicine::from_prescribed(medication);

    let existing = services
        .stock
        .search(&record.brand_name)
        .await
        .map_err(insert_error)?
        .into_iter()
        .find(|i| {
            i.generic_name.eq_ignore_ascii_case(&record.generic_name)
                && i.brand_name.eq_ignore_ascii_case(&record.brand_name)
        });
    if let Some(item) = existing {
        tracing::info!(medication = %medication.name, medicine_id = %item.medicine_id, "Medicine already in inventory");
        return Ok(item);
    }

    let inserted = services
        .stock
        .add_medicine(record)
        .await
        .map_err(insert_error)?;
    tracing::info!(medication = %medication.name, medicine_id = %inserted.medicine_id, "Medicine added to inventory");

    // Read back through search so later lines see the stored entry.
    let found = services
        .stock
        .search(&inserted.brand_name)
        .await
        .map_err(insert_error)?
        .into_iter()
        .find(|i| i.medicine_id == inserted.medicine_id);
    Ok(found.unwrap_or(inserted))
}

/// Applies every decrement or none: on the first failure the applied
/// ones are restored and the sale is voided. Returns the resulting levels
/// and the prior quantity of every item touched.
async fn decrement_stock(
    services: &Services,
    sale: &Sale,
    lines: &[Line],
    snapshot: Vec<StockItem>,
) -> Result<(Vec<StockLevel>, Vec<(String, u32)>), FulfillmentError> {
    let catalog = match services.stock.catalog().await {
        Ok(fresh) => fresh,
        Err(e) => {
            tracing::warn!(error = %e, "Stock re-read failed, using catalog read at start");
            snapshot
        }
    };
    let mut current: HashMap<String, u32> = catalog
        .into_iter()
        .map(|i| (i.medicine_id, i.quantity))
        .collect();

    let mut applied: Vec<(String, u32)> = Vec::new();
    for line in lines {
        let id = &line.item.medicine_id;
        let before = current.get(id).copied().unwrap_or(0);
        let after = before.saturating_sub(line.item.quantity);

        let update = StockUpdate {
            quantity: Some(after),
            ..Default::default()
        };
        match services.stock.update_stock(id, update).await {
            Ok(_) => {
                applied.push((id.clone(), before));
                current.insert(id.clone(), after);
            }
            Err(source) => {
                tracing::error!(sale_id = %sale.id, medicine_id = %id, error = %source, "Stock update failed, compensating");
                compensate(services, sale, applied).await;
                return Err(FulfillmentError::StockUpdate {
                    medication: line.medication.clone(),
                    source,
                });
            }
        }
    }

    Ok((stock_levels(lines, &current), applied))
}

fn stock_levels(lines: &[Line], current: &HashMap<String, u32>) -> Vec<StockLevel> {
    let mut touched = HashSet::new();
    lines
        .iter()
        .filter(|l| touched.insert(l.item.medicine_id.clone()))
        .map(|l| StockLevel {
            medicine_id: l.item.medicine_id.clone(),
            quantity: current.get(&l.item.medicine_id).copied().unwrap_or(0),
        })
        .collect()
}

async fn compensate(services: &Services, sale: &Sale, applied: Vec<(String, u32)>) {
    for (medicine_id, quantity) in applied.into_iter().rev() {
        let restore = StockUpdate {
            quantity: Some(quantity),
            ..Default::default()
        };
        if let Err(e) = services.stock.update_stock(&medicine_id, restore).await {
            tracing::error!(%medicine_id, quantity, error = %e, "Stock restore failed");
        }
    }
    if let Err(e) = services.sales.void_sale(&sale.id).await {
        tracing::error!(sale_id = %sale.id, error = %e, "Sale void failed");
    }
}

async fn request_delivery(services: &Services, customer: &Customer, sale: &Sale) -> bool {
    let request = DeliveryRequest {
        pharmacy_id: services.pharmacy_id.clone(),
        customer: customer.clone(),
        items: sale.items.clone(),
        payment_mode: sale.payment_mode,
    };
    match services.delivery.create_delivery_request(&request).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(sale_id = %sale.id, error = %e, "Delivery request failed, sale kept");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::prescriptions::memory::{
        stock_item, FixedExtractor, InMemoryDelivery, InMemoryServices, InMemorySales,
    };

    const SALE_ID: &str = "rx-1-sale-1";

    fn found(name: &str, frequency: &str, duration: &str, stock_id: &str, quantity: u32) -> PrescribedMedication {
        let mut medication = PrescribedMedication::new(name, frequency, duration);
        medication.found_in_stock = true;
        medication.stock_id = Some(stock_id.to_string());
        medication.stock_quantity = Some(quantity);
        medication
    }

    fn missing(name: &str) -> PrescribedMedication {
        let mut medication = PrescribedMedication::new(name, "once daily", "3 days");
        medication.alternative_medicines = Some(vec!["Substitute".into()]);
        medication
    }

    fn prescription(medications: Vec<PrescribedMedication>) -> AnalyzedPrescription {
        AnalyzedPrescription {
            id: "rx-1".into(),
            medications,
            ..Default::default()
        }
    }

    fn request(selection: Vec<Selection>) -> FulfillmentRequest {
        FulfillmentRequest {
            selection,
            paid_amount: None,
            payment_mode: PaymentMode::Cash,
            delivery: None,
        }
    }

    fn harness(stock: Vec<StockItem>) -> (InMemoryServices, Services) {
        let h = InMemoryServices::new(stock, AnalyzedPrescription::default());
        let services = h.services(FixedExtractor::text(""));
        (h, services)
    }

    #[tokio::test]
    async fn napa_scenario() {
        let (h, services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 100, 5)]);
        let rx = prescription(vec![found("Napa", "1+0+1", "5 days", "m1", 100)]);

        let receipt = execute(&services, &rx, &request(vec![Selection::index(0)]), SALE_ID).await.unwrap();
        assert_eq!(receipt.sale.items.len(), 1);
        assert_eq!(receipt.sale.items[0].quantity, 10);
        assert_eq!(receipt.sale.items[0].total_amount, Decimal::from(50));
        assert_eq!(receipt.sale.total_amount, Decimal::from(50));
        assert_eq!(receipt.status, FulfillmentStatus::Dispensed);
        assert_eq!(receipt.sale.id, SALE_ID);
        assert!(receipt.sale.stock_applied);
        assert_eq!(h.stock.item("m1").unwrap().quantity, 90);
        assert_eq!(h.sales.sales().len(), 1);
    }

    #[tokio::test]
    async fn totals_and_due_amount_are_consistent() {
        let (_h, services) = harness(vec![
            stock_item("m1", "Paracetamol", "Napa", 100, 5),
            stock_item("m2", "Omeprazole", "Seclo", 50, 7),
        ]);
        let rx = prescription(vec![
            found("Napa", "1+0+1", "5 days", "m1", 100),
            found("Seclo", "once daily", "14 days", "m2", 50),
        ]);
        let mut req = request(vec![Selection::index(0), Selection::index(1)]);
        req.paid_amount = Some(Decimal::from(100));
        req.payment_mode = PaymentMode::Due;

        let sale = execute(&services, &rx, &req, SALE_ID).await.unwrap().sale;
        let lines: Decimal = sale.items.iter().map(|l| l.total_amount).sum();
        assert_eq!(lines, sale.total_amount);
        assert_eq!(sale.total_amount, Decimal::from(148));
        assert_eq!(sale.due_amount, Decimal::from(48));
    }

    #[tokio::test]
    async fn stock_never_goes_negative() {
        let (h, services) = harness(vec![stock_item("m1", "Amoxicillin", "Moxacil", 6, 3)]);
        let rx = prescription(vec![found("Moxacil", "three times daily", "7 days", "m1", 6)]);

        let receipt = execute(&services, &rx, &request(vec![Selection::index(0)]), SALE_ID).await.unwrap();
        assert_eq!(receipt.sale.items[0].quantity, 21);
        assert_eq!(h.stock.item("m1").unwrap().quantity, 0);
        assert_eq!(receipt.stock_levels, vec![StockLevel { medicine_id: "m1".into(), quantity: 0 }]);
    }

    #[tokio::test]
    async fn all_skipped_persists_nothing() {
        let (h, services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 100, 5)]);
        let rx = prescription(vec![missing("Rare drug"), missing("Other drug")]);
        let req = request(vec![
            Selection::index(0).decide(MissingDecision::Skip),
            Selection::index(1).decide(MissingDecision::Skip),
        ]);

        let err = execute(&services, &rx, &req, SALE_ID).await.unwrap_err();
        assert_eq!(err, FulfillmentError::NothingToFulfill);
        assert!(h.sales.sales().is_empty());
        assert_eq!(h.stock.update_count(), 0);
    }

    #[tokio::test]
    async fn skipped_medication_makes_partial() {
        let (_h, services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 100, 5)]);
        let rx = prescription(vec![found("Napa", "1+0+1", "5 days", "m1", 100), missing("Rare drug")]);
        let req = request(vec![
            Selection::index(0),
            Selection::index(1).decide(MissingDecision::Skip),
        ]);

        let receipt = execute(&services, &rx, &req, SALE_ID).await.unwrap();
        assert_eq!(receipt.status, FulfillmentStatus::Partial);
        assert_eq!(receipt.skipped, vec!["Rare drug"]);
        assert_eq!(receipt.sale.items.len(), 1);
    }

    #[tokio::test]
    async fn add_to_inventory_creates_zero_priced_entry() {
        let (h, services) = harness(vec![]);
        let rx = prescription(vec![missing("Rare drug")]);
        let req = request(vec![Selection::index(0).decide(MissingDecision::AddToInventory)]);

        let receipt = execute(&services, &rx, &req, SALE_ID).await.unwrap();
        assert_eq!(receipt.added_to_inventory, vec!["Rare drug"]);
        assert_eq!(receipt.sale.items[0].quantity, 3);
        assert_eq!(receipt.sale.total_amount, Decimal::ZERO);

        let items = h.stock.items();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].brand_name, "Rare drug");
        assert_eq!(items[0].quantity, 0);
    }

    #[tokio::test]
    async fn failed_catalog_insert_aborts_before_sale() {
        let (h, services) = harness(vec![]);
        h.stock.fail_inserts();
        let rx = prescription(vec![missing("Rare drug")]);
        let req = request(vec![Selection::index(0).decide(MissingDecision::AddToInventory)]);

        let err = execute(&services, &rx, &req, SALE_ID).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::CatalogInsert { .. }));
        assert!(err.to_failure().actions.contains(&UserAction::Skip));
        assert!(h.sales.sales().is_empty());
    }

    #[tokio::test]
    async fn sale_failure_leaves_stock_untouched() {
        let (h, mut services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 100, 5)]);
        services.sales = Arc::new(InMemorySales::failing());
        let rx = prescription(vec![found("Napa", "1+0+1", "5 days", "m1", 100)]);

        let err = execute(&services, &rx, &request(vec![Selection::index(0)]), SALE_ID).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::SaleRejected(_)));
        assert_eq!(h.stock.item("m1").unwrap().quantity, 100);
        assert_eq!(h.stock.update_count(), 0);
    }

    #[tokio::test]
    async fn stock_failure_restores_and_voids_sale() {
        let (h, services) = harness(vec![
            stock_item("m1", "Paracetamol", "Napa", 100, 5),
            stock_item("m2", "Omeprazole", "Seclo", 50, 7),
        ]);
        h.stock.fail_updates_for("m2");
        let rx = prescription(vec![
            found("Napa", "1+0+1", "5 days", "m1", 100),
            found("Seclo", "once daily", "14 days", "m2", 50),
        ]);

        let err = execute(&services, &rx, &request(vec![Selection::index(0), Selection::index(1)]), SALE_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::StockUpdate { ref medication, .. } if medication == "Seclo"));
        assert_eq!(h.stock.item("m1").unwrap().quantity, 100);
        assert_eq!(h.stock.item("m2").unwrap().quantity, 50);
        assert!(h.sales.sales().is_empty());
        assert_eq!(h.sales.voided().len(), 1);
    }

    #[tokio::test]
    async fn same_stock_item_on_two_lines_accumulates() {
        let (h, services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 30, 1)]);
        let rx = prescription(vec![
            found("Napa", "1+0+1", "5 days", "m1", 30),
            found("Napa Extra", "once daily", "5 days", "m1", 30),
        ]);

        let receipt = execute(&services, &rx, &request(vec![Selection::index(0), Selection::index(1)]), SALE_ID)
            .await
            .unwrap();
        assert_eq!(h.stock.item("m1").unwrap().quantity, 15);
        assert_eq!(receipt.stock_levels.len(), 1);
    }

    #[tokio::test]
    async fn delivery_failure_keeps_sale() {
        let (h, mut services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 100, 5)]);
        services.delivery = Arc::new(InMemoryDelivery::failing());
        let rx = prescription(vec![found("Napa", "1+0+1", "5 days", "m1", 100)]);
        let mut req = request(vec![Selection::index(0)]);
        req.delivery = Some(Customer {
            name: "Rahim".into(),
            phone: Some("01700000000".into()),
            address: Some("Road 4, Dhanmondi".into()),
        });

        let receipt = execute(&services, &rx, &req, SALE_ID).await.unwrap();
        assert!(!receipt.delivery_requested);
        assert_eq!(h.sales.sales().len(), 1);
        assert_eq!(h.stock.item("m1").unwrap().quantity, 90);
    }

    #[tokio::test]
    async fn delivery_request_carries_sale_items() {
        let (h, services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 100, 5)]);
        let rx = prescription(vec![found("Napa", "1+0+1", "5 days", "m1", 100)]);
        let mut req = request(vec![Selection::index(0)]);
        req.delivery = Some(Customer {
            name: "Rahim".into(),
            phone: None,
            address: None,
        });

        let receipt = execute(&services, &rx, &req, SALE_ID).await.unwrap();
        assert!(receipt.delivery_requested);
        let requests = h.delivery.requests();
        assert_eq!(requests[0].pharmacy_id, "pharmacy-1");
        assert_eq!(requests[0].items, receipt.sale.items);
    }

    #[test]
    fn decisions_cover_missing_and_ambiguous() {
        let mut ambiguous = found("Fever tab", "", "", "m1", 10);
        ambiguous.match_candidates = vec![
            MatchCandidate { medicine_id: "m1".into(), name: "Napa".into(), score: 1.0 },
            MatchCandidate { medicine_id: "m3".into(), name: "Ace".into(), score: 1.0 },
        ];
        let rx = prescription(vec![found("Napa", "", "", "m1", 10), missing("Rare drug"), ambiguous]);

        let decisions = required_decisions(&rx, &[0, 1, 2]);
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].index, 1);
        assert!(matches!(&decisions[0].reason, DecisionReason::NotInStock { alternatives } if alternatives == &vec!["Substitute".to_string()]));
        assert_eq!(decisions[1].actions, vec![UserAction::ChooseStockItem]);
    }

    #[test]
    fn validation_names_the_next_action() {
        let rx = prescription(vec![found("Napa", "", "", "m1", 10), missing("Rare drug")]);

        let err = validate_request(&rx, &request(vec![Selection::index(1)])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Rare drug is not in stock: skip it or add it to inventory"
        );
        assert!(validate_request(&rx, &request(vec![Selection::index(5)])).is_err());
        assert!(validate_request(&rx, &request(vec![Selection::index(0), Selection::index(0)])).is_err());
        assert!(validate_request(&rx, &request(vec![Selection::index(0).choose("m9")])).is_err());
        assert!(validate_request(
            &rx,
            &request(vec![Selection::index(0), Selection::index(1).decide(MissingDecision::Skip)])
        )
        .is_ok());
    }

    fn resembling(name: &str, candidate: &str) -> PrescribedMedication {
        let mut medication = PrescribedMedication::new(name, "1+1+1", "7 days");
        medication.match_candidates = vec![MatchCandidate {
            medicine_id: candidate.into(),
            name: "Moxacil".into(),
            score: 0.91,
        }];
        medication.alternative_medicines = Some(vec![]);
        medication
    }

    #[test]
    fn similar_name_needs_confirmation() {
        let rx = prescription(vec![resembling("amoxicilin", "amx")]);

        let decisions = required_decisions(&rx, &[0]);
        assert!(matches!(&decisions[0].reason, DecisionReason::Unconfirmed { candidates, .. } if candidates[0].medicine_id == "amx"));
        assert_eq!(
            decisions[0].actions,
            vec![UserAction::ChooseStockItem, UserAction::Skip, UserAction::AddToInventory]
        );

        let err = validate_request(&rx, &request(vec![Selection::index(0)])).unwrap_err();
        assert!(err.to_string().contains("only resembles"), "{err}");
        assert!(validate_request(&rx, &request(vec![Selection::index(0).choose("m9")])).is_err());
        assert!(validate_request(&rx, &request(vec![Selection::index(0).choose("amx")])).is_ok());
        assert!(validate_request(&rx, &request(vec![Selection::index(0).decide(MissingDecision::Skip)])).is_ok());
    }

    #[tokio::test]
    async fn confirmed_candidate_is_dispensed() {
        let (h, services) = harness(vec![stock_item("amx", "Amoxicillin", "Moxacil", 50, 3)]);
        let rx = prescription(vec![resembling("amoxicilin", "amx")]);

        let receipt = execute(&services, &rx, &request(vec![Selection::index(0).choose("amx")]), SALE_ID)
            .await
            .unwrap();
        assert_eq!(receipt.sale.items[0].medicine_id, "amx");
        assert_eq!(h.stock.item("amx").unwrap().quantity, 29);
    }

    #[tokio::test]
    async fn vanished_stock_item_stops_before_sale() {
        let (h, services) = harness(vec![stock_item("m2", "Omeprazole", "Seclo", 50, 7)]);
        let rx = prescription(vec![
            found("Napa", "1+0+1", "5 days", "m1", 100),
            found("Seclo", "once daily", "14 days", "m2", 50),
        ]);

        let err = execute(&services, &rx, &request(vec![Selection::index(0), Selection::index(1)]), SALE_ID)
            .await
            .unwrap_err();
        assert_eq!(err, FulfillmentError::StockItemGone { medication: "Napa".into() });
        assert!(err.to_failure().actions.contains(&UserAction::AddToInventory));
        assert!(h.sales.sales().is_empty());
        assert_eq!(h.stock.update_count(), 0);

        let req = request(vec![
            Selection::index(0).decide(MissingDecision::Skip),
            Selection::index(1),
        ]);
        let receipt = execute(&services, &rx, &req, SALE_ID).await.unwrap();
        assert_eq!(receipt.status, FulfillmentStatus::Partial);
        assert_eq!(receipt.skipped, vec!["Napa"]);
    }

    #[tokio::test]
    async fn retried_insert_reuses_catalog_entry() {
        let (h, mut services) = harness(vec![]);
        services.sales = Arc::new(InMemorySales::failing());
        let rx = prescription(vec![missing("Rare drug")]);
        let req = request(vec![Selection::index(0).decide(MissingDecision::AddToInventory)]);

        for _ in 0..2 {
            let err = execute(&services, &rx, &req, SALE_ID).await.unwrap_err();
            assert!(matches!(err, FulfillmentError::SaleRejected(_)));
        }
        assert_eq!(h.stock.items().len(), 1);
    }

    #[tokio::test]
    async fn rerun_after_applied_sale_does_not_decrement_again() {
        let (h, services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 90, 5)]);
        let mut earlier = Sale::from_lines(SALE_ID.into(), "rx-1", vec![], None, PaymentMode::Cash);
        earlier.stock_applied = true;
        h.sales.record(earlier);
        let rx = prescription(vec![found("Napa", "1+0+1", "5 days", "m1", 100)]);

        let receipt = execute(&services, &rx, &request(vec![Selection::index(0)]), SALE_ID)
            .await
            .unwrap();
        assert_eq!(receipt.sale.id, SALE_ID);
        assert_eq!(receipt.stock_levels, vec![StockLevel { medicine_id: "m1".into(), quantity: 90 }]);
        assert_eq!(h.stock.update_count(), 0);
        assert_eq!(h.sales.sales().len(), 1);
    }

    #[tokio::test]
    async fn interrupted_sale_is_voided() {
        let (h, services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 95, 5)]);
        h.sales.record(Sale::from_lines(SALE_ID.into(), "rx-1", vec![], None, PaymentMode::Cash));
        let rx = prescription(vec![found("Napa", "1+0+1", "5 days", "m1", 100)]);

        let err = execute(&services, &rx, &request(vec![Selection::index(0)]), SALE_ID)
            .await
            .unwrap_err();
        assert_eq!(err, FulfillmentError::Interrupted { sale_id: SALE_ID.into() });
        assert_eq!(h.sales.voided(), vec![SALE_ID.to_string()]);
        assert_eq!(h.stock.update_count(), 0);
    }

    #[tokio::test]
    async fn unmarked_sale_is_compensated() {
        let (h, services) = harness(vec![stock_item("m1", "Paracetamol", "Napa", 100, 5)]);
        h.sales.fail_stock_marks();
        let rx = prescription(vec![found("Napa", "1+0+1", "5 days", "m1", 100)]);

        let err = execute(&services, &rx, &request(vec![Selection::index(0)]), SALE_ID)
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::SaleRejected(_)));
        assert_eq!(h.stock.item("m1").unwrap().quantity, 100);
        assert_eq!(h.sales.voided(), vec![SALE_ID.to_string()]);
    }
}
