//! Collaborator contracts consumed by the pipeline.
//!
//! Every external system the pipeline talks to sits behind one of these
//! traits. Implementations report failures as [`CollaboratorError`]; the
//! stage adapters decide whether that failure is a hard gate, a soft
//! advisory gap or a fulfillment failure.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use super::history::HistoryEntry;
use super::model::{
    AnalyzedPrescription, DeliveryRequest, NewMedicine, PatientInfo, PrescribedMedication,
    PrescriptionWarning, Sale, StockItem, StockUpdate,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{source_name}: {message}")]
pub struct CollaboratorError {
    pub source_name: String,
    pub message: String,
}

impl CollaboratorError {
    pub fn new(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Optical text extraction over a captured image.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image_uri: &str) -> CollaboratorResult<String>;
}

/// AI analyzer turning OCR text and the image into a structured candidate.
#[async_trait]
pub trait PrescriptionAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str, image_uri: &str) -> CollaboratorResult<AnalyzedPrescription>;
}

#[async_trait]
pub trait InteractionChecker: Send + Sync {
    async fn check_interactions(
        &self,
        medication_names: &[String],
    ) -> CollaboratorResult<Vec<PrescriptionWarning>>;
}

#[async_trait]
pub trait DosageVerifier: Send + Sync {
    async fn verify_dosages(
        &self,
        medications: &[PrescribedMedication],
        patient: &PatientInfo,
    ) -> CollaboratorResult<Vec<PrescriptionWarning>>;
}

/// Live stock catalog.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Whole catalog in catalog order.
    async fn catalog(&self) -> CollaboratorResult<Vec<StockItem>>;

    async fn search(&self, name_query: &str) -> CollaboratorResult<Vec<StockItem>>;

    async fn add_medicine(&self, record: NewMedicine) -> CollaboratorResult<StockItem>;

    async fn update_stock(&self, stock_id: &str, fields: StockUpdate)
        -> CollaboratorResult<StockItem>;
}

#[async_trait]
pub trait SaleLedger: Send + Sync {
    /// Fails when a sale with the same id already exists.
    async fn create_sale(&self, sale: &Sale) -> CollaboratorResult<Sale>;

    async fn find_sale(&self, sale_id: &str) -> CollaboratorResult<Option<Sale>>;

    async fn mark_stock_applied(&self, sale_id: &str) -> CollaboratorResult<()>;

    /// Compensation for a sale whose stock effects could not be applied.
    async fn void_sale(&self, sale_id: &str) -> CollaboratorResult<()>;
}

#[async_trait]
pub trait DeliveryService: Send + Sync {
    async fn create_delivery_request(&self, request: &DeliveryRequest) -> CollaboratorResult<()>;
}

/// Substitutes suggested for a medication the pharmacy does not stock.
#[async_trait]
pub trait AlternativeLookup: Send + Sync {
    async fn alternatives(&self, medication: &PrescribedMedication) -> Vec<String>;
}

/// Append-only prescription history keyed by prescription id.
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    async fn append(&self, entry: HistoryEntry) -> CollaboratorResult<()>;

    async fn entries(&self, prescription_id: &str) -> CollaboratorResult<Vec<HistoryEntry>>;
}

/// Alternatives configured up front, keyed by lowercase generic name.
#[derive(Clone, Debug, Default)]
pub struct StaticAlternatives {
    by_generic: HashMap<String, Vec<String>>,
}

impl StaticAlternatives {
    pub fn new(by_generic: HashMap<String, Vec<String>>) -> Self {
        let by_generic = by_generic
            .into_iter()
            .map(|(generic, names)| (generic.to_lowercase(), names))
            .collect();
        Self { by_generic }
    }
}

#[async_trait]
impl AlternativeLookup for StaticAlternatives {
    async fn alternatives(&self, medication: &PrescribedMedication) -> Vec<String> {
        medication
            .search_names()
            .find_map(|name| self.by_generic.get(&name.to_lowercase()))
            .cloned()
            .unwrap_or_default()
    }
}

/// Collaborators the prescription aggregate works with.
#[derive(Clone)]
pub struct Services {
    pub extractor: Arc<dyn TextExtractor>,
    pub analyzer: Arc<dyn PrescriptionAnalyzer>,
    pub interactions: Arc<dyn InteractionChecker>,
    pub dosages: Arc<dyn DosageVerifier>,
    pub stock: Arc<dyn StockStore>,
    pub sales: Arc<dyn SaleLedger>,
    pub delivery: Arc<dyn DeliveryService>,
    pub alternatives: Arc<dyn AlternativeLookup>,
    pub matching: super::matcher::MatchConfig,
    pub pharmacy_id: String,
}
