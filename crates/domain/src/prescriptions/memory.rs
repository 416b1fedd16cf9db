//! In-memory collaborators for tests and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::history::HistoryEntry;
use super::matcher::MatchConfig;
use super::model::{
    AnalyzedPrescription, DeliveryRequest, NewMedicine, PatientInfo, PrescribedMedication,
    PrescriptionWarning, Sale, StockItem, StockUpdate,
};
use super::services::{
    CollaboratorError, CollaboratorResult, DeliveryService, DosageVerifier, HistoryRepository,
    InteractionChecker, PrescriptionAnalyzer, SaleLedger, Services, StaticAlternatives,
    StockStore, TextExtractor,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct FixedExtractor {
    result: CollaboratorResult<String>,
}

impl FixedExtractor {
    pub fn text(text: &str) -> Self {
        Self { result: Ok(text.to_string()) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(CollaboratorError::new("ocr", message)),
        }
    }
}

#[async_trait]
impl TextExtractor for FixedExtractor {
    async fn extract_text(&self, _image_uri: &str) -> CollaboratorResult<String> {
        self.result.clone()
    }
}

pub struct FixedAnalyzer {
    result: CollaboratorResult<AnalyzedPrescription>,
    calls: AtomicUsize,
}

impl FixedAnalyzer {
    pub fn returning(prescription: AnalyzedPrescription) -> Self {
        Self {
            result: Ok(prescription),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(CollaboratorError::new("analyzer", message)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrescriptionAnalyzer for FixedAnalyzer {
    async fn analyze(&self, _text: &str, _image_uri: &str) -> CollaboratorResult<AnalyzedPrescription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub struct FixedInteractions {
    result: CollaboratorResult<Vec<PrescriptionWarning>>,
    calls: AtomicUsize,
}

impl FixedInteractions {
    pub fn returning(warnings: Vec<PrescriptionWarning>) -> Self {
        Self {
            result: Ok(warnings),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(CollaboratorError::new("interactions", message)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InteractionChecker for FixedInteractions {
    async fn check_interactions(
        &self,
        _medication_names: &[String],
    ) -> CollaboratorResult<Vec<PrescriptionWarning>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

pub struct FixedDosages {
    result: CollaboratorResult<Vec<PrescriptionWarning>>,
}

impl FixedDosages {
    pub fn returning(warnings: Vec<PrescriptionWarning>) -> Self {
        Self { result: Ok(warnings) }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(CollaboratorError::new("dosages", message)),
        }
    }
}

#[async_trait]
impl DosageVerifier for FixedDosages {
    async fn verify_dosages(
        &self,
        _medications: &[PrescribedMedication],
        _patient: &PatientInfo,
    ) -> CollaboratorResult<Vec<PrescriptionWarning>> {
        self.result.clone()
    }
}

/// Stock catalog kept in insertion order.
#[derive(Default)]
pub struct InMemoryStock {
    items: Mutex<Vec<StockItem>>,
    fail_catalog: AtomicBool,
    fail_inserts: AtomicBool,
    failing_updates: Mutex<HashSet<String>>,
    updates: AtomicUsize,
}

impl InMemoryStock {
    pub fn new(items: Vec<StockItem>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Default::default()
        }
    }

    pub fn item(&self, medicine_id: &str) -> Option<StockItem> {
        lock(&self.items)
            .iter()
            .find(|i| i.medicine_id == medicine_id)
            .cloned()
    }

    pub fn items(&self) -> Vec<StockItem> {
        lock(&self.items).clone()
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn fail_catalog(&self) {
        self.fail_catalog.store(true, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    /// Makes every decrement of this item fail; restores still succeed.
    pub fn fail_updates_for(&self, medicine_id: &str) {
        lock(&self.failing_updates).insert(medicine_id.to_string());
    }
}

#[async_trait]
impl StockStore for InMemoryStock {
    async fn catalog(&self) -> CollaboratorResult<Vec<StockItem>> {
        if self.fail_catalog.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("stock", "catalog unavailable"));
        }
        Ok(self.items())
    }

    async fn search(&self, name_query: &str) -> CollaboratorResult<Vec<StockItem>> {
        let query = name_query.trim().to_lowercase();
        Ok(lock(&self.items)
            .iter()
            .filter(|i| {
                i.generic_name.to_lowercase().contains(&query)
                    || i.brand_name.to_lowercase().contains(&query)
            })
            .cloned()
            .collect())
    }

    async fn add_medicine(&self, record: NewMedicine) -> CollaboratorResult<StockItem> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("stock", "insert rejected"));
        }
        let mut items = lock(&self.items);
        let item = StockItem {
            medicine_id: format!("new-{}", items.len() + 1),
            generic_name: record.generic_name,
            brand_name: record.brand_name,
            dosage_form: record.dosage_form,
            quantity: record.quantity,
            unit_price: record.unit_price,
        };
        items.push(item.clone());
        Ok(item)
    }

    async fn update_stock(
        &self,
        stock_id: &str,
        fields: StockUpdate,
    ) -> CollaboratorResult<StockItem> {
        let mut items = lock(&self.items);
        let item = items
            .iter_mut()
            .find(|i| i.medicine_id == stock_id)
            .ok_or_else(|| CollaboratorError::new("stock", format!("{stock_id} not found")))?;

        let decrementing = fields.quantity.is_some_and(|q| q < item.quantity);
        if decrementing && lock(&self.failing_updates).contains(stock_id) {
            return Err(CollaboratorError::new("stock", format!("update of {stock_id} rejected")));
        }

        if let Some(quantity) = fields.quantity {
            item.quantity = quantity;
        }
        if let Some(unit_price) = fields.unit_price {
            item.unit_price = unit_price;
        }
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(item.clone())
    }
}

/// Voided sales stay recorded, flagged.
#[derive(Default)]
pub struct InMemorySales {
    sales: Mutex<Vec<Sale>>,
    fail: AtomicBool,
    fail_marks: AtomicBool,
}

impl InMemorySales {
    pub fn failing() -> Self {
        let sales = Self::default();
        sales.fail.store(true, Ordering::SeqCst);
        sales
    }

    /// Seeds a sale left behind by an earlier attempt.
    pub fn record(&self, sale: Sale) {
        lock(&self.sales).push(sale);
    }

    pub fn fail_stock_marks(&self) {
        self.fail_marks.store(true, Ordering::SeqCst);
    }

    /// Sales that were not voided.
    pub fn sales(&self) -> Vec<Sale> {
        lock(&self.sales).iter().filter(|s| !s.voided).cloned().collect()
    }

    pub fn voided(&self) -> Vec<String> {
        lock(&self.sales)
            .iter()
            .filter(|s| s.voided)
            .map(|s| s.id.clone())
            .collect()
    }

    fn unavailable(&self) -> CollaboratorResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("sales", "ledger unavailable"));
        }
        Ok(())
    }

    fn update(&self, sale_id: &str, change: impl FnOnce(&mut Sale)) -> CollaboratorResult<()> {
        let mut sales = lock(&self.sales);
        let sale = sales
            .iter_mut()
            .find(|s| s.id == sale_id)
            .ok_or_else(|| CollaboratorError::new("sales", format!("{sale_id} not found")))?;
        change(sale);
        Ok(())
    }
}

#[async_trait]
impl SaleLedger for InMemorySales {
    async fn create_sale(&self, sale: &Sale) -> CollaboratorResult<Sale> {
        self.unavailable()?;
        let mut sales = lock(&self.sales);
        if sales.iter().any(|s| s.id == sale.id) {
            return Err(CollaboratorError::new("sales", format!("{} already exists", sale.id)));
        }
        sales.push(sale.clone());
        Ok(sale.clone())
    }

    async fn find_sale(&self, sale_id: &str) -> CollaboratorResult<Option<Sale>> {
        self.unavailable()?;
        Ok(lock(&self.sales).iter().find(|s| s.id == sale_id).cloned())
    }

    async fn mark_stock_applied(&self, sale_id: &str) -> CollaboratorResult<()> {
        self.unavailable()?;
        if self.fail_marks.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("sales", "mark rejected"));
        }
        self.update(sale_id, |s| s.stock_applied = true)
    }

    async fn void_sale(&self, sale_id: &str) -> CollaboratorResult<()> {
        self.update(sale_id, |s| s.voided = true)
    }
}

#[derive(Default)]
pub struct InMemoryDelivery {
    requests: Mutex<Vec<DeliveryRequest>>,
    fail: AtomicBool,
}

impl InMemoryDelivery {
    pub fn failing() -> Self {
        let delivery = Self::default();
        delivery.fail.store(true, Ordering::SeqCst);
        delivery
    }

    pub fn requests(&self) -> Vec<DeliveryRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl DeliveryService for InMemoryDelivery {
    async fn create_delivery_request(&self, request: &DeliveryRequest) -> CollaboratorResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::new("delivery", "no riders available"));
        }
        lock(&self.requests).push(request.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHistory {
    entries: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

#[async_trait]
impl HistoryRepository for InMemoryHistory {
    async fn append(&self, entry: HistoryEntry) -> CollaboratorResult<()> {
        lock(&self.entries)
            .entry(entry.prescription_id.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn entries(&self, prescription_id: &str) -> CollaboratorResult<Vec<HistoryEntry>> {
        Ok(lock(&self.entries)
            .get(prescription_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Handles to the in-memory collaborators behind a [`Services`] bundle,
/// kept so tests can inspect side effects.
pub struct InMemoryServices {
    pub stock: Arc<InMemoryStock>,
    pub sales: Arc<InMemorySales>,
    pub delivery: Arc<InMemoryDelivery>,
    pub analyzer: Arc<FixedAnalyzer>,
}

impl InMemoryServices {
    pub fn new(stock: Vec<StockItem>, prescription: AnalyzedPrescription) -> Self {
        Self {
            stock: Arc::new(InMemoryStock::new(stock)),
            sales: Arc::new(InMemorySales::default()),
            delivery: Arc::new(InMemoryDelivery::default()),
            analyzer: Arc::new(FixedAnalyzer::returning(prescription)),
        }
    }

    pub fn services(&self, extractor: FixedExtractor) -> Services {
        Services {
            extractor: Arc::new(extractor),
            analyzer: self.analyzer.clone(),
            interactions: Arc::new(FixedInteractions::returning(Vec::new())),
            dosages: Arc::new(FixedDosages::returning(Vec::new())),
            stock: self.stock.clone(),
            sales: self.sales.clone(),
            delivery: self.delivery.clone(),
            alternatives: Arc::new(StaticAlternatives::default()),
            matching: MatchConfig::default(),
            pharmacy_id: "pharmacy-1".to_string(),
        }
    }
}

/// Catalog entry with the given price, for tests and seeds.
pub fn stock_item(medicine_id: &str, generic: &str, brand: &str, quantity: u32, price: i64) -> StockItem {
    StockItem {
        medicine_id: medicine_id.to_string(),
        generic_name: generic.to_string(),
        brand_name: brand.to_string(),
        dosage_form: None,
        quantity,
        unit_price: Decimal::from(price),
    }
}
