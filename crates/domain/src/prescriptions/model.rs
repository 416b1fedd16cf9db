use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Structured prescription produced by the analyzer and enriched in place
/// by safety verification and inventory reconciliation.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzedPrescription {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub patient_info: PatientInfo,
    #[serde(default)]
    pub doctor_info: DoctorInfo,
    pub medications: Vec<PrescribedMedication>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub warnings: Vec<PrescriptionWarning>,
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub image_uri: String,
}

impl AnalyzedPrescription {
    pub fn medication_names(&self) -> Vec<String> {
        self.medications.iter().map(|m| m.name.clone()).collect()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Kilograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct DoctorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic: Option<String>,
}

/// One line of the prescription, as extracted. Strings are not validated
/// against any vocabulary.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrescribedMedication {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generic_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage_form: Option<String>,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub confidence: f64,

    // Reconciliation annotations
    #[serde(rename = "found_in_stock", default)]
    pub found_in_stock: bool,
    #[serde(rename = "stock_quantity", default, skip_serializing_if = "Option::is_none")]
    pub stock_quantity: Option<u32>,
    #[serde(rename = "stock_id", default, skip_serializing_if = "Option::is_none")]
    pub stock_id: Option<String>,
    #[serde(
        rename = "alternative_medicines",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub alternative_medicines: Option<Vec<String>>,
    #[serde(rename = "match_candidates", default, skip_serializing_if = "Vec::is_empty")]
    pub match_candidates: Vec<MatchCandidate>,
}

impl PrescribedMedication {
    pub fn new(name: &str, frequency: &str, duration: &str) -> Self {
        Self {
            name: name.to_string(),
            frequency: frequency.to_string(),
            duration: duration.to_string(),
            confidence: 1.0,
            ..Default::default()
        }
    }

    /// Names the catalog is matched against: the written name, then the
    /// generic name when the analyzer recognised one.
    pub fn search_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.generic_name.as_deref())
    }
}

/// A ranked stock candidate for a prescribed medication.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MatchCandidate {
    pub medicine_id: String,
    pub name: String,
    pub score: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WarningType {
    Interaction,
    Dosage,
    Allergy,
    AgeRestriction,
    Pregnancy,
}

/// Display priority only. Warnings are advisory and never gate the pipeline.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct PrescriptionWarning {
    #[serde(rename = "type")]
    pub kind: WarningType,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub medications: Vec<String>,
}

impl PrescriptionWarning {
    pub fn new(kind: WarningType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            medications: Vec::new(),
        }
    }

    pub fn with_medications(mut self, medications: &[&str]) -> Self {
        self.medications = medications.iter().map(|m| m.to_string()).collect();
        self
    }
}

/// Catalog entry in the pharmacy stock store.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct StockItem {
    pub medicine_id: String,
    pub generic_name: String,
    pub brand_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage_form: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Catalog insert record for a medicine the pharmacy did not carry yet.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewMedicine {
    pub generic_name: String,
    pub brand_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage_form: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl NewMedicine {
    /// Zero stock, zero price: the pharmacist prices and restocks later.
    pub fn from_prescribed(medication: &PrescribedMedication) -> Self {
        let generic = medication
            .generic_name
            .clone()
            .unwrap_or_else(|| medication.name.clone());
        Self {
            generic_name: generic,
            brand_name: medication.name.clone(),
            dosage_form: medication.dosage_form.clone(),
            quantity: 0,
            unit_price: Decimal::ZERO,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct StockUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct SaleLineItem {
    pub medicine_id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
}

impl SaleLineItem {
    pub fn new(stock: &StockItem, name: &str, quantity: u32) -> Self {
        Self {
            medicine_id: stock.medicine_id.clone(),
            name: name.to_string(),
            quantity,
            unit_price: stock.unit_price,
            total_amount: stock.unit_price * Decimal::from(quantity),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    #[default]
    Cash,
    Card,
    Mobile,
    Due,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct Sale {
    pub id: String,
    pub prescription_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<SaleLineItem>,
    pub subtotal: Decimal,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub due_amount: Decimal,
    pub payment_mode: PaymentMode,
    /// Set once every stock decrement of the sale has been applied
    #[serde(default)]
    pub stock_applied: bool,
    #[serde(default)]
    pub voided: bool,
}

impl Sale {
    /// Builds the sale from its lines. Without an explicit payment the
    /// customer is assumed to pay in full.
    pub fn from_lines(
        id: String,
        prescription_id: &str,
        items: Vec<SaleLineItem>,
        paid_amount: Option<Decimal>,
        payment_mode: PaymentMode,
    ) -> Self {
        let subtotal: Decimal = items.iter().map(|line| line.total_amount).sum();
        let total_amount = subtotal;
        let paid_amount = paid_amount.unwrap_or(total_amount);
        let due_amount = (total_amount - paid_amount).max(Decimal::ZERO);

        Self {
            id,
            prescription_id: prescription_id.to_string(),
            created_at: Utc::now(),
            items,
            subtotal,
            total_amount,
            paid_amount,
            due_amount,
            payment_mode,
            stock_applied: false,
            voided: false,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct Customer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeliveryRequest {
    pub pharmacy_id: String,
    pub customer: Customer,
    pub items: Vec<SaleLineItem>,
    pub payment_mode: PaymentMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: i64) -> Decimal {
        Decimal::from(value)
    }

    fn stock(price: i64) -> StockItem {
        StockItem {
            medicine_id: "m1".into(),
            generic_name: "paracetamol".into(),
            brand_name: "Napa".into(),
            dosage_form: None,
            quantity: 100,
            unit_price: dec(price),
        }
    }

    #[test]
    fn line_total_is_quantity_times_price() {
        let line = SaleLineItem::new(&stock(5), "Napa", 10);
        assert_eq!(line.total_amount, dec(50));
    }

    #[test]
    fn sale_defaults_to_full_payment() {
        let lines = vec![
            SaleLineItem::new(&stock(5), "Napa", 10),
            SaleLineItem::new(&stock(3), "Napa", 4),
        ];
        let sale = Sale::from_lines("s1".into(), "p1", lines, None, PaymentMode::Cash);
        assert_eq!(sale.total_amount, dec(62));
        assert_eq!(sale.paid_amount, dec(62));
        assert_eq!(sale.due_amount, Decimal::ZERO);
    }

    #[test]
    fn due_amount_never_negative() {
        let lines = vec![SaleLineItem::new(&stock(5), "Napa", 10)];
        let partial = Sale::from_lines("s1".into(), "p1", lines.clone(), Some(dec(20)), PaymentMode::Due);
        assert_eq!(partial.due_amount, dec(30));

        let over = Sale::from_lines("s2".into(), "p1", lines, Some(dec(80)), PaymentMode::Cash);
        assert_eq!(over.due_amount, Decimal::ZERO);
    }

    #[test]
    fn serializes_ui_field_names() {
        let mut medication = PrescribedMedication::new("Napa", "1+0+1", "5 days");
        medication.generic_name = Some("Paracetamol".into());
        medication.found_in_stock = true;
        medication.stock_quantity = Some(100);

        let prescription = AnalyzedPrescription {
            medications: vec![medication],
            raw_text: "Rx".into(),
            image_uri: "s3://bucket/key".into(),
            warnings: vec![PrescriptionWarning::new(
                WarningType::AgeRestriction,
                Severity::High,
                "not for children",
            )],
            ..Default::default()
        };

        let json = serde_json::to_value(&prescription).unwrap();
        assert!(json.get("patientInfo").is_some());
        assert_eq!(json["rawText"], "Rx");
        assert_eq!(json["imageUri"], "s3://bucket/key");
        assert_eq!(json["medications"][0]["genericName"], "Paracetamol");
        assert_eq!(json["medications"][0]["found_in_stock"], true);
        assert_eq!(json["medications"][0]["stock_quantity"], 100);
        assert_eq!(json["warnings"][0]["type"], "age_restriction");
        assert_eq!(json["warnings"][0]["severity"], "high");
    }

    #[test]
    fn severity_orders_by_urgency() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
