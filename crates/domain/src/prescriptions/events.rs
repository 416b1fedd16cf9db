use chrono::{DateTime, Utc};
use cqrs_es::DomainEvent;
use serde::{Deserialize, Serialize};

use super::aggregate::StageFailure;
use super::fulfillment::{FulfillmentReceipt, FulfillmentRequest};
use super::model::{AnalyzedPrescription, PrescribedMedication, PrescriptionWarning};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Event {
    PrescriptionCaptured {
        id: String,
        image_uri: String,
        created_at: DateTime<Utc>,
    },

    TextExtracted {
        id: String,
        text: String,
        updated_at: DateTime<Utc>,
    },

    PrescriptionAnalyzed {
        id: String,
        prescription: AnalyzedPrescription,
        updated_at: DateTime<Utc>,
    },

    SafetyVerified {
        id: String,
        warnings: Vec<PrescriptionWarning>,
        updated_at: DateTime<Utc>,
    },

    InventoryReconciled {
        id: String,
        medications: Vec<PrescribedMedication>,
        updated_at: DateTime<Utc>,
    },

    StageFailed {
        id: String,
        failure: StageFailure,
        updated_at: DateTime<Utc>,
    },

    FulfillmentStarted {
        id: String,
        request: FulfillmentRequest,
        updated_at: DateTime<Utc>,
    },

    PrescriptionFulfilled {
        id: String,
        receipt: FulfillmentReceipt,
        updated_at: DateTime<Utc>,
    },

    PrescriptionPartiallyFulfilled {
        id: String,
        receipt: FulfillmentReceipt,
        updated_at: DateTime<Utc>,
    },

    FulfillmentFailed {
        id: String,
        failure: StageFailure,
        updated_at: DateTime<Utc>,
    },

    PrescriptionCancelled {
        id: String,
        updated_at: DateTime<Utc>,
    },
}

impl DomainEvent for Event {
    fn event_type(&self) -> String {
        match self {
            Event::PrescriptionCaptured { .. } => "Prescription:Captured".to_string(),
            Event::TextExtracted { .. } => "Prescription:TextExtracted".to_string(),
            Event::PrescriptionAnalyzed { .. } => "Prescription:Analyzed".to_string(),
            Event::SafetyVerified { .. } => "Prescription:SafetyVerified".to_string(),
            Event::InventoryReconciled { .. } => "Prescription:InventoryReconciled".to_string(),
            Event::StageFailed { .. } => "Prescription:StageFailed".to_string(),
            Event::FulfillmentStarted { .. } => "Prescription:FulfillmentStarted".to_string(),
            Event::PrescriptionFulfilled { .. } => "Prescription:Fulfilled".to_string(),
            Event::PrescriptionPartiallyFulfilled { .. } => {
                "Prescription:PartiallyFulfilled".to_string()
            }
            Event::FulfillmentFailed { .. } => "Prescription:FulfillmentFailed".to_string(),
            Event::PrescriptionCancelled { .. } => "Prescription:Cancelled".to_string(),
        }
    }

    fn event_version(&self) -> String {
        "1.0".to_string()
    }
}
