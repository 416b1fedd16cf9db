use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cqrs_es::Aggregate;
use serde::{Deserialize, Serialize};

use crate::errors::Error;

use super::fulfillment::{self, FulfillmentReceipt, FulfillmentRequest};
use super::model::AnalyzedPrescription;
use super::{pipeline, Command, Event, Services};

/// Prescription workflow status
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    /// Image captured, text extraction pending
    #[default]
    Captured,
    /// Text extracted, structured analysis pending
    Analyzing,
    /// Analysis complete, safety checks pending
    Verifying,
    /// Safety checks done, stock matching pending
    Reconciling,
    /// Waiting for the pharmacist to pick medications
    ReadyForSelection,
    /// Selection confirmed, sale in progress
    Fulfilling,
    Fulfilled,
    PartiallyFulfilled,
    /// Extraction or analysis failed; retry or cancel
    Failed,
    Aborted,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Captured => "captured",
            Self::Analyzing => "analyzing",
            Self::Verifying => "verifying",
            Self::Reconciling => "reconciling",
            Self::ReadyForSelection => "ready_for_selection",
            Self::Fulfilling => "fulfilling",
            Self::Fulfilled => "fulfilled",
            Self::PartiallyFulfilled => "partially_fulfilled",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Still inside the automatic part of the pipeline.
    fn is_processing(&self) -> bool {
        matches!(
            self,
            Self::Captured | Self::Analyzing | Self::Verifying | Self::Reconciling | Self::Failed
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::PartiallyFulfilled | Self::Aborted)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Analysis,
    Fulfillment,
}

/// What the user can do next after a failure or while a decision is open.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Retry,
    Retake,
    Cancel,
    Skip,
    AddToInventory,
    ChooseStockItem,
    ChangeSelection,
}

/// A failure shown to the user together with the actions open to them.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
    pub actions: Vec<UserAction>,
}

impl StageFailure {
    pub fn extraction(message: impl Into<String>) -> Self {
        Self {
            stage: Stage::Extraction,
            message: message.into(),
            actions: vec![UserAction::Retake, UserAction::Retry, UserAction::Cancel],
        }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        Self {
            stage: Stage::Analysis,
            message: message.into(),
            actions: vec![UserAction::Retry, UserAction::Cancel],
        }
    }
}

/// Prescription aggregate
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Prescription {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: PrescriptionStatus,
    pub image_uri: String,

    // Pipeline output
    pub raw_text: Option<String>,
    pub analyzed: Option<AnalyzedPrescription>,

    // Fulfillment
    pub request: Option<FulfillmentRequest>,
    pub receipt: Option<FulfillmentReceipt>,
    /// Confirmed selections so far; names the sale of the current attempt
    #[serde(default)]
    pub fulfillment_attempt: u32,

    pub last_error: Option<StageFailure>,
}

pub const AGGREGATE_TYPE: &str = "Prescription";

#[async_trait]
impl Aggregate for Prescription {
    type Command = Command;
    type Event = Event;
    type Error = Error;
    type Services = Services;

    fn aggregate_type() -> String {
        AGGREGATE_TYPE.to_string()
    }

    async fn handle(
        &self,
        command: Self::Command,
        services: &Self::Services,
    ) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            Command::Capture { id, image_uri } => {
                self.validate_new()?;
                if image_uri.trim().is_empty() {
                    return Err(Error::validation("Capture a prescription image first"));
                }

                Ok(vec![Event::PrescriptionCaptured {
                    id,
                    image_uri,
                    created_at: Utc::now(),
                }])
            }

            Command::Process => {
                self.validate_existing()?;
                if self.status.is_processing() {
                    Ok(pipeline::run(self, services).await)
                } else if self.status.is_terminal() {
                    Err(self.transition_error(PrescriptionStatus::Analyzing))
                } else {
                    // Automatic stages already done
                    Ok(vec![])
                }
            }

            Command::ConfirmSelection(request) => {
                self.validate_existing()?;
                self.validate_status(PrescriptionStatus::ReadyForSelection, PrescriptionStatus::Fulfilling)?;
                let prescription = self.analyzed()?;
                fulfillment::validate_request(prescription, &request)?;

                Ok(vec![Event::FulfillmentStarted {
                    id: self.id.clone(),
                    request,
                    updated_at: Utc::now(),
                }])
            }

            Command::Fulfill => {
                self.validate_existing()?;
                self.validate_status(PrescriptionStatus::Fulfilling, PrescriptionStatus::Fulfilled)?;
                let prescription = self.analyzed()?;
                let request = self.request.as_ref().ok_or_else(|| {
                    Error::validation("Confirm a selection before fulfilling")
                })?;

                let sale_id = format!("{}-sale-{}", self.id, self.fulfillment_attempt);
                let updated_at = Utc::now();
                let event = match fulfillment::execute(services, prescription, request, &sale_id).await {
                    Ok(receipt) if receipt.skipped.is_empty() => Event::PrescriptionFulfilled {
                        id: self.id.clone(),
                        receipt,
                        updated_at,
                    },
                    Ok(receipt) => Event::PrescriptionPartiallyFulfilled {
                        id: self.id.clone(),
                        receipt,
                        updated_at,
                    },
                    Err(e) => {
                        tracing::warn!(prescription_id = %self.id, error = %e, "Fulfillment failed");
                        Event::FulfillmentFailed {
                            id: self.id.clone(),
                            failure: e.to_failure(),
                            updated_at,
                        }
                    }
                };
                Ok(vec![event])
            }

            Command::Cancel => {
                self.validate_existing()?;
                if !(self.status.is_processing()
                    || self.status == PrescriptionStatus::ReadyForSelection)
                {
                    return Err(self.transition_error(PrescriptionStatus::Aborted));
                }

                Ok(vec![Event::PrescriptionCancelled {
                    id: self.id.clone(),
                    updated_at: Utc::now(),
                }])
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            Event::PrescriptionCaptured { id, image_uri, created_at } => {
                self.id = id;
                self.image_uri = image_uri;
                self.created_at = created_at;
                self.updated_at = created_at;
                self.status = PrescriptionStatus::Captured;
            }

            Event::TextExtracted { text, updated_at, .. } => {
                self.raw_text = Some(text);
                self.status = PrescriptionStatus::Analyzing;
                self.last_error = None;
                self.updated_at = updated_at;
            }

            Event::PrescriptionAnalyzed { prescription, updated_at, .. } => {
                self.analyzed = Some(prescription);
                self.status = PrescriptionStatus::Verifying;
                self.last_error = None;
                self.updated_at = updated_at;
            }

            Event::SafetyVerified { warnings, updated_at, .. } => {
                if let Some(prescription) = self.analyzed.as_mut() {
                    prescription.warnings = warnings;
                }
                self.status = PrescriptionStatus::Reconciling;
                self.updated_at = updated_at;
            }

            Event::InventoryReconciled { medications, updated_at, .. } => {
                if let Some(prescription) = self.analyzed.as_mut() {
                    prescription.medications = medications;
                }
                self.status = PrescriptionStatus::ReadyForSelection;
                self.updated_at = updated_at;
            }

            Event::StageFailed { failure, updated_at, .. } => {
                self.last_error = Some(failure);
                self.status = PrescriptionStatus::Failed;
                self.updated_at = updated_at;
            }

            Event::FulfillmentStarted { request, updated_at, .. } => {
                self.request = Some(request);
                self.fulfillment_attempt += 1;
                self.last_error = None;
                self.status = PrescriptionStatus::Fulfilling;
                self.updated_at = updated_at;
            }

            Event::PrescriptionFulfilled { receipt, updated_at, .. } => {
                self.receipt = Some(receipt);
                self.status = PrescriptionStatus::Fulfilled;
                self.updated_at = updated_at;
            }

            Event::PrescriptionPartiallyFulfilled { receipt, updated_at, .. } => {
                self.receipt = Some(receipt);
                self.status = PrescriptionStatus::PartiallyFulfilled;
                self.updated_at = updated_at;
            }

            Event::FulfillmentFailed { failure, updated_at, .. } => {
                self.last_error = Some(failure);
                self.request = None;
                self.status = PrescriptionStatus::ReadyForSelection;
                self.updated_at = updated_at;
            }

            Event::PrescriptionCancelled { updated_at, .. } => {
                self.status = PrescriptionStatus::Aborted;
                self.updated_at = updated_at;
            }
        }
    }
}

impl Prescription {
    fn validate_new(&self) -> Result<(), Error> {
        if !self.id.is_empty() {
            return Err(Error::Uniqueness { field: "id".to_string() });
        }
        Ok(())
    }

    fn validate_existing(&self) -> Result<(), Error> {
        if self.id.is_empty() {
            return Err(Error::NotFound { entity: AGGREGATE_TYPE.to_string() });
        }
        Ok(())
    }

    fn validate_status(
        &self,
        expected: PrescriptionStatus,
        to: PrescriptionStatus,
    ) -> Result<(), Error> {
        if self.status != expected {
            return Err(self.transition_error(to));
        }
        Ok(())
    }

    fn transition_error(&self, to: PrescriptionStatus) -> Error {
        Error::InvalidStateTransition {
            from: self.status.as_str().to_string(),
            to: to.as_str().to_string(),
        }
    }

    fn analyzed(&self) -> Result<&AnalyzedPrescription, Error> {
        self.analyzed
            .as_ref()
            .ok_or_else(|| Error::validation("Prescription has not been analyzed"))
    }
}
