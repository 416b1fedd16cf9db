//! Append-only prescription history, projected from aggregate events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cqrs_es::EventEnvelope;
use derive_new::new;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::services::HistoryRepository;
use super::{Event, Prescription};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Analyzed,
    Dispensed,
    Partial,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, new)]
pub struct HistoryEntry {
    pub prescription_id: String,
    pub sequence: usize,
    pub status: HistoryStatus,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Decimal>,
}

/// History line for an event, if the event changes the visible status.
pub fn entry_for(prescription_id: &str, sequence: usize, event: &Event) -> Option<HistoryEntry> {
    let entry = |status, recorded_at: &DateTime<Utc>| {
        HistoryEntry::new(
            prescription_id.to_string(),
            sequence,
            status,
            *recorded_at,
            None,
            None,
            None,
        )
    };

    match event {
        Event::PrescriptionAnalyzed { prescription, updated_at, .. } => {
            let mut e = entry(HistoryStatus::Analyzed, updated_at);
            e.patient_name = prescription.patient_info.name.clone();
            Some(e)
        }
        Event::PrescriptionFulfilled { receipt, updated_at, .. } => {
            let mut e = entry(HistoryStatus::Dispensed, updated_at);
            e.sale_id = Some(receipt.sale.id.clone());
            e.total_amount = Some(receipt.sale.total_amount);
            Some(e)
        }
        Event::PrescriptionPartiallyFulfilled { receipt, updated_at, .. } => {
            let mut e = entry(HistoryStatus::Partial, updated_at);
            e.sale_id = Some(receipt.sale.id.clone());
            e.total_amount = Some(receipt.sale.total_amount);
            Some(e)
        }
        Event::PrescriptionCancelled { updated_at, .. } => {
            Some(entry(HistoryStatus::Cancelled, updated_at))
        }
        _ => None,
    }
}

/// Writes history entries as prescription events are committed.
pub struct HistoryQuery {
    repo: Arc<dyn HistoryRepository>,
}

impl HistoryQuery {
    pub fn new(repo: Arc<dyn HistoryRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl cqrs_es::Query<Prescription> for HistoryQuery {
    async fn dispatch(&self, prescription_id: &str, events: &[EventEnvelope<Prescription>]) {
        for envelope in events {
            let Some(entry) = entry_for(prescription_id, envelope.sequence, &envelope.payload) else {
                continue;
            };
            if let Err(err) = self.repo.append(entry).await {
                tracing::error!(%prescription_id, error = %err, "History append failed");
            }
        }
    }
}
