/// Prescription aggregate
pub mod aggregate;

/// Commands
pub mod commands;

/// Events
pub mod events;

/// Input DTOs
pub mod inputs;

/// View (read model)
pub mod view;

/// CQRS setup
pub mod cqrs;

/// Data model shared with the UI
pub mod model;

/// Collaborator contracts
pub mod services;

/// Pipeline stages
pub mod extraction;
pub mod analysis;
pub mod safety;
pub mod reconcile;
pub mod matcher;
pub mod quantity;
pub mod pipeline;
pub mod fulfillment;

/// Prescription history log
pub mod history;

/// In-memory collaborators
pub mod memory;

pub use aggregate::{
    Prescription, PrescriptionStatus, Stage, StageFailure, UserAction, AGGREGATE_TYPE,
};
pub use commands::Command;
pub use events::Event;
pub use fulfillment::{
    required_decisions, DecisionRequest, FulfillmentError, FulfillmentReceipt, FulfillmentRequest,
    MissingDecision, Selection,
};
pub use history::{HistoryEntry, HistoryQuery, HistoryStatus};
pub use matcher::MatchConfig;
pub use quantity::derive_quantity;
pub use services::{HistoryRepository, Services, StaticAlternatives};
pub use view::{Query, View};
