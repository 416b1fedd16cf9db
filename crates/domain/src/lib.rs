//! Prescription Fulfillment Domain

/// Prescription pipeline and aggregate
pub mod prescriptions;

/// Domain errors
pub mod errors;

/// Environment configuration
pub mod config;

pub use config::PipelineConfig;
pub use errors::Error;
