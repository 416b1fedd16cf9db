use serde::{Deserialize, Serialize};

use super::fulfillment::FulfillmentRequest;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Command {
    /// Register a captured prescription image
    Capture { id: String, image_uri: String },

    /// Run the automatic stages (extraction, analysis, safety, inventory).
    /// Resumes after a failed stage.
    Process,

    /// Human selection of the medications to dispense
    ConfirmSelection(FulfillmentRequest),

    /// Persist the sale and its stock effects for the confirmed selection
    Fulfill,

    /// Abandon the prescription before fulfillment
    Cancel,
}
