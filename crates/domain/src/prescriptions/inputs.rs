use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureInput {
    /// Reference to an already stored image, e.g. `s3://bucket/key`
    pub image_uri: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadPrescriptionInput {
    pub file_name: String,
    pub content_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanDecisionsInput {
    /// Positions of the selected medications on the prescription
    pub selection: Vec<usize>,
}
