use std::sync::Arc;
use async_trait::async_trait;
use cqrs_es::{
    persist::{PersistenceError, ViewContext, ViewRepository},
    Aggregate, EventEnvelope, View as CqrsView,
};
use serde::{Deserialize, Serialize};
use super::{Prescription, AGGREGATE_TYPE};

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct View {
    pub aggregate_type: String,
    pub command_id: String,
    pub id: String,
    pub prescription: Prescription,
}

impl CqrsView<Prescription> for View {
    fn update(&mut self, event: &EventEnvelope<Prescription>) {
        self.id.clone_from(&event.aggregate_id);
        self.aggregate_type = AGGREGATE_TYPE.to_string();
        self.command_id = event
            .metadata
            .get("command_id")
            .cloned()
            .unwrap_or_default();
        self.prescription.apply(event.payload.clone());
    }
}

pub struct Query {
    repo: Arc<Box<dyn ViewRepository<View, Prescription>>>,
}

impl Query {
    pub fn new(repo: Arc<Box<dyn ViewRepository<View, Prescription>>>) -> Self {
        Self { repo }
    }

    async fn update(
        &self,
        prescription_id: &str,
        events: &[EventEnvelope<Prescription>],
    ) -> Result<(), PersistenceError> {
        let (mut view, view_context) = match self.repo.load_with_context(prescription_id).await? {
            None => {
                let view_context = ViewContext::new(prescription_id.to_string(), 0);
                (Default::default(), view_context)
            }
            Some((view, context)) => (view, context),
        };

        for event in events {
            view.update(event);
        }

        self.repo.update_view(view, view_context).await
    }
}

#[async_trait]
impl cqrs_es::Query<Prescription> for Query {
    async fn dispatch(&self, prescription_id: &str, events: &[EventEnvelope<Prescription>]) {
        if let Err(err) = self.update(prescription_id, events).await {
            tracing::error!(%prescription_id, error = %err, "PrescriptionQuery update failed");
        }
    }
}
