use std::{env, sync::Arc};
use cqrs_es::{
    persist::{PersistedEventStore, ViewRepository},
    CqrsFramework, Query as CqrsQuery,
};
use dynamo_es::{DynamoEventRepository, DynamoViewRepository};
use super::{HistoryQuery, HistoryRepository, Prescription, Query, Services, View};

pub type PrescriptionCqrs =
    CqrsFramework<Prescription, PersistedEventStore<DynamoEventRepository, Prescription>>;

pub type PrescriptionViewRepository = Arc<Box<dyn ViewRepository<View, Prescription>>>;

pub fn init(
    client: aws_sdk_dynamodb::Client,
    repo: PrescriptionViewRepository,
    history: Arc<dyn HistoryRepository>,
    services: Services,
) -> Arc<PrescriptionCqrs> {
    let event_log_table = env::var("DYNAMODB_EVENT_LOG_TABLE")
        .unwrap_or("pharmacy-event-log".to_string());

    let event_snapshots_table = env::var("DYNAMODB_EVENT_SNAPSHOTS_TABLE")
        .unwrap_or("pharmacy-event-snapshots".to_string());

    let store: PersistedEventStore<DynamoEventRepository, Prescription> =
        PersistedEventStore::new_snapshot_store(
            DynamoEventRepository::new(client)
                .with_tables(&event_log_table, &event_snapshots_table),
            5,
        );

    let queries: Vec<Box<dyn CqrsQuery<Prescription>>> = vec![
        Box::new(Query::new(repo)),
        Box::new(HistoryQuery::new(history)),
    ];

    Arc::new(CqrsFramework::new(store, queries, services))
}

pub fn init_repo(client: aws_sdk_dynamodb::Client) -> PrescriptionViewRepository {
    let view_table = env::var("DYNAMODB_PRESCRIPTIONS_VIEW_TABLE")
        .unwrap_or("pharmacy-prescriptions-view".to_string());

    Arc::new(Box::new(DynamoViewRepository::new(&view_table, client)))
}
