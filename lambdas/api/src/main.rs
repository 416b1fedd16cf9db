use aws_config::BehaviorVersion;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use cqrs_es::AggregateError;
use domain::prescriptions::{
    self,
    cqrs::{PrescriptionCqrs, PrescriptionViewRepository},
    inputs::{CaptureInput, PlanDecisionsInput, UploadPrescriptionInput},
    FulfillmentRequest, HistoryRepository, PrescriptionStatus, View,
};
use domain::PipelineConfig;
use std::{collections::HashMap, sync::Arc, time::Duration};
use ulid::Ulid;

type ApiError = (StatusCode, String);

#[derive(Clone)]
struct AppState {
    prescriptions_repo: PrescriptionViewRepository,
    prescriptions_cqrs: Arc<PrescriptionCqrs>,
    history: Arc<dyn HistoryRepository>,
    s3_client: aws_sdk_s3::Client,
}

#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
    let dynamodb_client = aws_sdk_dynamodb::Client::new(&config);
    let s3_client = aws_sdk_s3::Client::new(&config);

    let pipeline = PipelineConfig::from_env();
    let history = adapters::history(&config);
    let prescriptions_repo = prescriptions::cqrs::init_repo(dynamodb_client.clone());
    let prescriptions_cqrs = prescriptions::cqrs::init(
        dynamodb_client,
        prescriptions_repo.clone(),
        history.clone(),
        adapters::services(&config, &pipeline),
    );

    let state = AppState {
        prescriptions_repo,
        prescriptions_cqrs,
        history,
        s3_client,
    };

    let app = Router::new()
        .route("/prescriptions", post(capture_prescription))
        .route("/prescriptions/upload-url", post(get_upload_url))
        .route("/prescriptions/:id", get(get_prescription).delete(cancel_prescription))
        .route("/prescriptions/:id/process", post(process_prescription))
        .route("/prescriptions/:id/decisions", post(plan_decisions))
        .route("/prescriptions/:id/fulfill", post(fulfill_prescription))
        .route("/prescriptions/:id/history", get(get_history))
        .with_state(state);

    let app = tower::ServiceBuilder::new()
        .layer(axum_aws_lambda::LambdaLayer::default())
        .service(app);

    lambda_http::run(app).await?;
    Ok(())
}

fn command_error(e: AggregateError<domain::Error>) -> ApiError {
    let status = match &e {
        AggregateError::UserError(domain::Error::NotFound { .. }) => StatusCode::NOT_FOUND,
        AggregateError::UserError(domain::Error::Validation { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
        AggregateError::UserError(_) | AggregateError::AggregateConflict => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "Command failed");
    }
    (status, e.to_string())
}

async fn execute(state: &AppState, id: &str, command: prescriptions::Command) -> Result<(), ApiError> {
    let mut metadata = HashMap::new();
    metadata.insert("command_id".to_string(), Ulid::new().to_string());

    state
        .prescriptions_cqrs
        .execute_with_metadata(id, command, metadata)
        .await
        .map_err(command_error)
}

async fn load_view(state: &AppState, id: &str) -> Result<View, ApiError> {
    state
        .prescriptions_repo
        .load(id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, "Not found".to_string()))
}

// Capture an already stored image
async fn capture_prescription(
    State(state): State<AppState>,
    Json(input): Json<CaptureInput>,
) -> Result<impl IntoResponse, ApiError> {
    let id = Ulid::new().to_string();

    let command = prescriptions::Command::Capture {
        id: id.clone(),
        image_uri: input.image_uri,
    };
    execute(&state, &id, command).await?;

    Ok((StatusCode::CREATED, Json(load_view(&state, &id).await?)))
}

// Presigned upload; the upload itself triggers capture and processing
async fn get_upload_url(
    State(state): State<AppState>,
    Json(input): Json<UploadPrescriptionInput>,
) -> Result<impl IntoResponse, ApiError> {
    let bucket =
        std::env::var("PRESCRIPTIONS_BUCKET").unwrap_or("pharmacy-prescriptions".to_string());

    let prescription_id = Ulid::new().to_string();
    let file_name = input
        .file_name
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("prescription.jpg");
    let key = format!("prescriptions/{}/{}", prescription_id, file_name);

    let presigning = aws_sdk_s3::presigning::PresigningConfig::expires_in(Duration::from_secs(3600))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let presigned = state
        .s3_client
        .put_object()
        .bucket(&bucket)
        .key(&key)
        .content_type(&input.content_type)
        .presigned(presigning)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(serde_json::json!({
        "upload_url": presigned.uri(),
        "prescription_id": prescription_id,
        "key": key,
    })))
}

async fn get_prescription(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_view(&state, &id).await?))
}

// Runs the automatic stages, or retries the one that failed
async fn process_prescription(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    execute(&state, &id, prescriptions::Command::Process).await?;
    Ok(Json(load_view(&state, &id).await?))
}

async fn plan_decisions(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(input): Json<PlanDecisionsInput>,
) -> Result<impl IntoResponse, ApiError> {
    let view = load_view(&state, &id).await?;
    let analyzed = view.prescription.analyzed.as_ref().ok_or((
        StatusCode::CONFLICT,
        "Prescription has not been analyzed".to_string(),
    ))?;

    Ok(Json(prescriptions::required_decisions(analyzed, &input.selection)))
}

async fn fulfill_prescription(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<FulfillmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // An interrupted attempt resumes with the selection it confirmed
    let current = load_view(&state, &id).await?;
    if current.prescription.status == PrescriptionStatus::Fulfilling {
        tracing::info!(prescription_id = %id, "Resuming interrupted fulfillment");
    } else {
        execute(&state, &id, prescriptions::Command::ConfirmSelection(request)).await?;
    }
    execute(&state, &id, prescriptions::Command::Fulfill).await?;

    let view = load_view(&state, &id).await?;
    let status = match view.prescription.status {
        PrescriptionStatus::Fulfilled | PrescriptionStatus::PartiallyFulfilled => StatusCode::OK,
        // The failure and its next actions are on the view
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((status, Json(view)))
}

async fn cancel_prescription(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    execute(&state, &id, prescriptions::Command::Cancel).await?;
    Ok((StatusCode::OK, "Prescription cancelled"))
}

async fn get_history(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let entries = state
        .history
        .entries(&id)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(entries))
}
