//! HTTP surface for the appliance manual pipeline.
//!
//! Authentication lives upstream; handlers take the caller's identity from
//! the `x-owner-id` header set by the authenticating proxy.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/appliances` | Create an appliance from a manual (multipart), 202 |
//! | `GET`    | `/appliances` | List the caller's appliances |
//! | `GET`    | `/appliances/{id}` | Full appliance record |
//! | `GET`    | `/appliances/{id}/status` | Processing status only |
//! | `PUT`    | `/appliances/{id}` | Patch nickname/brand/model/instructions |
//! | `DELETE` | `/appliances/{id}` | Remove record, stored objects, and vectors |
//! | `POST`   | `/appliances/{id}/reingest` | Re-run the pipeline from stored bytes |
//! | `POST`   | `/recipes/adapt` | Tailor a recipe to an appliance |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses carry:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "manual upload is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `not_ready` (409),
//! `queue_full` (503), `internal` (500).

use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::adapt::{AdaptError, AdaptationEngine};
use crate::ingest::manual_object_key;
use crate::jobs::{JobQueue, SubmitError};
use crate::models::{Appliance, IngestionJob, ProcessingStatus};
use crate::object_store::ObjectStore;
use crate::resolver::validate_manual_url;
use crate::store::{vector_ids_for_deletion, ApplianceStore};
use crate::vector::VectorIndex;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ApplianceStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub index: Arc<dyn VectorIndex>,
    pub queue: JobQueue,
    pub adaptation: Arc<AdaptationEngine>,
}

/// Build the router; exposed separately from [`run_server`] so tests can
/// drive handlers without binding a socket.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/appliances", post(handle_create_appliance).get(handle_list_appliances))
        .route("/appliances/{id}", get(handle_get_appliance))
        .route("/appliances/{id}", put(handle_update_appliance))
        .route("/appliances/{id}", delete(handle_delete_appliance))
        .route("/appliances/{id}/status", get(handle_get_status))
        .route("/appliances/{id}/reingest", post(handle_reingest))
        .route("/recipes/adapt", post(handle_adapt_recipe))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

pub async fn run_server(state: AppState, bind_addr: &str) -> anyhow::Result<()> {
    let app = build_router(state);
    tracing::info!(bind = bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn not_ready(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "not_ready".to_string(),
        message: message.into(),
    }
}

fn queue_full(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "queue_full".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "internal error");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

/// Caller identity from the authenticating proxy.
fn owner_id(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("x-owner-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| bad_request("missing x-owner-id header"))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /appliances ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateApplianceResponse {
    appliance_id: String,
    status: ProcessingStatus,
}

/// Parsed multipart body for appliance creation.
#[derive(Default)]
struct CreateUpload {
    manual_bytes: Option<Vec<u8>>,
    manual_content_type: Option<String>,
    manual_url: Option<String>,
    text: Option<String>,
    nickname: Option<String>,
}

async fn read_create_upload(mut multipart: Multipart) -> Result<CreateUpload, AppError> {
    let mut upload = CreateUpload::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        match field.name().unwrap_or("") {
            "manual" => {
                upload.manual_content_type =
                    field.content_type().map(|ct| ct.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read manual upload: {}", e)))?;
                upload.manual_bytes = Some(bytes.to_vec());
            }
            "manualUrl" | "manual_url" => {
                let url = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("failed to read manualUrl: {}", e)))?;
                upload.manual_url = Some(url.trim().to_string());
            }
            "text" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("failed to read text: {}", e)))?;
                upload.text = Some(text);
            }
            "nickname" => {
                let nickname = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("failed to read nickname: {}", e)))?;
                let nickname = nickname.trim().to_string();
                if !nickname.is_empty() {
                    upload.nickname = Some(nickname);
                }
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }
    Ok(upload)
}

/// Create an appliance and dispatch its ingestion.
///
/// Always returns 202 on acceptance regardless of what ingestion later
/// does; the only way to observe an ingestion failure is polling status.
async fn handle_create_appliance(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreateApplianceResponse>), AppError> {
    let owner = owner_id(&headers)?;
    let upload = read_create_upload(multipart).await?;

    let has_manual = upload.manual_bytes.as_ref().is_some_and(|b| !b.is_empty());
    let has_text = upload.text.as_ref().is_some_and(|t| !t.trim().is_empty());
    let has_url = upload.manual_url.as_ref().is_some_and(|u| !u.is_empty());
    if !has_manual && !has_text && !has_url {
        return Err(bad_request(
            "one of manual file, manualUrl, or text is required",
        ));
    }
    if has_url {
        // Reject bad URLs synchronously, before any job is dispatched
        if let Some(url) = &upload.manual_url {
            validate_manual_url(url).map_err(|e| bad_request(e.to_string()))?;
        }
    }

    let appliance_id = uuid::Uuid::new_v4().to_string();
    let manual_key = manual_object_key(&appliance_id);

    state
        .store
        .create_queued(&appliance_id, &owner, upload.nickname.as_deref(), &manual_key)
        .await
        .map_err(internal)?;

    let job = IngestionJob {
        owner_id: owner,
        appliance_id: appliance_id.clone(),
        manual_key,
        manual_url: upload.manual_url.filter(|u| !u.is_empty()),
        payload: upload.manual_bytes.filter(|b| !b.is_empty()),
        content_type: upload.manual_content_type,
        extracted_text: upload.text.filter(|t| !t.trim().is_empty()),
        nickname: upload.nickname,
    };

    let owner_for_cleanup = job.owner_id.clone();
    match state.queue.submit(job) {
        Ok(handle) => {
            // Observe the outcome for the logs; persistence happens in the
            // pipeline itself
            let id_for_log = appliance_id.clone();
            tokio::spawn(async move {
                if let Ok(Err(e)) = handle.await {
                    tracing::warn!(appliance_id = %id_for_log, error = %e, "ingestion job reported failure");
                }
            });
            Ok((
                StatusCode::ACCEPTED,
                Json(CreateApplianceResponse {
                    appliance_id,
                    status: ProcessingStatus::Queued,
                }),
            ))
        }
        Err(e @ SubmitError::QueueFull) | Err(e @ SubmitError::Closed) => {
            // Don't leave an orphaned QUEUED row the pipeline will never
            // touch
            if let Err(del_err) = state.store.delete_row(&owner_for_cleanup, &appliance_id).await {
                tracing::error!(appliance_id = %appliance_id, error = %del_err, "failed to clean up rejected appliance row");
            }
            Err(queue_full(e.to_string()))
        }
    }
}

// ============ GET /appliances, GET /appliances/{id} ============

async fn handle_list_appliances(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Appliance>>, AppError> {
    let owner = owner_id(&headers)?;
    let appliances = state.store.list(&owner).await.map_err(internal)?;
    Ok(Json(appliances))
}

async fn handle_get_appliance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Appliance>, AppError> {
    let owner = owner_id(&headers)?;
    let appliance = state
        .store
        .get(&owner, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("appliance not found: {}", id)))?;
    Ok(Json(appliance))
}

#[derive(Serialize)]
struct StatusResponse {
    status: ProcessingStatus,
}

async fn handle_get_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let owner = owner_id(&headers)?;
    let appliance = state
        .store
        .get(&owner, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("appliance not found: {}", id)))?;
    Ok(Json(StatusResponse {
        status: appliance.processing_status,
    }))
}

// ============ PUT /appliances/{id} ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateApplianceRequest {
    nickname: Option<String>,
    brand: Option<String>,
    model: Option<String>,
    agent_instructions: Option<String>,
}

async fn handle_update_appliance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateApplianceRequest>,
) -> Result<Json<Appliance>, AppError> {
    let owner = owner_id(&headers)?;
    let updated = state
        .store
        .update_fields(
            &owner,
            &id,
            body.nickname.as_deref(),
            body.brand.as_deref(),
            body.model.as_deref(),
            body.agent_instructions.as_deref(),
        )
        .await
        .map_err(internal)?;
    if !updated {
        return Err(not_found(format!("appliance not found: {}", id)));
    }
    let appliance = state
        .store
        .get(&owner, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("appliance not found: {}", id)))?;
    Ok(Json(appliance))
}

// ============ DELETE /appliances/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

/// Remove the appliance row, its stored objects, and the vector entries
/// implied by its recorded chunk count.
async fn handle_delete_appliance(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let owner = owner_id(&headers)?;
    let appliance = state
        .store
        .get(&owner, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("appliance not found: {}", id)))?;

    let vector_ids = vector_ids_for_deletion(&appliance);
    state.index.delete(&vector_ids).await.map_err(internal)?;

    if let Some(manual_key) = &appliance.manual_key {
        state.objects.delete(manual_key).await.map_err(internal)?;
    }
    if let Some(text_key) = &appliance.extracted_text_key {
        state.objects.delete(text_key).await.map_err(internal)?;
    }

    state.store.delete_row(&owner, &id).await.map_err(internal)?;
    Ok(Json(DeleteResponse { deleted: true }))
}

// ============ POST /appliances/{id}/reingest ============

/// Re-run the full pipeline for an existing appliance from its stored
/// manual bytes (or stored extracted text for text-only appliances).
/// Overwrites prior fields; there is no partial re-run.
async fn handle_reingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<CreateApplianceResponse>), AppError> {
    let owner = owner_id(&headers)?;
    let appliance = state
        .store
        .get(&owner, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("appliance not found: {}", id)))?;
    if appliance.processing_status == ProcessingStatus::Processing {
        return Err(not_ready("appliance is currently being ingested"));
    }

    let manual_key = appliance
        .manual_key
        .clone()
        .unwrap_or_else(|| manual_object_key(&id));

    // Prefer the original bytes; fall back to stored extracted text for
    // appliances ingested from caller-supplied text
    let payload = state.objects.get(&manual_key).await.ok();
    let extracted_text = if payload.is_none() {
        match &appliance.extracted_text_key {
            Some(key) => state.objects.get_text(key).await.ok(),
            None => None,
        }
    } else {
        None
    };
    if payload.is_none() && extracted_text.is_none() {
        return Err(bad_request(
            "appliance has no stored manual or extracted text to re-ingest",
        ));
    }

    let prior_status = appliance.processing_status;
    state
        .store
        .requeue(&owner, &id)
        .await
        .map_err(internal)?;

    let job = IngestionJob {
        owner_id: owner,
        appliance_id: id.clone(),
        manual_key,
        manual_url: None,
        payload,
        content_type: None,
        extracted_text,
        nickname: None,
    };
    match state.queue.submit(job) {
        Ok(handle) => {
            let id_for_log = id.clone();
            tokio::spawn(async move {
                if let Ok(Err(e)) = handle.await {
                    tracing::warn!(appliance_id = %id_for_log, error = %e, "re-ingestion job reported failure");
                }
            });
            Ok((
                StatusCode::ACCEPTED,
                Json(CreateApplianceResponse {
                    appliance_id: id,
                    status: ProcessingStatus::Queued,
                }),
            ))
        }
        Err(e) => {
            // No job will ever pick the record up; put it back in the
            // status it had before the requeue
            if let Err(restore_err) = state.store.restore_status(&id, prior_status).await {
                tracing::error!(appliance_id = %id, error = %restore_err, "failed to restore status after rejected re-ingestion");
            }
            Err(queue_full(e.to_string()))
        }
    }
}

// ============ POST /recipes/adapt ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdaptRecipeRequest {
    recipe_id: String,
    appliance_id: String,
}

async fn handle_adapt_recipe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AdaptRecipeRequest>,
) -> Result<Json<crate::models::AdaptedRecipe>, AppError> {
    let owner = owner_id(&headers)?;
    match state
        .adaptation
        .adapt(&owner, &body.recipe_id, &body.appliance_id)
        .await
    {
        Ok(adapted) => Ok(Json(adapted)),
        Err(e @ AdaptError::ApplianceNotFound) | Err(e @ AdaptError::RecipeNotFound) => {
            Err(not_found(e.to_string()))
        }
        Err(e @ AdaptError::NotReady(_)) => Err(not_ready(e.to_string())),
        Err(AdaptError::Internal(e)) => Err(internal(e)),
    }
}
