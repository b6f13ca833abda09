use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::FutureExt;
use serde::Serialize;
use skyforge_common::{EventStatus, StatusEvent};
use tracing::{error, info, warn};

use super::params::RequestParams;
use super::registry::{RunRegistry, RunSummary};
use super::validate::build_request;
use crate::errors::ValidationError;
use crate::orchestrator::blueprint::{Blueprint, BlueprintRegistry};
use crate::orchestrator::context::{ProvisioningContext, RunSnapshot};
use crate::orchestrator::runner::Provisioner;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub blueprints: BlueprintRegistry,
    pub provisioner: Provisioner,
    pub runs: RunRegistry,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(blueprints: BlueprintRegistry, provisioner: Provisioner) -> Self {
        Self {
            blueprints,
            provisioner,
            runs: RunRegistry::new(),
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    Validation(ValidationError),
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": msg}))).into_response()
            }
            ApiError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": err.message, "kind": err.kind})),
            )
                .into_response(),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": msg})),
            )
                .into_response(),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/provision/{blueprint}", post(provision))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/blueprints", get(list_blueprints))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn list_blueprints(State(state): State<SharedState>) -> Json<Vec<Blueprint>> {
    Json(state.blueprints.all().map(|bp| bp.as_ref().clone()).collect())
}

async fn list_runs(State(state): State<SharedState>) -> Json<Vec<RunSummary>> {
    Json(state.runs.list())
}

async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<RunSnapshot>, ApiError> {
    state
        .runs
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))
}

#[derive(Serialize)]
struct Accepted {
    message: String,
    status_url: String,
    run_id: String,
    #[serde(flatten)]
    target: HashMap<String, String>,
}

/// Validate, announce, start the run in the background and answer 202.
async fn provision(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let blueprint = state
        .blueprints
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown blueprint '{}'", name)))?;

    let params = RequestParams::new(&body, query);
    let request = build_request(blueprint, &params).inspect_err(|e| {
        warn!(blueprint = %name, kind = e.kind.as_str(), "Rejected request: {}", e.message);
    })?;

    state
        .provisioner
        .preflight()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let run_id = uuid::Uuid::new_v4().to_string();
    let target_key = request.target_key().to_string();
    let target_name = request.target_name.clone();
    let mut ctx = ProvisioningContext::new(run_id.clone(), request);
    let snapshots = ctx.subscribe();

    let outcome = state.provisioner.announce(&mut ctx).await;
    if !outcome.success {
        let reason = outcome
            .error
            .unwrap_or_else(|| "Unknown error posting status".to_string());
        error!(run_id = %run_id, "Initial status update failed: {}", reason);
        return Err(ApiError::Internal(format!("Status update failed: {}", reason)));
    }

    state.runs.insert(&run_id, snapshots.clone());
    spawn_run(state.clone(), ctx, snapshots);
    info!(run_id = %run_id, blueprint = %name, target = %target_name, "Provisioning accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            message: format!("{} provisioning started", name),
            status_url: outcome.status_url,
            run_id,
            target: HashMap::from([(target_key, target_name)]),
        }),
    ))
}

/// Run in the background. A panic is contained here: the created resources
/// from the last snapshot are cleaned up and a single `failed` event is sent.
fn spawn_run(
    state: SharedState,
    ctx: ProvisioningContext,
    snapshots: tokio::sync::watch::Receiver<RunSnapshot>,
) {
    let run_id = ctx.run_id().to_string();
    let webhook_url = ctx.request().webhook_url.clone();
    tokio::spawn(async move {
        let provisioner = state.provisioner.clone();
        let result = AssertUnwindSafe(provisioner.run(ctx)).catch_unwind().await;
        let Err(panic) = result else {
            return;
        };

        let message = panic_message(panic.as_ref());
        error!(run_id = %run_id, "Provisioning task panicked: {}", message);
        let last = snapshots.borrow().clone();
        let report = provisioner.compensating_cleanup().run(&last.created).await;

        if !last.events.iter().any(|e| e.status.is_terminal()) {
            let event = StatusEvent::new(
                &last.target_key,
                &last.target_name,
                EventStatus::Failed,
                &last.resource_group,
                &last.location,
                "internal_error",
            )
            .with_message("Provisioning stopped by an internal error")
            .with_error(message.clone())
            .with_extra("run_id", run_id.clone())
            .with_extra("cleanup", report.to_json());
            provisioner.reporter().report(&webhook_url, &event).await;
        }
        state.runs.mark_crashed(&run_id, message);
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("task panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("task panicked: {}", s)
    } else {
        "task panicked".to_string()
    }
}

