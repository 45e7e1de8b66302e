//! HTTP surface over the engine services.
//!
//! Every simulation route is scoped to the tenant named in `x-tenant-id`.

use crate::application::{BatchRequest, BatchResult, ExecutionOutcome, Services};
use crate::domain::request::RawActionRequest;
use crate::domain::simulation::{Finding, Simulation};
use crate::error::{FieldError, SimulationError};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

pub const TENANT_HEADER: &str = "x-tenant-id";

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/simulate", post(create_simulation))
        .route("/simulate/batch", post(run_batch))
        .route("/simulate/:id", get(get_simulation))
        .route("/simulate/:id/execute", post(execute_simulation))
        .with_state(services)
}

pub async fn serve(
    listener: TcpListener,
    services: Services,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "http listening");
    axum::serve(listener, router(services))
        .with_graceful_shutdown(shutdown)
        .await
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn create_simulation(
    State(services): State<Services>,
    headers: HeaderMap,
    Json(raw): Json<RawActionRequest>,
) -> Result<(StatusCode, Json<Simulation>), ApiError> {
    let tenant = tenant(&headers)?;
    let simulation = services.simulator.create(&tenant, raw).await?;
    Ok((StatusCode::CREATED, Json(public(simulation))))
}

pub async fn run_batch(
    State(services): State<Services>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResult>, ApiError> {
    let tenant = tenant(&headers)?;
    let mut result = services.batches.run(&tenant, request).await?;
    for item in &mut result.items {
        item.simulation = item.simulation.take().map(public);
    }
    Ok(Json(result))
}

pub async fn get_simulation(
    State(services): State<Services>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<Simulation>, ApiError> {
    let tenant = tenant(&headers)?;
    let simulation = services.simulator.get(&tenant, id).await?;
    Ok(Json(public(simulation)))
}

pub async fn execute_simulation(
    State(services): State<Services>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionOutcome>, ApiError> {
    let tenant = tenant(&headers)?;
    Ok(Json(services.gate.execute(&tenant, id).await?))
}

fn tenant(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingTenant)
}

/// Drops the internal claim marker before a simulation leaves the process.
fn public(mut simulation: Simulation) -> Simulation {
    simulation.claimed_at = None;
    simulation
}

#[derive(Debug)]
pub enum ApiError {
    MissingTenant,
    Engine(SimulationError),
}

impl From<SimulationError> for ApiError {
    fn from(err: SimulationError) -> Self {
        ApiError::Engine(err)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ErrorBody {
    fn new(error: &'static str, message: String) -> Self {
        Self {
            error,
            message,
            fields: Vec::new(),
            findings: Vec::new(),
            expires_at: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::MissingTenant => {
                let body = ErrorBody::new("missing_tenant", format!("header {TENANT_HEADER} is required"));
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ApiError::Engine(err) => err,
        };

        let message = err.to_string();
        let (status, body) = match err {
            SimulationError::Validation(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    fields,
                    ..ErrorBody::new("validation_error", message)
                },
            ),
            SimulationError::NotFound { .. } => (StatusCode::NOT_FOUND, ErrorBody::new("not_found", message)),
            SimulationError::Expired { expires_at, .. } => (
                StatusCode::GONE,
                ErrorBody {
                    expires_at: Some(expires_at),
                    ..ErrorBody::new("expired", message)
                },
            ),
            SimulationError::NotExecutable { findings, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorBody {
                    findings,
                    ..ErrorBody::new("not_executable", message)
                },
            ),
            SimulationError::Stale { findings, .. } => (
                StatusCode::CONFLICT,
                ErrorBody {
                    findings,
                    ..ErrorBody::new("stale", message)
                },
            ),
            SimulationError::ConcurrencyConflict { .. } | SimulationError::InvalidTransition { .. } => {
                (StatusCode::CONFLICT, ErrorBody::new("conflict", message))
            }
            SimulationError::Ledger(_) => (StatusCode::CONFLICT, ErrorBody::new("ledger_rejected", message)),
            SimulationError::ExternalAdapter { .. } => {
                (StatusCode::BAD_GATEWAY, ErrorBody::new("external_adapter_error", message))
            }
            other => {
                error!(err = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::new("internal_error", message),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}
