//! Admin API for managing services.
//!
//! Everything here sits behind the Basic auth middleware and mutates through
//! the repository; any operation that changes routing state reloads the
//! route registry before returning so the proxy picks the change up
//! immediately rather than waiting for the next poller tick.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{diff, Change};
use crate::error::{AppError, Result};
use crate::models::{
    ApprovalStatus, CreateServiceRequest, Service, ServiceWithStatus, Snapshot, SnapshotSummary,
    UpdateServiceRequest,
};
use crate::repository::{validate_frequency, validate_name};
use crate::security;
use crate::AppState;

pub fn admin_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/services", post(create_service).get(list_services))
        .route(
            "/services/{name}",
            get(get_service).patch(update_service).delete(delete_service),
        )
        .route("/services/{name}/snapshots", get(list_snapshots))
        .route("/services/{name}/snapshots/latest", get(latest_snapshot))
        .route("/services/{name}/diff", get(get_diff))
        .route("/services/{name}/approve", post(approve_latest))
        .layer(middleware::from_fn_with_state(
            state,
            security::require_admin,
        ))
}

async fn create_service(
    State(state): State<AppState>,
    Json(request): Json<CreateServiceRequest>,
) -> Result<(StatusCode, Json<Service>)> {
    tracing::info!(name = %request.name, "creating service");

    validate_name(&request.name)?;
    validate_frequency(
        request.check_frequency_minutes,
        state.config.polling.min_check_frequency,
    )?;
    if state.repo.get_service(&request.name).await?.is_some() {
        return Err(AppError::DuplicateName(request.name));
    }

    // Snapshot before touching the database: a service we cannot observe is
    // a service we refuse to onboard.
    let outcome = state.snapshotter.snapshot(&request.upstream_url).await?;
    let payload = serde_json::to_string(&outcome.payload)
        .map_err(|e| AppError::Validation(format!("unserializable payload: {e}")))?;

    let service = state
        .repo
        .create_service(
            &request.name,
            &request.upstream_url,
            request.enabled,
            request.check_frequency_minutes,
        )
        .await?;
    state
        .repo
        .insert_snapshot(service.id, &payload, &outcome.hash, ApprovalStatus::UserApproved)
        .await?;

    state.registry.reload(state.repo.as_ref()).await?;

    tracing::info!(name = %service.name, hash = %outcome.hash, "service created");
    Ok((StatusCode::CREATED, Json(service)))
}

async fn list_services(State(state): State<AppState>) -> Result<Json<Vec<ServiceWithStatus>>> {
    Ok(Json(state.repo.list_services().await?))
}

#[derive(Debug, Serialize)]
struct ServiceDetail {
    #[serde(flatten)]
    service: Service,
    latest_snapshot_status: Option<ApprovalStatus>,
    latest_approved_hash: Option<String>,
    snapshots: Vec<SnapshotSummary>,
}

async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceDetail>> {
    let service = state
        .repo
        .get_service(&name)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(name.clone()))?;

    let latest = state.repo.latest_snapshot(service.id).await?;
    let approved = state.repo.latest_approved_snapshot(service.id).await?;
    let snapshots = state
        .repo
        .list_snapshots(service.id, 10)
        .await?
        .iter()
        .map(SnapshotSummary::from)
        .collect();

    Ok(Json(ServiceDetail {
        service,
        latest_snapshot_status: latest.map(|s| s.status),
        latest_approved_hash: approved.map(|s| s.hash),
        snapshots,
    }))
}

async fn update_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(patch): Json<UpdateServiceRequest>,
) -> Result<Json<Service>> {
    let current = state
        .repo
        .get_service(&name)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(name.clone()))?;

    let url_changed = patch
        .upstream_url
        .as_ref()
        .is_some_and(|url| *url != current.upstream_url);

    if url_changed {
        // The new endpoint is an unreviewed surface: snapshot it up front,
        // store the result as unapproved and leave the service disabled
        // until an operator approves.
        let new_url = patch.upstream_url.as_deref().unwrap_or_default();
        tracing::info!(name = %name, new_url, "upstream URL changed, taking new snapshot");

        let outcome = state.snapshotter.snapshot(new_url).await?;
        let payload = serde_json::to_string(&outcome.payload)
            .map_err(|e| AppError::Validation(format!("unserializable payload: {e}")))?;

        let service = state.repo.update_service(&name, &patch).await?;
        state
            .repo
            .record_drift(service.id, &payload, &outcome.hash)
            .await?;
    } else {
        state.repo.update_service(&name, &patch).await?;
    }

    state.registry.reload(state.repo.as_ref()).await?;

    let service = state
        .repo
        .get_service(&name)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(name.clone()))?;
    Ok(Json(service))
}

async fn delete_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>> {
    if !state.repo.delete_service(&name).await? {
        return Err(AppError::ServiceNotFound(name));
    }

    state.registry.reload(state.repo.as_ref()).await?;

    tracing::info!(name = %name, "service deleted");
    Ok(Json(serde_json::json!({"status": "deleted", "name": name})))
}

#[derive(Debug, Deserialize)]
struct SnapshotListQuery {
    #[serde(default = "default_snapshot_limit")]
    limit: i64,
}

fn default_snapshot_limit() -> i64 {
    10
}

async fn list_snapshots(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SnapshotListQuery>,
) -> Result<Json<Vec<SnapshotSummary>>> {
    let service = state
        .repo
        .get_service(&name)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(name.clone()))?;

    let snapshots = state
        .repo
        .list_snapshots(service.id, query.limit)
        .await?
        .iter()
        .map(SnapshotSummary::from)
        .collect();

    Ok(Json(snapshots))
}

async fn latest_snapshot(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Snapshot>> {
    let service = state
        .repo
        .get_service(&name)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(name.clone()))?;

    let snapshot = state
        .repo
        .latest_snapshot(service.id)
        .await?
        .ok_or(AppError::SnapshotNotFound(name))?;

    Ok(Json(snapshot))
}

#[derive(Debug, Serialize)]
struct DiffResponse {
    service_name: String,
    approved_snapshot: Option<SnapshotSummary>,
    latest_snapshot: Option<SnapshotSummary>,
    /// Present only when the latest snapshot differs from the approved one.
    changes: Option<Vec<Change>>,
}

async fn get_diff(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DiffResponse>> {
    let service = state
        .repo
        .get_service(&name)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(name.clone()))?;

    let approved = state.repo.latest_approved_snapshot(service.id).await?;
    let latest = state.repo.latest_snapshot(service.id).await?;

    let changes = match (&approved, &latest) {
        (Some(approved), Some(latest)) if approved.id != latest.id => {
            Some(diff(&parse_payload(approved)?, &parse_payload(latest)?))
        }
        _ => None,
    };

    Ok(Json(DiffResponse {
        service_name: name,
        approved_snapshot: approved.as_ref().map(SnapshotSummary::from),
        latest_snapshot: latest.as_ref().map(SnapshotSummary::from),
        changes,
    }))
}

#[derive(Debug, Serialize)]
struct ApproveResponse {
    service_name: String,
    snapshot_id: i64,
    new_status: ApprovalStatus,
    enabled: bool,
}

async fn approve_latest(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApproveResponse>> {
    let service = state
        .repo
        .get_service(&name)
        .await?
        .ok_or_else(|| AppError::ServiceNotFound(name.clone()))?;

    let snapshot = state.repo.approve_latest(service.id).await?;
    state.registry.reload(state.repo.as_ref()).await?;

    tracing::info!(name = %name, snapshot_id = snapshot.id, "snapshot approved, service re-enabled");
    Ok(Json(ApproveResponse {
        service_name: name,
        snapshot_id: snapshot.id,
        new_status: snapshot.status,
        enabled: true,
    }))
}

fn parse_payload(snapshot: &Snapshot) -> Result<Value> {
    serde_json::from_str(&snapshot.payload)
        .map_err(|e| AppError::Validation(format!("stored payload is not valid JSON: {e}")))
}
