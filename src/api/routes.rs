//! REST handlers.

use std::collections::HashMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::{ApiError, AppState};
use crate::pipeline::processor::ApprovedDraft;
use crate::pipeline::stage::ProcessingStage;
use crate::pipeline::types::{Person, RerunFlags, WorkloadId, WorkloadSeed, WorkloadState};

type ApiResult<T> = Result<T, ApiError>;

fn workload_id(raw: &str) -> ApiResult<WorkloadId> {
    let id = WorkloadId::new(raw);
    if id.as_str().is_empty() {
        return Err(ApiError::bad_request("Workload id must not be empty"));
    }
    Ok(id)
}

// ── Health ──────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "outreach"
    }))
}

// ── Workloads ───────────────────────────────────────────────────────────

pub async fn list_workloads(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkloadState>>> {
    Ok(Json(state.store.list_workloads().await?))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    /// Company domain, e.g. `acme.com`.
    pub id: String,
    #[serde(default)]
    pub company_url: Option<String>,
    #[serde(default)]
    pub rerun: RerunFlags,
}

pub async fn register_workload(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let id = workload_id(&body.id)?;
    let seed = WorkloadSeed {
        company_url: body.company_url,
    };
    let workload = state.scheduler.register(id, seed, body.rerun).await?;
    Ok((StatusCode::CREATED, Json(workload)))
}

pub async fn get_workload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = workload_id(&id)?;
    Ok(Json(state.scheduler.status(&id).await?))
}

/// One discovered person, in selection order.
#[derive(Debug, Serialize)]
pub struct PersonEntry {
    pub index: usize,
    pub identity: String,
    pub chosen: bool,
    pub person: Option<Person>,
}

pub async fn list_people(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<PersonEntry>>> {
    let id = workload_id(&id)?;
    let workload = state.scheduler.status(&id).await?.state;
    let mut records: HashMap<String, Person> = state
        .store
        .list_people(&id)
        .await?
        .into_iter()
        .map(|stored| (stored.identity, stored.person))
        .collect();

    let entries = workload
        .people
        .iter()
        .enumerate()
        .map(|(index, identity)| PersonEntry {
            index,
            identity: identity.clone(),
            chosen: workload.chosen.contains(&index),
            person: records.remove(identity),
        })
        .collect();
    Ok(Json(entries))
}

#[derive(Debug, Deserialize)]
pub struct SelectionRequest {
    pub indices: Vec<usize>,
}

pub async fn submit_selection(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SelectionRequest>,
) -> ApiResult<Json<WorkloadState>> {
    let id = workload_id(&id)?;
    Ok(Json(
        state.scheduler.submit_selection(&id, &body.indices).await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct DraftsRequest {
    pub drafts: Vec<ApprovedDraft>,
}

pub async fn submit_drafts(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<DraftsRequest>,
) -> ApiResult<Json<WorkloadState>> {
    let id = workload_id(&id)?;
    Ok(Json(
        state
            .scheduler
            .submit_approved_drafts(&id, &body.drafts)
            .await?,
    ))
}

pub async fn signal_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = workload_id(&id)?;
    state.scheduler.signal_input(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"status": "signalled"})),
    ))
}

pub async fn cancel_workload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = workload_id(&id)?;
    state.scheduler.cancel(&id).await?;
    Ok(Json(serde_json::json!({"status": "cancelled"})))
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub stage: String,
}

pub async fn reset_workload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResetRequest>,
) -> ApiResult<Json<WorkloadState>> {
    let id = workload_id(&id)?;
    let stage: ProcessingStage = body.stage.parse().map_err(ApiError::bad_request)?;
    Ok(Json(state.scheduler.reset(&id, stage).await?))
}

// ── People / queue ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FindPersonQuery {
    pub name: String,
}

pub async fn find_person(
    State(state): State<AppState>,
    Query(query): Query<FindPersonQuery>,
) -> ApiResult<impl IntoResponse> {
    match state.store.find_person_by_name(&query.name).await? {
        Some(found) => Ok(Json(found)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("No person named {:?}", query.name),
        )),
    }
}

pub async fn queue_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.snapshot().await)
}
