//! REST Handlers
//!
//! One handler per route; each delegates to a single `QueueManager` operation.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use taskmill_core::application::{QueueFilter, QueueSnapshot};
use taskmill_core::domain::{Job, JobPatch, JobStatus};
use taskmill_core::error::AppError;
use tracing::debug;

use crate::error::ApiError;
use crate::types::{
    ApiResponse, AppState, BulkEnqueueRequest, BulkEnqueueResponse, CreateQueueRequest,
    DeleteQueueQuery, DestroyResponse, EnqueueRequest, EnqueueResponse, FailRequest,
    HealthResponse, QueueQuery, TaskQuery, TasksQuery, UpdateQueueRequest,
};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

const DEFAULT_FAIL_REASON: &str = "worker reported failure";

/// Either a single queue (`?name=`) or all of them
#[derive(Debug, serde::Serialize)]
#[serde(untagged)]
pub enum QueueListing {
    One(QueueSnapshot),
    All(Vec<QueueSnapshot>),
}

// ---------------------------------------------------------------
// Queues
// ---------------------------------------------------------------

pub async fn create_queue(
    State(qm): State<AppState>,
    body: Result<Json<CreateQueueRequest>, JsonRejection>,
) -> ApiResult<QueueSnapshot> {
    let Json(req) = body?;
    let snapshot = qm.create_queue(req.into_config()?).await?;
    Ok(ApiResponse::success(snapshot))
}

pub async fn get_queues(
    State(qm): State<AppState>,
    query: Result<Query<QueueQuery>, QueryRejection>,
) -> ApiResult<QueueListing> {
    let Query(query) = query?;
    let listing = match query.name {
        Some(name) => QueueListing::One(qm.get_queue(&name).await?),
        None => QueueListing::All(qm.list_queues().await),
    };
    Ok(ApiResponse::success(listing))
}

pub async fn update_queue(
    State(qm): State<AppState>,
    body: Result<Json<UpdateQueueRequest>, JsonRejection>,
) -> ApiResult<QueueSnapshot> {
    let Json(req) = body?;
    let (name, patch) = req.into_patch()?;
    Ok(ApiResponse::success(qm.update_queue(&name, patch).await?))
}

pub async fn delete_queue(
    State(qm): State<AppState>,
    query: Result<Query<DeleteQueueQuery>, QueryRejection>,
) -> ApiResult<DestroyResponse> {
    let Query(query) = query?;
    match qm.destroy_queue(&query.name, query.release_name).await {
        Ok(_) => {}
        // Already destroyed: only its reserved name is left to release
        Err(AppError::QueueNotFound(_))
            if query.release_name && qm.release_queue_name(&query.name).await => {}
        Err(e) => return Err(e.into()),
    }
    Ok(ApiResponse::success(DestroyResponse {
        name: query.name,
        released: query.release_name,
    }))
}

pub async fn search_queues(
    State(qm): State<AppState>,
    query: Result<Query<QueueFilter>, QueryRejection>,
) -> ApiResult<Vec<QueueSnapshot>> {
    let Query(filter) = query?;
    Ok(ApiResponse::success(qm.find_queues(&filter).await))
}

pub async fn start_queue(State(qm): State<AppState>, Path(name): Path<String>) -> ApiResult<QueueSnapshot> {
    Ok(ApiResponse::success(qm.start_queue(&name).await?))
}

pub async fn stop_queue(State(qm): State<AppState>, Path(name): Path<String>) -> ApiResult<QueueSnapshot> {
    Ok(ApiResponse::success(qm.stop_queue(&name).await?))
}

pub async fn pause_queue(State(qm): State<AppState>, Path(name): Path<String>) -> ApiResult<QueueSnapshot> {
    Ok(ApiResponse::success(qm.pause_queue(&name).await?))
}

pub async fn unpause_queue(
    State(qm): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<QueueSnapshot> {
    Ok(ApiResponse::success(qm.unpause_queue(&name).await?))
}

pub async fn drain_queue(State(qm): State<AppState>, Path(name): Path<String>) -> ApiResult<QueueSnapshot> {
    Ok(ApiResponse::success(qm.drain_queue(&name).await?))
}

pub async fn queue_tasks(
    State(qm): State<AppState>,
    Path(name): Path<String>,
    query: Result<Query<TasksQuery>, QueryRejection>,
) -> ApiResult<Vec<Job>> {
    let Query(query) = query?;
    let status = query
        .status
        .map(|s| s.parse::<JobStatus>())
        .transpose()?;
    Ok(ApiResponse::success(qm.get_queue_tasks(&name, status).await?))
}

// ---------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------

pub async fn enqueue_task(
    State(qm): State<AppState>,
    body: Result<Json<EnqueueRequest>, JsonRejection>,
) -> ApiResult<EnqueueResponse> {
    let Json(req) = body?;
    let id = qm.enqueue_job(&req.queue, req.job).await?;
    Ok(ApiResponse::success(EnqueueResponse { id, queue: req.queue }))
}

pub async fn enqueue_tasks(
    State(qm): State<AppState>,
    body: Result<Json<BulkEnqueueRequest>, JsonRejection>,
) -> ApiResult<BulkEnqueueResponse> {
    let Json(req) = body?;
    let ids = qm.enqueue_jobs(&req.queue, req.jobs).await?;
    Ok(ApiResponse::success(BulkEnqueueResponse { ids, queue: req.queue }))
}

pub async fn get_task(State(qm): State<AppState>, Path(id): Path<String>) -> ApiResult<Job> {
    Ok(ApiResponse::success(qm.find_job(&id).await?))
}

pub async fn update_task(
    State(qm): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<JobPatch>, JsonRejection>,
) -> ApiResult<Job> {
    let Json(patch) = body?;
    Ok(ApiResponse::success(qm.update_job(&id, patch).await?))
}

pub async fn cancel_task(
    State(qm): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> ApiResult<Job> {
    let Query(query) = query?;
    let queue = owning_queue(&qm, &id, query.queue).await?;
    Ok(ApiResponse::success(qm.cancel_job(&queue, &id).await?))
}

pub async fn ack_task(
    State(qm): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<TaskQuery>, QueryRejection>,
) -> ApiResult<Job> {
    let Query(query) = query?;
    let queue = owning_queue(&qm, &id, query.queue).await?;
    Ok(ApiResponse::success(qm.ack_job(&queue, &id).await?))
}

pub async fn fail_task(
    State(qm): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<FailRequest>, JsonRejection>,
) -> ApiResult<Job> {
    let Json(req) = body?;
    let queue = owning_queue(&qm, &id, req.queue).await?;
    let reason = req.reason.as_deref().unwrap_or(DEFAULT_FAIL_REASON);
    Ok(ApiResponse::success(qm.fail_job(&queue, &id, reason).await?))
}

pub async fn health(State(qm): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    ApiResponse::success(HealthResponse {
        status: "ok".to_string(),
        version: taskmill_core::VERSION.to_string(),
        queues: qm.list_queues().await.len(),
    })
}

/// Any path no route matches
pub async fn not_found() -> ApiError {
    ApiError::endpoint_not_found()
}

async fn owning_queue(qm: &AppState, id: &str, given: Option<String>) -> Result<String, ApiError> {
    match given {
        Some(queue) => Ok(queue),
        None => {
            let queue = qm.locate_job(id).await?;
            debug!(job_id = %id, queue = %queue, "Located job");
            Ok(queue)
        }
    }
}
