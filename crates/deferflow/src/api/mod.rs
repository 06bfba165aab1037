use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::connector::InMemoryConnector;
use crate::error::StoreError;
use crate::jobs::events::Event;
use crate::jobs::listing::{GroupStats, JobField, JobFilter};
use crate::jobs::model::{Job, JobId, JobStatus, NewJob};

pub mod models;

use models::{DeferRequest, DeferResponse, ErrorBody, ListJobsQuery, StalledQuery};

const DEFAULT_STALLED_SECONDS: i64 = 30 * 60;

#[derive(Clone)]
pub struct ApiState {
    pub connector: InMemoryConnector,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs).post(defer_job))
        .route("/jobs/:id/events", get(job_events))
        .route("/queues", get(list_queues))
        .route("/tasks", get(list_tasks))
        .route("/stalled", get(list_stalled))
        .with_state(state)
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn store_err(e: StoreError) -> ApiError {
    let status = match &e {
        StoreError::UniqueViolation { .. } => StatusCode::CONFLICT,
        StoreError::JobNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidArgument(_)
        | StoreError::InvalidArguments { .. }
        | StoreError::UnknownField(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, "admin api request failed");
    }
    (status, Json(ErrorBody { error: e.to_string() }))
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorBody { error: msg.into() }))
}

pub async fn health() -> &'static str {
    "ok"
}

fn filter_from(q: ListJobsQuery) -> Result<JobFilter, ApiError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(store_err)?;

    Ok(JobFilter::new()
        .with_opt(JobField::QueueName, q.queue)
        .with_opt(JobField::TaskName, q.task)
        .with_opt(JobField::Status, status)
        .with_opt(JobField::Lock, q.lock))
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let filter = filter_from(q)?;
    let jobs = state.connector.list_jobs(&filter).await.map_err(store_err)?;
    Ok(Json(jobs))
}

pub async fn defer_job(
    State(state): State<ApiState>,
    Json(body): Json<DeferRequest>,
) -> Result<(StatusCode, Json<DeferResponse>), ApiError> {
    let DeferRequest {
        queue,
        task_name,
        lock,
        queueing_lock,
        args,
        scheduled_at,
    } = body;

    if task_name.trim().is_empty() {
        return Err(bad_request("task_name is required"));
    }

    let job = state
        .connector
        .defer_job(NewJob {
            task_name,
            lock,
            queueing_lock,
            args,
            scheduled_at,
            queue: queue.unwrap_or_else(|| "default".to_string()),
        })
        .await
        .map_err(store_err)?;

    Ok((StatusCode::CREATED, Json(DeferResponse { job_id: job.id })))
}

pub async fn job_events(
    State(state): State<ApiState>,
    Path(id): Path<JobId>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state.connector.job_events(id).await.map_err(store_err)?;
    Ok(Json(events))
}

pub async fn list_queues(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<GroupStats>>, ApiError> {
    let filter = filter_from(q)?;
    let stats = state.connector.list_queues(&filter).await.map_err(store_err)?;
    Ok(Json(stats))
}

pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<GroupStats>>, ApiError> {
    let filter = filter_from(q)?;
    let stats = state.connector.list_tasks(&filter).await.map_err(store_err)?;
    Ok(Json(stats))
}

pub async fn list_stalled(
    State(state): State<ApiState>,
    Query(q): Query<StalledQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let seconds = q.seconds.unwrap_or(DEFAULT_STALLED_SECONDS);
    if seconds < 0 {
        return Err(bad_request("seconds must be >= 0"));
    }
    let jobs = state
        .connector
        .select_stalled_jobs(seconds, q.queue.as_deref(), q.task.as_deref())
        .await
        .map_err(store_err)?;
    Ok(Json(jobs))
}
