//! Job endpoints: the submitter plus read, list, delete, and the
//! artifact stream.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use docsmith_core::{locator, CallerId, Job, JobId, JobStatus};
use docsmith_infra::artifact_store::ArtifactStore;
use docsmith_infra::broker::{TaskBroker, WorkItem};
use docsmith_infra::job_store::JobStore;

use crate::app::dto::{self, CreateJobRequest, ListQuery};
use crate::app::{errors, AppServices};

const MAX_PAGE: u64 = 100;

pub fn router() -> Router {
    Router::new()
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/jobs/:id", get(get_job).delete(delete_job))
        .route("/jobs/:id/artifact", get(get_artifact))
}

/// POST /v1/jobs
///
/// The submitter: normalize the locator, dedupe against non-failed jobs
/// under the store's atomic create, persist a pending record, enqueue
/// the work item. An enqueue failure leaves the record pending for the
/// reaper rather than failing the request.
pub async fn create_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(request): Json<CreateJobRequest>,
) -> axum::response::Response {
    let source = match locator::normalize(&request.source) {
        Ok(source) => source,
        Err(e) => {
            return errors::json_error(StatusCode::BAD_REQUEST, "invalid_source", e.to_string());
        }
    };

    let caller_id = match &request.caller_id {
        Some(raw) => match CallerId::from_str(raw) {
            Ok(id) => Some(id),
            Err(e) => {
                return errors::json_error(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "invalid_caller",
                    e.to_string(),
                );
            }
        },
        None => None,
    };

    let job = Job::new(source, caller_id).with_write_access(request.has_write_access);
    let outcome = match services.store.create(job).await {
        Ok(outcome) => outcome,
        Err(e) => return errors::store_error_to_response(e),
    };

    if !outcome.is_created() {
        // Duplicate submit: hand back the existing record; the caller
        // may treat this as success and reuse the id.
        return (StatusCode::OK, Json(dto::job_to_json(outcome.job()))).into_response();
    }

    let created = outcome.job().clone();
    let item = WorkItem::new(created.id, request.credential.clone(), request.variant);
    if let Err(e) = services.broker.enqueue(item).await {
        // The job stays pending; the reaper will fail it with
        // enqueue-timeout if it never reaches a worker.
        tracing::error!(job_id = %created.id, error = %e, "enqueue failed");
    } else {
        tracing::info!(job_id = %created.id, source = %created.source, "job queued");
    }

    (StatusCode::CREATED, Json(dto::job_to_json(&created))).into_response()
}

/// GET /v1/jobs/:id
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_id(&id) else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found");
    };

    match services.store.get(job_id).await {
        Ok(Some(job)) => (StatusCode::OK, Json(dto::job_to_json(&job))).into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /v1/jobs?skip=&limit=
pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let limit = query.limit.unwrap_or(MAX_PAGE).min(MAX_PAGE);

    match services.store.list(query.skip, limit).await {
        Ok(jobs) => {
            let body: Vec<serde_json::Value> = jobs.iter().map(dto::job_to_json).collect();
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// DELETE /v1/jobs/:id
///
/// Removes only the record; a published artifact is retained. A worker
/// holding the job observes the deletion at its next checkpoint.
pub async fn delete_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_id(&id) else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found");
    };

    match services.store.delete(job_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

/// GET /v1/jobs/:id/artifact
///
/// Streams the generated markdown: the local durable copy when present,
/// the gateway object otherwise.
pub async fn get_artifact(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let Some(job_id) = parse_id(&id) else {
        return errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found");
    };

    let job = match services.store.get(job_id).await {
        Ok(Some(job)) => job,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => return errors::store_error_to_response(e),
    };

    if job.status != JobStatus::Completed {
        return errors::json_error(
            StatusCode::CONFLICT,
            "not_ready",
            format!("job is {}", job.status),
        );
    }

    let local = services.config.docs_path(&job_id);
    let bytes = match tokio::fs::read(&local).await {
        Ok(bytes) => Some(bytes),
        Err(_) if services.gateway.is_configured() => services
            .gateway
            .fetch(&format!("docs/{job_id}"))
            .await
            .ok()
            .flatten(),
        Err(_) => None,
    };

    match bytes {
        Some(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/markdown")],
            bytes,
        )
            .into_response(),
        None => errors::json_error(StatusCode::NOT_FOUND, "not_found", "artifact not found"),
    }
}

fn parse_id(raw: &str) -> Option<JobId> {
    JobId::from_str(raw).ok()
}
