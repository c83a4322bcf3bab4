use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use docsmith_infra::job_store::JobStoreError;

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    match err {
        JobStoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        JobStoreError::Domain(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", e.to_string())
        }
        JobStoreError::Storage(msg) => {
            tracing::error!(error = %msg, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "internal error")
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
