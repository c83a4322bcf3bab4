//! Request/response DTOs and JSON mapping helpers.

use serde::Deserialize;

use docsmith_core::{Job, Variant};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Source-repository locator; normalized before storage.
    pub source: String,
    /// Caller identity, when the front-end authenticated one.
    pub caller_id: Option<String>,
    /// Opaque repository access credential; forwarded to the worker,
    /// never persisted.
    pub credential: Option<String>,
    #[serde(default)]
    pub variant: Variant,
    /// Whether the authenticating layer confirmed push access.
    #[serde(default)]
    pub has_write_access: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub skip: u64,
    pub limit: Option<u64>,
}

// -------------------------
// JSON mapping helpers
// -------------------------

pub fn job_to_json(job: &Job) -> serde_json::Value {
    serde_json::json!({
        "id": job.id.to_string(),
        "source": job.source,
        "status": job.status.as_str(),
        "error": job.error,
        "artifact_url": job.artifact_url,
        "pull_request_url": job.pull_request_url,
        "has_write_access": job.has_write_access,
        "created_at": job.created_at.to_rfc3339(),
        "updated_at": job.updated_at.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_json_carries_every_documented_field() {
        let job = Job::new("https://example.com/acme/widget", None);
        let json = job_to_json(&job);

        assert_eq!(json["status"], "pending");
        assert_eq!(json["source"], "https://example.com/acme/widget");
        assert!(json["error"].is_null());
        assert!(json["artifact_url"].is_null());
        assert!(json["pull_request_url"].is_null());
        assert_eq!(json["has_write_access"], false);
        assert!(json["created_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn create_request_defaults() {
        let request: CreateJobRequest =
            serde_json::from_str(r#"{"source": "https://example.com/a/b"}"#).unwrap();
        assert_eq!(request.variant, Variant::Docs);
        assert!(!request.has_write_access);
        assert!(request.credential.is_none());

        let with_variant: CreateJobRequest = serde_json::from_str(
            r#"{"source": "https://example.com/a/b", "variant": "docs+comments"}"#,
        )
        .unwrap();
        assert_eq!(with_variant.variant, Variant::DocsPlusComments);
    }
}
