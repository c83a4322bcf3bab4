//! Artifact publisher: local durable copy + gateway upload.

use std::path::Path;

use docsmith_core::{Fault, FaultKind, JobId};
use docsmith_infra::artifact_store::ArtifactStore;

use super::ToolResult;

const MARKDOWN_CONTENT_TYPE: &str = "text/markdown";
const JSON_CONTENT_TYPE: &str = "application/json";
const CACHE_HINT: &str = "max-age=3600";

/// Stable gateway key for a job's documentation artifact.
pub fn docs_key(job_id: &JobId) -> String {
    format!("docs/{job_id}")
}

/// Stable gateway key for a job's comment bundle.
pub fn bundle_key(job_id: &JobId) -> String {
    format!("commented/{job_id}")
}

/// Write the documentation to the local durable path and, when the
/// gateway is configured, upload it under `docs/{job-id}`.
///
/// A gateway failure is non-fatal here: the local path stands in and the
/// caller's job still completes (logged as a warning).
pub async fn publish_docs(
    job_id: &JobId,
    documentation: &str,
    local_path: &Path,
    gateway: &dyn ArtifactStore,
) -> ToolResult<String> {
    write_local(local_path, documentation.as_bytes()).await?;

    if gateway.is_configured() {
        match gateway
            .put(
                &docs_key(job_id),
                documentation.as_bytes(),
                MARKDOWN_CONTENT_TYPE,
                CACHE_HINT,
            )
            .await
        {
            Ok(url) => return Ok(url),
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    "gateway upload failed, serving from the local copy"
                );
            }
        }
    }

    Ok(local_url(local_path))
}

/// Upload the comments bundle under `commented/{job-id}`. Unlike the
/// docs path there is no local stand-in: a failure here is terminal for
/// the caller.
pub async fn publish_bundle(
    job_id: &JobId,
    bundle_json: &str,
    gateway: &dyn ArtifactStore,
) -> ToolResult<String> {
    if !gateway.is_configured() {
        return Err(Fault::with_detail(
            FaultKind::PublishFailed,
            "artifact store not configured",
        ));
    }

    gateway
        .put(
            &bundle_key(job_id),
            bundle_json.as_bytes(),
            JSON_CONTENT_TYPE,
            CACHE_HINT,
        )
        .await
        .map_err(|e| Fault::with_detail(FaultKind::PublishFailed, e.to_string()))
}

async fn write_local(path: &Path, bytes: &[u8]) -> ToolResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Fault::with_detail(FaultKind::IoError, e.to_string()))?;
    }
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| Fault::with_detail(FaultKind::IoError, e.to_string()))
}

fn local_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docsmith_infra::artifact_store::{ArtifactStoreError, DisabledArtifactStore};
    use std::sync::Mutex;

    /// Gateway double: records puts, optionally fails them.
    #[derive(Default)]
    struct FakeGateway {
        puts: Mutex<Vec<(String, Vec<u8>, String, String)>>,
        fail_puts: bool,
    }

    #[async_trait]
    impl ArtifactStore for FakeGateway {
        fn is_configured(&self) -> bool {
            true
        }

        async fn put(
            &self,
            key: &str,
            bytes: &[u8],
            content_type: &str,
            cache_control: &str,
        ) -> Result<String, ArtifactStoreError> {
            if self.fail_puts {
                return Err(ArtifactStoreError::Status(500));
            }
            self.puts.lock().unwrap().push((
                key.to_string(),
                bytes.to_vec(),
                content_type.to_string(),
                cache_control.to_string(),
            ));
            Ok(format!("https://cdn.example.com/{key}"))
        }

        async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactStoreError> {
            Ok(self
                .puts
                .lock()
                .unwrap()
                .iter()
                .find(|(k, ..)| k == key)
                .map(|(_, bytes, ..)| bytes.clone()))
        }

        async fn delete(&self, _key: &str) -> Result<(), ArtifactStoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn publishes_locally_and_to_the_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::new();
        let local = dir.path().join("docs").join(job_id.to_string());
        let gateway = FakeGateway::default();

        let url = publish_docs(&job_id, "# Docs", &local, &gateway)
            .await
            .unwrap();
        assert_eq!(url, format!("https://cdn.example.com/docs/{job_id}"));

        // Gateway bytes match what was written locally.
        let local_bytes = std::fs::read(&local).unwrap();
        let stored = gateway.fetch(&docs_key(&job_id)).await.unwrap().unwrap();
        assert_eq!(local_bytes, stored);

        let puts = gateway.puts.lock().unwrap();
        assert_eq!(puts[0].2, "text/markdown");
        assert_eq!(puts[0].3, "max-age=3600");
    }

    #[tokio::test]
    async fn unconfigured_gateway_returns_the_local_url() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::new();
        let local = dir.path().join(job_id.to_string());

        let url = publish_docs(&job_id, "# Docs", &local, &DisabledArtifactStore)
            .await
            .unwrap();
        assert_eq!(url, format!("file://{}", local.display()));
        assert!(local.exists());
    }

    #[tokio::test]
    async fn gateway_failure_degrades_to_the_local_url() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::new();
        let local = dir.path().join(job_id.to_string());
        let gateway = FakeGateway {
            fail_puts: true,
            ..Default::default()
        };

        let url = publish_docs(&job_id, "# Docs", &local, &gateway)
            .await
            .unwrap();
        assert!(url.starts_with("file://"));
    }

    #[tokio::test]
    async fn bundle_failure_is_terminal() {
        let job_id = JobId::new();

        let unconfigured = publish_bundle(&job_id, "{}", &DisabledArtifactStore)
            .await
            .unwrap_err();
        assert_eq!(unconfigured.kind, FaultKind::PublishFailed);

        let failing = FakeGateway {
            fail_puts: true,
            ..Default::default()
        };
        let err = publish_bundle(&job_id, "{}", &failing).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::PublishFailed);

        let working = FakeGateway::default();
        let url = publish_bundle(&job_id, "{}", &working).await.unwrap();
        assert_eq!(url, format!("https://cdn.example.com/commented/{job_id}"));
    }
}
