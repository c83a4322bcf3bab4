//! Workspace cleaner. Runs on every exit path and cannot fail the job:
//! the outcome was decided before cleanup ran.

use std::path::Path;

/// Delete the per-job workspace tree. Failures are logged only.
pub async fn remove_workspace(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        tracing::warn!(path = %path.display(), error = %e, "workspace cleanup failed");
    }
}

/// Delete the local artifact copy once the gateway holds the bytes.
pub async fn remove_local_artifact(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), error = %e, "local artifact cleanup failed");
    }
}
