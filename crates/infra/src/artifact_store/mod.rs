//! Artifact store gateway.
//!
//! One seam answers "is a store configured?"; publishers query it once
//! per invocation and nothing else in the system needs to know.

use async_trait::async_trait;

pub mod s3;

pub use s3::S3ArtifactStore;

/// Artifact store error.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactStoreError {
    #[error("artifact store not configured")]
    NotConfigured,
    #[error("artifact store request failed: {0}")]
    Request(String),
    #[error("artifact store rejected the request: HTTP {0}")]
    Status(u16),
}

/// Gateway to the durable, publicly readable artifact store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Whether uploads can succeed. Cached for the process lifetime.
    fn is_configured(&self) -> bool;

    /// Upload bytes under a stable key; returns the durable URL.
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        cache_control: &str,
    ) -> Result<String, ArtifactStoreError>;

    /// Read an object back, `None` when absent.
    async fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>, ArtifactStoreError>;

    /// Remove an object. Reserved for operator-driven deletion; the core
    /// never deletes an artifact as part of normal flow.
    async fn delete(&self, key: &str) -> Result<(), ArtifactStoreError>;
}

/// Stand-in used when no store is configured; publishers fall back to
/// the local durable copy.
#[derive(Debug, Default)]
pub struct DisabledArtifactStore;

#[async_trait]
impl ArtifactStore for DisabledArtifactStore {
    fn is_configured(&self) -> bool {
        false
    }

    async fn put(
        &self,
        _key: &str,
        _bytes: &[u8],
        _content_type: &str,
        _cache_control: &str,
    ) -> Result<String, ArtifactStoreError> {
        Err(ArtifactStoreError::NotConfigured)
    }

    async fn fetch(&self, _key: &str) -> Result<Option<Vec<u8>>, ArtifactStoreError> {
        Ok(None)
    }

    async fn delete(&self, _key: &str) -> Result<(), ArtifactStoreError> {
        Err(ArtifactStoreError::NotConfigured)
    }
}
