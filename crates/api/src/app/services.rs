//! Service wiring shared by every handler.

use std::sync::Arc;

use docsmith_infra::artifact_store::{ArtifactStore, DisabledArtifactStore, S3ArtifactStore};
use docsmith_infra::broker::{InMemoryBroker, RedisBroker, TaskBroker};
use docsmith_infra::job_store::{InMemoryJobStore, JobStore, PostgresJobStore};
use docsmith_infra::AppConfig;

/// The handler-facing service bundle.
pub struct AppServices {
    pub store: Arc<dyn JobStore>,
    pub broker: Arc<dyn TaskBroker>,
    pub gateway: Arc<dyn ArtifactStore>,
    pub config: AppConfig,
}

/// Wire stores from the environment: Postgres/Redis when configured,
/// in-memory otherwise (dev and tests).
pub async fn build_services(config: AppConfig) -> AppServices {
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(8)
                .connect(url)
                .await
                .expect("failed to connect to the job database");
            let store = PostgresJobStore::new(pool);
            store
                .ensure_schema()
                .await
                .expect("failed to prepare the jobs schema");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DOCSMITH_DATABASE_URL not set -- using the in-memory job store");
            Arc::new(InMemoryJobStore::new())
        }
    };

    let broker: Arc<dyn TaskBroker> = match &config.redis_url {
        Some(url) => Arc::new(
            RedisBroker::new(url, config.broker_visibility_timeout)
                .expect("invalid DOCSMITH_REDIS_URL"),
        ),
        None => {
            tracing::warn!("DOCSMITH_REDIS_URL not set -- using the in-memory broker");
            Arc::new(InMemoryBroker::new(config.broker_visibility_timeout))
        }
    };

    let gateway: Arc<dyn ArtifactStore> = match (
        config.publish.artifact_store_enabled,
        &config.publish.artifact_store_bucket,
    ) {
        (true, Some(bucket)) => Arc::new(S3ArtifactStore::new(
            bucket.clone(),
            config.publish.artifact_store_region.clone(),
            config.publish.artifact_store_endpoint.clone(),
            config.publish.artifact_store_base_url.clone(),
        )),
        _ => Arc::new(DisabledArtifactStore),
    };

    AppServices {
        store,
        broker,
        gateway,
        config,
    }
}
