//! Worker process entrypoint.
//!
//! Exit codes: 0 clean shutdown, 64 configuration error, 69 broker
//! unavailable at startup, 70 uncaught runtime fault.

use std::sync::Arc;

use docsmith_infra::artifact_store::{ArtifactStore, DisabledArtifactStore, S3ArtifactStore};
use docsmith_infra::broker::{InMemoryBroker, RedisBroker, TaskBroker};
use docsmith_infra::job_store::{InMemoryJobStore, JobStore, PostgresJobStore};
use docsmith_infra::AppConfig;
use docsmith_pipeline::stages::PipelineConfig;
use docsmith_pipeline::tools::code_host::GithubCodeHost;
use docsmith_pipeline::tools::fetcher::GitFetcher;
use docsmith_pipeline::tools::model::AnthropicModelClient;
use docsmith_pipeline::Pipeline;
use docsmith_worker::recovery::ReaperConfig;
use docsmith_worker::{Reaper, RuntimeConfig, WorkerRuntime};

const EX_OK: i32 = 0;
const EX_CONFIG: i32 = 64;
const EX_UNAVAILABLE: i32 = 69;
const EX_SOFTWARE: i32 = 70;

#[tokio::main]
async fn main() {
    docsmith_observability::init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(EX_CONFIG);
        }
    };

    let code = run(config).await;
    std::process::exit(code);
}

async fn run(config: AppConfig) -> i32 {
    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            let pool = match sqlx::postgres::PgPoolOptions::new()
                .max_connections(8)
                .connect(url)
                .await
            {
                Ok(pool) => pool,
                Err(e) => {
                    tracing::error!(error = %e, "database unavailable");
                    return EX_SOFTWARE;
                }
            };
            let store = PostgresJobStore::new(pool);
            if let Err(e) = store.ensure_schema().await {
                tracing::error!(error = %e, "schema setup failed");
                return EX_SOFTWARE;
            }
            Arc::new(store)
        }
        None => {
            tracing::warn!("DOCSMITH_DATABASE_URL not set -- using the in-memory job store");
            Arc::new(InMemoryJobStore::new())
        }
    };

    let broker: Arc<dyn TaskBroker> = match &config.redis_url {
        Some(url) => {
            let broker = match RedisBroker::new(url, config.broker_visibility_timeout) {
                Ok(broker) => broker,
                Err(e) => {
                    tracing::error!(error = %e, "broker unavailable");
                    return EX_UNAVAILABLE;
                }
            };
            if let Err(e) = broker.check_connection().await {
                tracing::error!(error = %e, "broker unavailable");
                return EX_UNAVAILABLE;
            }
            Arc::new(broker)
        }
        None => {
            tracing::warn!("DOCSMITH_REDIS_URL not set -- using the in-memory broker");
            Arc::new(InMemoryBroker::new(config.broker_visibility_timeout))
        }
    };

    let gateway: Arc<dyn ArtifactStore> = if config.publish.artifact_store_enabled {
        match &config.publish.artifact_store_bucket {
            Some(bucket) => Arc::new(S3ArtifactStore::new(
                bucket.clone(),
                config.publish.artifact_store_region.clone(),
                config.publish.artifact_store_endpoint.clone(),
                config.publish.artifact_store_base_url.clone(),
            )),
            None => Arc::new(DisabledArtifactStore),
        }
    } else {
        Arc::new(DisabledArtifactStore)
    };

    let pipeline = Arc::new(Pipeline::new(
        Arc::new(GitFetcher::new(config.fetch.timeout)),
        Arc::new(AnthropicModelClient::with_base_url(
            config.generate.api_key.clone(),
            config.generate.model.clone(),
            config
                .generate
                .api_base_url
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        )),
        gateway,
        Arc::new(GithubCodeHost::new()),
        PipelineConfig {
            scan: config.scan.clone(),
            analyze: config.analyze.clone(),
            generate: config.generate.clone(),
            workspace_root: config.workspace_root.clone(),
        },
    ));

    let runtime = Arc::new(WorkerRuntime::new(
        store.clone(),
        broker.clone(),
        pipeline,
        RuntimeConfig::from_app(&config),
    ));
    let handle = runtime.spawn();

    let (reaper_shutdown_tx, reaper_shutdown_rx) = tokio::sync::watch::channel(false);
    let reaper = Reaper::new(store, broker, ReaperConfig::from_app(&config));
    let reaper_task = tokio::spawn(reaper.run(reaper_shutdown_rx));

    tracing::info!(workers = config.workers, "docsmith worker running");

    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("signal handler failed");
        return EX_SOFTWARE;
    }

    tracing::info!("shutting down");
    let _ = reaper_shutdown_tx.send(true);
    handle.shutdown().await;
    let _ = reaper_task.await;

    EX_OK
}
