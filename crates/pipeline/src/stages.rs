//! The fixed linear stage sequence.
//!
//! Stages share the run state; the first error skips everything except
//! cleanup, which always runs and cannot be cancelled. Cancellation is
//! observed at stage boundaries only.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use docsmith_core::{locator, Fault, FaultKind};
use docsmith_infra::artifact_store::ArtifactStore;
use docsmith_infra::config::{AnalyzeConfig, GenerateConfig, ScanConfig};
use docsmith_observability::metrics;

use crate::cancel::{CancelReason, CancelToken};
use crate::run_state::{RunState, Stage};
use crate::tools::analyzer::AnalyzerRegistry;
use crate::tools::{cleaner, code_host, commenter, generator, publisher, scanner};
use crate::tools::{CodeHost, ModelClient, RepoFetcher};

/// Why the stage sequence stopped early.
enum StageExit {
    Fault(Fault),
    Cancelled(CancelReason),
}

impl From<Fault> for StageExit {
    fn from(fault: Fault) -> Self {
        StageExit::Fault(fault)
    }
}

/// Configuration slice the pipeline itself needs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub scan: ScanConfig,
    pub analyze: AnalyzeConfig,
    pub generate: GenerateConfig,
    /// Root of the workspace tree (`repos/{job-id}`, `docs/{job-id}`).
    pub workspace_root: PathBuf,
}

impl PipelineConfig {
    fn repo_workspace(&self, state: &RunState) -> PathBuf {
        self.workspace_root
            .join("repos")
            .join(state.job_id.to_string())
    }

    fn docs_path(&self, state: &RunState) -> PathBuf {
        self.workspace_root
            .join("docs")
            .join(state.job_id.to_string())
    }
}

/// The pipeline: stage tools wired to one configuration, shared by all
/// worker slots.
pub struct Pipeline {
    fetcher: Arc<dyn RepoFetcher>,
    model: Arc<dyn ModelClient>,
    gateway: Arc<dyn ArtifactStore>,
    code_host: Arc<dyn CodeHost>,
    analyzer: AnalyzerRegistry,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn RepoFetcher>,
        model: Arc<dyn ModelClient>,
        gateway: Arc<dyn ArtifactStore>,
        code_host: Arc<dyn CodeHost>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            fetcher,
            model,
            gateway,
            code_host,
            analyzer: AnalyzerRegistry::with_defaults(),
            config,
        }
    }

    /// Run S1..S5 with short-circuiting, then always S6 (cleanup).
    pub async fn run(&self, mut state: RunState, cancel: &CancelToken) -> RunState {
        let started = Instant::now();

        match self.run_stages(&mut state, cancel).await {
            Ok(()) => {}
            Err(StageExit::Fault(fault)) => {
                tracing::warn!(
                    job_id = %state.job_id,
                    stage = %state.stage,
                    error = %fault,
                    "pipeline short-circuited"
                );
                state.fault = Some(fault);
            }
            Err(StageExit::Cancelled(reason)) => match reason {
                CancelReason::SoftDeadline => {
                    tracing::warn!(job_id = %state.job_id, stage = %state.stage, "soft deadline reached");
                    state.fault = Some(Fault::new(FaultKind::TimedOut));
                }
                other => {
                    tracing::info!(job_id = %state.job_id, stage = %state.stage, reason = ?other, "run cancelled");
                    state.cancelled = Some(other);
                }
            },
        }

        self.cleanup(&mut state).await;
        metrics::job_duration(started.elapsed().as_millis() as u64);
        state
    }

    async fn run_stages(
        &self,
        state: &mut RunState,
        cancel: &CancelToken,
    ) -> Result<(), StageExit> {
        self.fetch(state).await?;
        self.boundary(cancel)?;
        self.scan(state)?;
        self.boundary(cancel)?;
        self.analyze(state)?;
        self.boundary(cancel)?;
        self.generate(state).await?;
        self.boundary(cancel)?;
        self.publish(state).await?;
        Ok(())
    }

    /// Stage-boundary cancellation checkpoint.
    fn boundary(&self, cancel: &CancelToken) -> Result<(), StageExit> {
        match cancel.reason() {
            Some(reason) => Err(StageExit::Cancelled(reason)),
            None => Ok(()),
        }
    }

    async fn fetch(&self, state: &mut RunState) -> Result<(), StageExit> {
        state.stage = Stage::Fetch;
        let started = Instant::now();
        let workspace = self.config.repo_workspace(state);

        let meta = self
            .fetcher
            .fetch(&state.source, state.credential.as_deref(), &workspace)
            .await?;

        tracing::info!(
            job_id = %state.job_id,
            branch = %meta.branch,
            revision = %meta.revision,
            "repository fetched"
        );
        state.workspace = Some(workspace);
        state.fetch = Some(meta);
        metrics::stage_duration("fetch", started.elapsed().as_millis() as u64);
        Ok(())
    }

    fn scan(&self, state: &mut RunState) -> Result<(), StageExit> {
        state.stage = Stage::Scan;
        let started = Instant::now();
        let workspace = state
            .workspace
            .as_ref()
            .ok_or_else(|| Fault::with_detail(FaultKind::IoError, "no workspace"))?;

        let output = scanner::scan(workspace, &self.config.scan)?;
        if output.stats.truncated {
            tracing::warn!(
                job_id = %state.job_id,
                files = output.stats.total_files,
                "scan truncated at configured limits"
            );
        }
        tracing::info!(job_id = %state.job_id, files = output.stats.total_files, "workspace scanned");

        state.tree = Some(output.tree);
        state.files = output.files;
        state.stats = Some(output.stats);
        metrics::stage_duration("scan", started.elapsed().as_millis() as u64);
        Ok(())
    }

    fn analyze(&self, state: &mut RunState) -> Result<(), StageExit> {
        state.stage = Stage::Analyze;
        let started = Instant::now();

        let candidates = state.code_files_by_priority();
        let analyses = self
            .analyzer
            .analyze_selection(candidates.into_iter(), self.config.analyze.max_files);

        if analyses.is_empty() {
            return Err(Fault::new(FaultKind::NoAnalyzableFiles).into());
        }

        tracing::info!(
            job_id = %state.job_id,
            analyzed = analyses.len(),
            parse_errors = analyses.iter().filter(|a| !a.is_ok()).count(),
            "code analyzed"
        );
        state.analyses = analyses;
        metrics::stage_duration("analyze", started.elapsed().as_millis() as u64);
        Ok(())
    }

    async fn generate(&self, state: &mut RunState) -> Result<(), StageExit> {
        state.stage = Stage::Generate;
        let started = Instant::now();

        let documentation =
            generator::generate(state, self.model.as_ref(), &self.config.generate).await?;
        for usage in &state.model_usage {
            metrics::model_call(usage.input_tokens, usage.output_tokens);
        }
        state.documentation = Some(documentation);
        metrics::stage_duration("generate", started.elapsed().as_millis() as u64);
        Ok(())
    }

    async fn publish(&self, state: &mut RunState) -> Result<(), StageExit> {
        state.stage = Stage::Publish;
        let started = Instant::now();

        let documentation = state
            .documentation
            .clone()
            .ok_or_else(|| Fault::with_detail(FaultKind::EmptyOutput, "nothing to publish"))?;

        let docs_url = publisher::publish_docs(
            &state.job_id,
            &documentation,
            &self.config.docs_path(state),
            self.gateway.as_ref(),
        )
        .await?;
        state.artifact_url = Some(docs_url);

        if state.variant == docsmith_core::Variant::DocsPlusComments {
            self.publish_comments(state).await?;
        }

        metrics::stage_duration("publish", started.elapsed().as_millis() as u64);
        Ok(())
    }

    /// The comments leg: PR when write access allows it, bundle
    /// otherwise; PR failure falls back to the bundle. Exactly one of
    /// the two URLs ends up recorded.
    async fn publish_comments(&self, state: &mut RunState) -> Result<(), StageExit> {
        let commented =
            commenter::comment_files(state, self.model.as_ref(), &self.config.generate).await?;

        if state.has_write_access {
            if let Some(credential) = state.credential.clone() {
                match self.open_pull_request(state, &commented, &credential).await {
                    Ok(pr_url) => {
                        tracing::info!(job_id = %state.job_id, pr_url = %pr_url, "pull request opened");
                        state.pull_request_url = Some(pr_url);
                        return Ok(());
                    }
                    Err(fault) => {
                        tracing::warn!(
                            job_id = %state.job_id,
                            error = %fault,
                            "pull request failed, falling back to bundle"
                        );
                    }
                }
            }
        }

        let bundle = commenter::bundle_json(&state.source, &commented);
        let bundle_url =
            publisher::publish_bundle(&state.job_id, &bundle, self.gateway.as_ref()).await?;
        tracing::info!(job_id = %state.job_id, bundle_url = %bundle_url, "comment bundle published");
        // The bundle supersedes the docs URL as the recorded artifact.
        state.artifact_url = Some(bundle_url);
        Ok(())
    }

    async fn open_pull_request(
        &self,
        state: &RunState,
        commented: &[commenter::CommentedFile],
        credential: &str,
    ) -> Result<String, Fault> {
        let workspace = state
            .workspace
            .as_ref()
            .ok_or_else(|| Fault::with_detail(FaultKind::PublishFailed, "no workspace"))?;
        let (owner, repo) = locator::owner_repo(&state.source).ok_or_else(|| {
            Fault::with_detail(FaultKind::PublishFailed, "locator has no owner/repo")
        })?;

        let identity = self.code_host.commit_identity(credential).await;
        let branch = code_host::branch_name(chrono::Utc::now());

        code_host::commit_comment_branch(workspace, &branch, commented, &identity).await?;
        code_host::push_branch(workspace, &branch, &state.source, credential).await?;

        let base = self
            .code_host
            .default_branch(owner, repo, credential)
            .await?;
        self.code_host
            .open_pull_request(
                owner,
                repo,
                credential,
                &branch,
                &base,
                code_host::PR_TITLE,
                code_host::PR_BODY,
            )
            .await
    }

    /// S6. Always runs; never cancellable; never changes the outcome.
    async fn cleanup(&self, state: &mut RunState) {
        state.stage = Stage::Cleanup;

        let workspace = self.config.repo_workspace(state);
        cleaner::remove_workspace(&workspace).await;

        // The local artifact copy is kept only while it is the one
        // durable copy; once the gateway holds the bytes it goes too.
        if let Some(url) = &state.artifact_url {
            if !url.starts_with("file://") && self.gateway.is_configured() {
                cleaner::remove_local_artifact(&self.config.docs_path(state)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_state::{FetchMeta, ModelUsage};
    use crate::tools::{ModelReply, ToolResult};
    use async_trait::async_trait;
    use docsmith_core::{JobId, Variant};
    use docsmith_infra::artifact_store::{ArtifactStoreError, DisabledArtifactStore};
    use docsmith_infra::config::{
        AnalyzeConfig, GenerateConfig, ScanConfig, DEFAULT_IGNORED_FILES, DEFAULT_IGNORED_NAMES,
    };
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fetcher double: materializes a fixed workspace on disk.
    struct FakeFetcher {
        files: Vec<(&'static str, &'static str)>,
        fail_with: Option<FaultKind>,
    }

    #[async_trait]
    impl RepoFetcher for FakeFetcher {
        async fn fetch(
            &self,
            _source: &str,
            _credential: Option<&str>,
            dest: &Path,
        ) -> ToolResult<FetchMeta> {
            if let Some(kind) = self.fail_with {
                return Err(Fault::new(kind));
            }
            std::fs::create_dir_all(dest).unwrap();
            for (rel, contents) in &self.files {
                let path = dest.join(rel);
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                std::fs::write(path, contents).unwrap();
            }
            Ok(FetchMeta {
                branch: "main".to_string(),
                revision: "abc123".to_string(),
                author: "Dev <dev@example.com>".to_string(),
                commit_summary: "initial".to_string(),
            })
        }
    }

    struct FixedModel(String);

    #[async_trait]
    impl crate::tools::ModelClient for FixedModel {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> ToolResult<ModelReply> {
            Ok(ModelReply {
                text: self.0.clone(),
                usage: ModelUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
            })
        }
    }

    struct NoPrHost;

    #[async_trait]
    impl CodeHost for NoPrHost {
        async fn commit_identity(&self, _credential: &str) -> (String, String) {
            ("docsmith".to_string(), "noreply@docsmith.dev".to_string())
        }

        async fn default_branch(
            &self,
            _owner: &str,
            _repo: &str,
            _credential: &str,
        ) -> ToolResult<String> {
            Err(Fault::new(FaultKind::PublishFailed))
        }

        async fn open_pull_request(
            &self,
            _owner: &str,
            _repo: &str,
            _credential: &str,
            _head: &str,
            _base: &str,
            _title: &str,
            _body: &str,
        ) -> ToolResult<String> {
            Err(Fault::new(FaultKind::PublishFailed))
        }
    }

    #[derive(Default)]
    struct RecordingGateway {
        puts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ArtifactStore for RecordingGateway {
        fn is_configured(&self) -> bool {
            true
        }

        async fn put(
            &self,
            key: &str,
            _bytes: &[u8],
            _content_type: &str,
            _cache_control: &str,
        ) -> Result<String, ArtifactStoreError> {
            self.puts.lock().unwrap().push(key.to_string());
            Ok(format!("https://cdn.example.com/{key}"))
        }

        async fn fetch(&self, _key: &str) -> Result<Option<Vec<u8>>, ArtifactStoreError> {
            Ok(None)
        }

        async fn delete(&self, _key: &str) -> Result<(), ArtifactStoreError> {
            Ok(())
        }
    }

    fn pipeline_config(root: &Path) -> PipelineConfig {
        PipelineConfig {
            scan: ScanConfig {
                max_depth: 10,
                max_files: 1000,
                ignored_names: DEFAULT_IGNORED_NAMES.iter().map(|s| s.to_string()).collect(),
                ignored_files: DEFAULT_IGNORED_FILES.iter().map(|s| s.to_string()).collect(),
            },
            analyze: AnalyzeConfig { max_files: 20 },
            generate: GenerateConfig {
                output_token_budget: 8000,
                retries: 0,
                readme_budget_chars: 3000,
                timeout: Duration::from_secs(5),
                api_key: "test".to_string(),
                api_base_url: None,
                model: "test-model".to_string(),
                commenter_max_files: 10,
            },
            workspace_root: root.to_path_buf(),
        }
    }

    fn docs_pipeline(root: &Path, fetcher: FakeFetcher) -> Pipeline {
        Pipeline::new(
            Arc::new(fetcher),
            Arc::new(FixedModel("# Widget\n\nGenerated docs.".to_string())),
            Arc::new(DisabledArtifactStore),
            Arc::new(NoPrHost),
            pipeline_config(root),
        )
    }

    fn state(variant: Variant) -> RunState {
        RunState::new(
            JobId::new(),
            "https://example.com/acme/widget",
            None,
            variant,
            false,
        )
    }

    fn python_repo() -> FakeFetcher {
        FakeFetcher {
            files: vec![
                ("README.md", "# Widget\nA sample."),
                ("main.py", "def main():\n    pass\n"),
                ("src/util.py", "def helper(x):\n    return x\n"),
            ],
            fail_with: None,
        }
    }

    #[tokio::test]
    async fn happy_path_docs_only() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = docs_pipeline(dir.path(), python_repo());

        let result = pipeline.run(state(Variant::Docs), &CancelToken::never()).await;

        assert!(result.fault.is_none(), "fault: {:?}", result.fault);
        assert!(result.cancelled.is_none());
        let artifact_url = result.artifact_url.as_deref().unwrap();
        assert!(artifact_url.starts_with("file://"));
        assert!(result.pull_request_url.is_none());
        assert_eq!(result.fetch.as_ref().unwrap().branch, "main");
        assert_eq!(result.analyses.len(), 2);

        // The local copy is the durable artifact and begins with markdown.
        let docs = std::fs::read_to_string(
            dir.path().join("docs").join(result.job_id.to_string()),
        )
        .unwrap();
        assert!(docs.starts_with("# "));

        // P5: the fetched workspace is gone on the success path.
        assert!(!dir
            .path()
            .join("repos")
            .join(result.job_id.to_string())
            .exists());
    }

    #[tokio::test]
    async fn fetch_failure_short_circuits_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = docs_pipeline(
            dir.path(),
            FakeFetcher {
                files: vec![],
                fail_with: Some(FaultKind::AuthDenied),
            },
        );

        let result = pipeline.run(state(Variant::Docs), &CancelToken::never()).await;

        let fault = result.fault.unwrap();
        assert_eq!(fault.kind, FaultKind::AuthDenied);
        assert_eq!(fault.to_line(), "auth-denied");
        assert!(result.artifact_url.is_none());
        assert!(result.documentation.is_none());
        assert!(!dir
            .path()
            .join("repos")
            .join(result.job_id.to_string())
            .exists());
    }

    #[tokio::test]
    async fn empty_repository_fails_with_no_analyzable_files() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = docs_pipeline(
            dir.path(),
            FakeFetcher {
                files: vec![],
                fail_with: None,
            },
        );

        let result = pipeline.run(state(Variant::Docs), &CancelToken::never()).await;
        assert_eq!(result.fault.unwrap().kind, FaultKind::NoAnalyzableFiles);
    }

    #[tokio::test]
    async fn cancellation_at_a_boundary_yields_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = docs_pipeline(dir.path(), python_repo());

        let cancel = CancelToken::new(Some(Instant::now() - Duration::from_millis(1)));
        let result = pipeline.run(state(Variant::Docs), &cancel).await;

        assert_eq!(result.fault.unwrap().kind, FaultKind::TimedOut);
        // Cleanup still ran.
        assert!(!dir
            .path()
            .join("repos")
            .join(result.job_id.to_string())
            .exists());
    }

    #[tokio::test]
    async fn deleted_job_cancellation_is_not_a_fault() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = docs_pipeline(dir.path(), python_repo());

        let cancel = CancelToken::never();
        cancel.cancel(CancelReason::JobDeleted);
        let result = pipeline.run(state(Variant::Docs), &cancel).await;

        assert!(result.fault.is_none());
        assert_eq!(result.cancelled, Some(CancelReason::JobDeleted));
    }

    #[tokio::test]
    async fn comments_variant_without_write_access_publishes_a_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(RecordingGateway::default());
        let pipeline = Pipeline::new(
            Arc::new(python_repo()),
            Arc::new(FixedModel("# docs and comments".to_string())),
            gateway.clone(),
            Arc::new(NoPrHost),
            pipeline_config(dir.path()),
        );

        let result = pipeline
            .run(state(Variant::DocsPlusComments), &CancelToken::never())
            .await;

        assert!(result.fault.is_none(), "fault: {:?}", result.fault);
        // Exactly one of PR / bundle is recorded; here it is the bundle.
        assert!(result.pull_request_url.is_none());
        let expected = format!("https://cdn.example.com/commented/{}", result.job_id);
        assert_eq!(result.artifact_url.as_deref(), Some(expected.as_str()));

        let puts = gateway.puts.lock().unwrap();
        assert!(puts.contains(&format!("docs/{}", result.job_id)));
        assert!(puts.contains(&format!("commented/{}", result.job_id)));
    }

    #[tokio::test]
    async fn comments_variant_without_gateway_is_publish_failed() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            Arc::new(python_repo()),
            Arc::new(FixedModel("# docs".to_string())),
            Arc::new(DisabledArtifactStore),
            Arc::new(NoPrHost),
            pipeline_config(dir.path()),
        );

        let result = pipeline
            .run(state(Variant::DocsPlusComments), &CancelToken::never())
            .await;
        assert_eq!(result.fault.unwrap().kind, FaultKind::PublishFailed);
    }
}
