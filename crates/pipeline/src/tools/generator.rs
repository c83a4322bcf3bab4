//! Documentation generator: prompt assembly + the bounded model call.

use std::time::Duration;

use docsmith_core::{locator, Fault, FaultKind};
use docsmith_infra::config::GenerateConfig;

use crate::prompt;
use crate::run_state::RunState;

use super::model::{with_retries, RetryPolicy};
use super::{ModelClient, ModelReply, ToolResult};

/// Generate the documentation markdown for a scanned + analyzed run.
///
/// Retries transient model faults per the policy; a response with no
/// usable text is `empty-output`. Usage telemetry is pushed onto the run
/// state for each call actually made.
pub async fn generate(
    state: &mut RunState,
    model: &dyn ModelClient,
    config: &GenerateConfig,
) -> ToolResult<String> {
    let tree = state
        .tree
        .as_ref()
        .ok_or_else(|| Fault::with_detail(FaultKind::EmptyOutput, "scan output missing"))?;
    let stats = state
        .stats
        .as_ref()
        .ok_or_else(|| Fault::with_detail(FaultKind::EmptyOutput, "scan stats missing"))?;

    let readme_excerpt = read_readme_excerpt(state, config.readme_budget_chars);
    let repo_name = locator::display_name(&state.source).to_string();

    let prompt = prompt::documentation_prompt(
        &repo_name,
        tree,
        stats,
        &state.analyses,
        readme_excerpt.as_deref(),
    );

    let policy = RetryPolicy::with_retries(config.retries);
    let reply = call_bounded(
        model,
        &prompt,
        config.output_token_budget,
        config.timeout,
        &policy,
    )
    .await?;

    state.model_usage.push(reply.usage);
    tracing::info!(
        job_id = %state.job_id,
        input_tokens = reply.usage.input_tokens,
        output_tokens = reply.usage.output_tokens,
        chars = reply.text.len(),
        "documentation generated"
    );

    let text = reply.text.trim().to_string();
    if text.is_empty() {
        return Err(Fault::new(FaultKind::EmptyOutput));
    }
    Ok(text)
}

/// One retried model call under the stage timeout.
pub async fn call_bounded(
    model: &dyn ModelClient,
    prompt: &str,
    max_tokens: u32,
    timeout: Duration,
    policy: &RetryPolicy,
) -> ToolResult<ModelReply> {
    tokio::time::timeout(
        timeout,
        with_retries(policy, || model.complete(prompt, max_tokens)),
    )
    .await
    .map_err(|_| Fault::with_detail(FaultKind::ModelUnavailable, "generation timed out"))?
}

fn read_readme_excerpt(state: &RunState, budget_chars: usize) -> Option<String> {
    let readme = state.readme()?;
    let content = std::fs::read_to_string(&readme.path).ok()?;
    let excerpt: String = content.chars().take(budget_chars).collect();
    Some(excerpt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_state::{ModelUsage, ScanStats, TreeNode};
    use crate::tools::ModelClient;
    use async_trait::async_trait;
    use docsmith_core::{JobId, Variant};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedModel {
        calls: AtomicU32,
        transient_failures: u32,
        reply: String,
    }

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> ToolResult<ModelReply> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.transient_failures {
                return Err(Fault::new(FaultKind::ModelRateLimited));
            }
            Ok(ModelReply {
                text: self.reply.clone(),
                usage: ModelUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                },
            })
        }
    }

    fn ready_state() -> RunState {
        let mut state = RunState::new(
            JobId::new(),
            "https://example.com/acme/widget",
            None,
            Variant::Docs,
            false,
        );
        state.tree = Some(TreeNode {
            name: "widget".to_string(),
            is_dir: true,
            size: None,
            children: Vec::new(),
        });
        state.stats = Some(ScanStats::default());
        state
    }

    fn test_config() -> GenerateConfig {
        GenerateConfig {
            output_token_budget: 8000,
            retries: 2,
            readme_budget_chars: 3000,
            timeout: Duration::from_secs(5),
            api_key: "test".to_string(),
            api_base_url: None,
            model: "test-model".to_string(),
            commenter_max_files: 10,
        }
    }

    #[tokio::test]
    async fn transient_then_success_records_every_call() {
        let model = ScriptedModel {
            calls: AtomicU32::new(0),
            transient_failures: 2,
            reply: "# Widget\n\nDocs.".to_string(),
        };
        let mut state = ready_state();

        let text = generate(&mut state, &model, &test_config()).await.unwrap();
        assert!(text.starts_with("# "));
        // Three calls observable via telemetry counters on the client.
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.model_usage.len(), 1);
        assert_eq!(state.model_usage[0].output_tokens, 50);
    }

    #[tokio::test]
    async fn whitespace_only_reply_is_empty_output() {
        let model = ScriptedModel {
            calls: AtomicU32::new(0),
            transient_failures: 0,
            reply: "   \n ".to_string(),
        };
        let mut state = ready_state();

        let err = generate(&mut state, &model, &test_config()).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::EmptyOutput);
    }

    #[tokio::test]
    async fn exhausted_transient_retries_stay_transient() {
        let model = ScriptedModel {
            calls: AtomicU32::new(0),
            transient_failures: 10,
            reply: String::new(),
        };
        let mut state = ready_state();
        let mut config = test_config();
        config.retries = 1;

        let err = generate(&mut state, &model, &config).await.unwrap_err();
        assert_eq!(err.kind, FaultKind::ModelRateLimited);
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }
}
