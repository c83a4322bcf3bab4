//! Inline-comment generation for the docs+comments variant.

use serde::{Deserialize, Serialize};

use docsmith_core::{Fault, FaultKind};
use docsmith_infra::config::GenerateConfig;

use crate::prompt;
use crate::run_state::RunState;

use super::model::RetryPolicy;
use super::{generator, ModelClient, ToolResult};

/// One commented source file, kept alongside the original for
/// side-by-side rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentedFile {
    pub path: String,
    pub original: String,
    pub commented: String,
}

/// Generate commented versions of the run's highest-priority code
/// files, one model call per file.
///
/// Per-file failures are skipped; producing nothing at all is
/// `empty-output`.
pub async fn comment_files(
    state: &mut RunState,
    model: &dyn ModelClient,
    config: &GenerateConfig,
) -> ToolResult<Vec<CommentedFile>> {
    let selection: Vec<(String, std::path::PathBuf, String)> = state
        .code_files_by_priority()
        .into_iter()
        .take(config.commenter_max_files)
        .map(|f| (f.relative_path.clone(), f.path.clone(), f.extension.clone()))
        .collect();

    let policy = RetryPolicy::with_retries(config.retries);
    let mut commented = Vec::new();

    for (relative_path, path, extension) in selection {
        let original = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(job_id = %state.job_id, file = %relative_path, error = %e, "skipping unreadable file");
                continue;
            }
        };

        let language = language_tag(&extension);
        let prompt = prompt::comment_prompt(&relative_path, language, &original);

        match generator::call_bounded(
            model,
            &prompt,
            config.output_token_budget,
            config.timeout,
            &policy,
        )
        .await
        {
            Ok(reply) => {
                state.model_usage.push(reply.usage);
                let text = strip_code_fence(&reply.text);
                if text.trim().is_empty() {
                    tracing::warn!(job_id = %state.job_id, file = %relative_path, "empty comment reply, skipping file");
                    continue;
                }
                commented.push(CommentedFile {
                    path: relative_path,
                    original,
                    commented: text,
                });
            }
            Err(fault) if fault.kind.is_terminal() => return Err(fault),
            Err(fault) => {
                // Transient even after the tool's own retries; isolate to
                // this file rather than burning the whole run.
                tracing::warn!(job_id = %state.job_id, file = %relative_path, error = %fault, "comment generation failed, skipping file");
            }
        }
    }

    if commented.is_empty() {
        return Err(Fault::with_detail(
            FaultKind::EmptyOutput,
            "no files could be commented",
        ));
    }
    Ok(commented)
}

/// The JSON bundle published when no pull request is possible.
pub fn bundle_json(source: &str, files: &[CommentedFile]) -> String {
    serde_json::json!({
        "source": source,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "files": files,
    })
    .to_string()
}

fn language_tag(extension: &str) -> &'static str {
    match extension {
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "c" | "h" => "c",
        "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        _ => "code",
    }
}

/// Remove a wrapping markdown code fence from a model reply.
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() < 2 {
        return trimmed.to_string();
    }
    let end = if lines.last().map(|l| l.trim()) == Some("```") {
        lines.len() - 1
    } else {
        lines.len()
    };
    lines[1..end].join("\n")
}
