//! Code-host integration: local git branch/commit/push plus the REST
//! pull-request surface.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;

use docsmith_core::{Fault, FaultKind};

use super::commenter::CommentedFile;
use super::{CodeHost, ToolResult};

const FALLBACK_NAME: &str = "docsmith";
const FALLBACK_EMAIL: &str = "noreply@docsmith.dev";

pub const PR_TITLE: &str = "Add AI-generated inline code comments";

pub const PR_BODY: &str = "## AI-Generated Code Comments\n\n\
This pull request adds inline comments to improve code readability.\n\n\
### What was added\n\
- Function and method documentation\n\
- Inline comments explaining non-obvious logic\n\n\
### Review notes\n\
Comments were generated automatically from an analysis of the codebase. \
Please check that they describe the code accurately, and amend or drop \
any that do not.\n";

/// Branch name for one comment run: `ai-comments-{UTC timestamp}`.
pub fn branch_name(now: chrono::DateTime<Utc>) -> String {
    format!("ai-comments-{}", now.format("%Y%m%d-%H%M%S"))
}

async fn git(repo: &Path, args: &[&str]) -> ToolResult<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .await
        .map_err(|e| Fault::with_detail(FaultKind::IoError, e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Fault::with_detail(
            FaultKind::PublishFailed,
            format!("git {} failed: {}", args.first().unwrap_or(&""), stderr.trim()),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Create the comment branch in the fetched workspace, write the
/// commented files, and commit as the resolved identity.
pub async fn commit_comment_branch(
    repo: &Path,
    branch: &str,
    files: &[CommentedFile],
    identity: &(String, String),
) -> ToolResult<()> {
    git(repo, &["config", "user.name", &identity.0]).await?;
    git(repo, &["config", "user.email", &identity.1]).await?;
    git(repo, &["checkout", "-b", branch]).await?;

    for file in files {
        let path = repo.join(&file.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Fault::with_detail(FaultKind::IoError, e.to_string()))?;
        }
        tokio::fs::write(&path, &file.commented)
            .await
            .map_err(|e| Fault::with_detail(FaultKind::IoError, e.to_string()))?;
    }

    git(repo, &["add", "-A"]).await?;
    git(repo, &["commit", "-m", PR_TITLE]).await?;
    Ok(())
}

/// Push the branch through an authenticated remote.
pub async fn push_branch(
    repo: &Path,
    branch: &str,
    source: &str,
    credential: &str,
) -> ToolResult<()> {
    let auth_url = match source.strip_prefix("https://") {
        Some(rest) => format!("https://x-access-token:{credential}@{rest}.git"),
        None => {
            return Err(Fault::with_detail(
                FaultKind::PublishFailed,
                "cannot push to a non-https locator",
            ));
        }
    };

    // Replace any stale auth remote from a previous attempt.
    let _ = git(repo, &["remote", "remove", "auth_origin"]).await;
    git(repo, &["remote", "add", "auth_origin", &auth_url]).await?;
    git(repo, &["push", "-u", "auth_origin", branch]).await?;
    Ok(())
}

/// GitHub-compatible REST implementation of the pull-request surface.
pub struct GithubCodeHost {
    client: reqwest::Client,
    api_base: String,
}

impl GithubCodeHost {
    pub fn new() -> Self {
        Self::with_api_base("https://api.github.com")
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str, credential: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.api_base))
            .header("Authorization", format!("Bearer {credential}"))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "docsmith")
    }
}

impl Default for GithubCodeHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeHost for GithubCodeHost {
    async fn commit_identity(&self, credential: &str) -> (String, String) {
        let response = self
            .request(reqwest::Method::GET, "/user", credential)
            .send()
            .await;

        let Ok(response) = response else {
            return (FALLBACK_NAME.to_string(), FALLBACK_EMAIL.to_string());
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "user lookup failed, using fallback identity");
            return (FALLBACK_NAME.to_string(), FALLBACK_EMAIL.to_string());
        }

        let Ok(user) = response.json::<serde_json::Value>().await else {
            return (FALLBACK_NAME.to_string(), FALLBACK_EMAIL.to_string());
        };

        let login = user["login"].as_str().unwrap_or(FALLBACK_NAME);
        let name = user["name"].as_str().unwrap_or(login).to_string();
        let email = user["email"]
            .as_str()
            .map(|e| e.to_string())
            .unwrap_or_else(|| match user["id"].as_u64() {
                Some(id) => format!("{id}+{login}@users.noreply.github.com"),
                None => FALLBACK_EMAIL.to_string(),
            });
        (name, email)
    }

    async fn default_branch(
        &self,
        owner: &str,
        repo: &str,
        credential: &str,
    ) -> ToolResult<String> {
        let response = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{owner}/{repo}"),
                credential,
            )
            .send()
            .await
            .map_err(|e| Fault::with_detail(FaultKind::Network, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Fault::with_detail(
                FaultKind::PublishFailed,
                format!("repository lookup failed: HTTP {}", response.status()),
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Fault::with_detail(FaultKind::Network, e.to_string()))?;
        body["default_branch"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                Fault::with_detail(FaultKind::PublishFailed, "no default branch in response")
            })
    }

    async fn open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        credential: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> ToolResult<String> {
        let payload = serde_json::json!({
            "title": title,
            "body": body,
            "head": head,
            "base": base,
        });

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{owner}/{repo}/pulls"),
                credential,
            )
            .json(&payload)
            .send()
            .await
            .map_err(|e| Fault::with_detail(FaultKind::Network, e.to_string()))?;

        if response.status().as_u16() != 201 {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Fault::with_detail(
                FaultKind::PublishFailed,
                format!(
                    "pull request creation failed: HTTP {status}: {}",
                    text.chars().take(120).collect::<String>()
                ),
            ));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Fault::with_detail(FaultKind::Network, e.to_string()))?;
        body["html_url"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Fault::with_detail(FaultKind::PublishFailed, "no PR URL in response"))
    }
}
