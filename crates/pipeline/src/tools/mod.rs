//! Stage tools.
//!
//! Each tool is a pure function over its inputs with an explicit typed
//! result; tools never touch the job store or the broker. The traits
//! here are the seams to external collaborators (repository host, model
//! endpoint, code host); local-filesystem tools are plain functions.

use std::path::Path;

use async_trait::async_trait;

use docsmith_core::Fault;

use crate::run_state::{FetchMeta, ModelUsage};

pub mod analyzer;
pub mod cleaner;
pub mod code_host;
pub mod commenter;
pub mod fetcher;
pub mod generator;
pub mod model;
pub mod publisher;
pub mod scanner;

/// Result type shared by all stage tools.
pub type ToolResult<T> = Result<T, Fault>;

/// Obtains a shallow snapshot of a repository's default branch.
#[async_trait]
pub trait RepoFetcher: Send + Sync {
    async fn fetch(
        &self,
        source: &str,
        credential: Option<&str>,
        dest: &Path,
    ) -> ToolResult<FetchMeta>;
}

/// One model completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    pub text: String,
    pub usage: ModelUsage,
}

/// External language model endpoint.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> ToolResult<ModelReply>;
}

/// The code host's pull-request surface.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Resolve the authenticated user's commit identity; implementations
    /// fall back to a neutral identity when the lookup fails.
    async fn commit_identity(&self, credential: &str) -> (String, String);

    /// The repository's default branch.
    async fn default_branch(
        &self,
        owner: &str,
        repo: &str,
        credential: &str,
    ) -> ToolResult<String>;

    /// Open a pull request from `head` onto `base`; returns the PR URL.
    async fn open_pull_request(
        &self,
        owner: &str,
        repo: &str,
        credential: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> ToolResult<String>;
}
