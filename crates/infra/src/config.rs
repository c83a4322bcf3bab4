//! Process configuration — loaded from environment variables.
//!
//! Loaded once at startup, validated, then immutable for the process
//! lifetime. The worker runtime and API wiring receive the whole value;
//! stage tools receive only the slice they need.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use docsmith_core::{DomainError, DomainResult};

/// Directory names the scanner never descends into. Union of the ignore
/// sets the original deployment accumulated; a closed set by design.
pub const DEFAULT_IGNORED_NAMES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "__pycache__",
    ".pytest_cache",
    "venv",
    "env",
    ".venv",
    "virtualenv",
    ".idea",
    ".vscode",
    ".vs",
    "build",
    "dist",
    ".next",
    "out",
    "target",
    "coverage",
    ".coverage",
    "htmlcov",
    ".egg-info",
];

/// File names the scanner skips outright.
pub const DEFAULT_IGNORED_FILES: &[&str] = &[
    ".DS_Store",
    "Thumbs.db",
    ".gitignore",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
];

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Size of the worker pool (W).
    pub workers: usize,
    /// Hard per-job deadline (D).
    pub job_deadline_hard: Duration,
    /// Cooperative per-job deadline.
    pub job_deadline_soft: Duration,
    /// Broker visibility timeout (T_vis).
    pub broker_visibility_timeout: Duration,
    /// Poison-pill threshold (N_max).
    pub broker_poison_threshold: u32,
    /// Grace window before a never-dequeued pending job is failed.
    pub enqueue_grace: Duration,
    /// Retention for terminal job records, in days.
    pub retention_days: i64,
    /// Root of the per-job workspace tree.
    pub workspace_root: PathBuf,
    /// Redis connection URL, when a Redis broker is used.
    pub redis_url: Option<String>,
    /// Postgres connection URL, when a persistent job store is used.
    pub database_url: Option<String>,
    /// API bind address.
    pub bind_addr: String,

    pub fetch: FetchConfig,
    pub scan: ScanConfig,
    pub analyze: AnalyzeConfig,
    pub generate: GenerateConfig,
    pub publish: PublishConfig,
}

/// Slice of config the repository fetcher needs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Per-stage timeout (T_fetch).
    pub timeout: Duration,
}

/// Slice of config the tree scanner needs.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Maximum recursion depth (D_max).
    pub max_depth: usize,
    /// Maximum files enumerated (F_max).
    pub max_files: usize,
    /// Closed set of directory names to skip.
    pub ignored_names: BTreeSet<String>,
    /// Closed set of file names to skip.
    pub ignored_files: BTreeSet<String>,
}

/// Slice of config the code analyzer needs.
#[derive(Debug, Clone)]
pub struct AnalyzeConfig {
    /// Maximum code files analyzed (A_max).
    pub max_files: usize,
}

/// Slice of config the documentation generator needs.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// Bounded output tokens per model call (T_out).
    pub output_token_budget: u32,
    /// Retry attempts for transient model errors (R_model).
    pub retries: u32,
    /// README excerpt budget in characters (N_readme).
    pub readme_budget_chars: usize,
    /// Per-stage timeout (T_gen).
    pub timeout: Duration,
    /// Model endpoint API key; empty disables real generation.
    pub api_key: String,
    /// Override for the model endpoint base URL (tests, proxies).
    pub api_base_url: Option<String>,
    /// Model identifier sent with each request.
    pub model: String,
    /// File budget for the docs+comments variant.
    pub commenter_max_files: usize,
}

/// Slice of config the artifact publisher needs.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Whether the artifact store gateway is enabled.
    pub artifact_store_enabled: bool,
    /// Base URL used to form returned artifact URLs.
    pub artifact_store_base_url: Option<String>,
    /// Bucket name for the S3-compatible gateway.
    pub artifact_store_bucket: Option<String>,
    /// Region for the S3-compatible gateway.
    pub artifact_store_region: String,
    /// Custom endpoint (MinIO, LocalStack).
    pub artifact_store_endpoint: Option<String>,
}

impl AppConfig {
    /// Load configuration from `DOCSMITH_*` environment variables,
    /// falling back to the documented defaults.
    pub fn from_env() -> DomainResult<Self> {
        let config = Self {
            workers: env_parse("DOCSMITH_WORKERS", 2),
            job_deadline_hard: Duration::from_secs(env_parse(
                "DOCSMITH_JOB_DEADLINE_HARD_SECS",
                3600,
            )),
            job_deadline_soft: Duration::from_secs(env_parse(
                "DOCSMITH_JOB_DEADLINE_SOFT_SECS",
                3300,
            )),
            broker_visibility_timeout: Duration::from_secs(env_parse(
                "DOCSMITH_BROKER_VISIBILITY_TIMEOUT_SECS",
                3600,
            )),
            broker_poison_threshold: env_parse("DOCSMITH_BROKER_POISON_THRESHOLD", 3),
            enqueue_grace: Duration::from_secs(env_parse("DOCSMITH_ENQUEUE_GRACE_SECS", 600)),
            retention_days: env_parse("DOCSMITH_RETENTION_DAYS", 30),
            workspace_root: PathBuf::from(
                std::env::var("DOCSMITH_WORKSPACE_ROOT")
                    .unwrap_or_else(|_| "/tmp/docsmith".to_string()),
            ),
            redis_url: std::env::var("DOCSMITH_REDIS_URL").ok(),
            database_url: std::env::var("DOCSMITH_DATABASE_URL").ok(),
            bind_addr: std::env::var("DOCSMITH_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            fetch: FetchConfig {
                timeout: Duration::from_secs(env_parse("DOCSMITH_FETCH_TIMEOUT_SECS", 300)),
            },
            scan: ScanConfig {
                max_depth: env_parse("DOCSMITH_SCANNER_MAX_DEPTH", 10),
                max_files: env_parse("DOCSMITH_SCANNER_MAX_FILES", 1000),
                ignored_names: env_set("DOCSMITH_SCANNER_IGNORED_NAMES", DEFAULT_IGNORED_NAMES),
                ignored_files: env_set("DOCSMITH_SCANNER_IGNORED_FILES", DEFAULT_IGNORED_FILES),
            },
            analyze: AnalyzeConfig {
                max_files: env_parse("DOCSMITH_ANALYZER_MAX_FILES", 20),
            },
            generate: GenerateConfig {
                output_token_budget: env_parse("DOCSMITH_MODEL_OUTPUT_TOKENS", 8000),
                retries: env_parse("DOCSMITH_MODEL_RETRIES", 2),
                readme_budget_chars: env_parse("DOCSMITH_README_BUDGET_CHARS", 3000),
                timeout: Duration::from_secs(env_parse("DOCSMITH_GENERATE_TIMEOUT_SECS", 600)),
                api_key: std::env::var("DOCSMITH_MODEL_API_KEY").unwrap_or_default(),
                api_base_url: std::env::var("DOCSMITH_MODEL_API_BASE_URL").ok(),
                model: std::env::var("DOCSMITH_MODEL")
                    .unwrap_or_else(|_| "claude-sonnet-4-20250514".to_string()),
                commenter_max_files: env_parse("DOCSMITH_COMMENTER_MAX_FILES", 10),
            },
            publish: PublishConfig {
                artifact_store_enabled: env_parse("DOCSMITH_ARTIFACT_STORE_ENABLED", false),
                artifact_store_base_url: std::env::var("DOCSMITH_ARTIFACT_STORE_BASE_URL").ok(),
                artifact_store_bucket: std::env::var("DOCSMITH_ARTIFACT_STORE_BUCKET").ok(),
                artifact_store_region: std::env::var("DOCSMITH_ARTIFACT_STORE_REGION")
                    .unwrap_or_else(|_| "us-east-1".to_string()),
                artifact_store_endpoint: std::env::var("DOCSMITH_ARTIFACT_STORE_ENDPOINT").ok(),
            },
        };

        config.validate()?;
        config.warn_on_degraded_setup();
        Ok(config)
    }

    /// Reject configurations that cannot run correctly.
    pub fn validate(&self) -> DomainResult<()> {
        if self.workers == 0 {
            return Err(DomainError::validation("workers.count must be at least 1"));
        }
        if self.job_deadline_soft >= self.job_deadline_hard {
            return Err(DomainError::validation(
                "job.deadline.soft must be below job.deadline.hard",
            ));
        }
        if self.broker_poison_threshold == 0 {
            return Err(DomainError::validation(
                "broker.poison_pill_threshold must be at least 1",
            ));
        }
        if self.scan.max_files == 0 || self.scan.max_depth == 0 {
            return Err(DomainError::validation(
                "scanner limits must be at least 1",
            ));
        }
        if self.publish.artifact_store_enabled && self.publish.artifact_store_bucket.is_none() {
            return Err(DomainError::validation(
                "artifact_store.enabled requires a bucket",
            ));
        }
        Ok(())
    }

    fn warn_on_degraded_setup(&self) {
        if self.generate.api_key.is_empty() {
            tracing::warn!("DOCSMITH_MODEL_API_KEY not set -- generation will fail");
        }
        if !self.publish.artifact_store_enabled {
            tracing::warn!(
                "artifact store disabled -- artifacts will only be kept on local disk"
            );
        }
    }

    /// Workspace path for one job's fetched source.
    pub fn repo_workspace(&self, job_id: &docsmith_core::JobId) -> PathBuf {
        self.workspace_root.join("repos").join(job_id.to_string())
    }

    /// Local durable path for one job's generated artifact.
    pub fn docs_path(&self, job_id: &docsmith_core::JobId) -> PathBuf {
        self.workspace_root.join("docs").join(job_id.to_string())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_set(key: &str, default: &[&str]) -> BTreeSet<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            workers: 2,
            job_deadline_hard: Duration::from_secs(3600),
            job_deadline_soft: Duration::from_secs(3300),
            broker_visibility_timeout: Duration::from_secs(3600),
            broker_poison_threshold: 3,
            enqueue_grace: Duration::from_secs(600),
            retention_days: 30,
            workspace_root: PathBuf::from("/tmp/docsmith"),
            redis_url: None,
            database_url: None,
            bind_addr: "127.0.0.1:0".to_string(),
            fetch: FetchConfig {
                timeout: Duration::from_secs(300),
            },
            scan: ScanConfig {
                max_depth: 10,
                max_files: 1000,
                ignored_names: DEFAULT_IGNORED_NAMES.iter().map(|s| s.to_string()).collect(),
                ignored_files: DEFAULT_IGNORED_FILES.iter().map(|s| s.to_string()).collect(),
            },
            analyze: AnalyzeConfig { max_files: 20 },
            generate: GenerateConfig {
                output_token_budget: 8000,
                retries: 2,
                readme_budget_chars: 3000,
                timeout: Duration::from_secs(600),
                api_key: String::new(),
                api_base_url: None,
                model: "claude-sonnet-4-20250514".to_string(),
                commenter_max_files: 10,
            },
            publish: PublishConfig {
                artifact_store_enabled: false,
                artifact_store_base_url: None,
                artifact_store_bucket: None,
                artifact_store_region: "us-east-1".to_string(),
                artifact_store_endpoint: None,
            },
        }
    }

    #[test]
    fn default_config_validates() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn soft_deadline_must_stay_below_hard() {
        let mut config = base_config();
        config.job_deadline_soft = config.job_deadline_hard;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = base_config();
        config.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn enabled_gateway_requires_bucket() {
        let mut config = base_config();
        config.publish.artifact_store_enabled = true;
        assert!(config.validate().is_err());
        config.publish.artifact_store_bucket = Some("acme-docs".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn workspace_paths_are_partitioned_per_job() {
        let config = base_config();
        let id = docsmith_core::JobId::new();
        assert_eq!(
            config.repo_workspace(&id),
            PathBuf::from(format!("/tmp/docsmith/repos/{id}"))
        );
        assert_eq!(
            config.docs_path(&id),
            PathBuf::from(format!("/tmp/docsmith/docs/{id}"))
        );
    }
}
