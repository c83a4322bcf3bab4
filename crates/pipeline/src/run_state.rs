//! Per-execution state accumulated by the pipeline stages.
//!
//! Owned by a single worker for the duration of one run; stages fill in
//! their outputs as they succeed, and a fault short-circuits everything
//! except cleanup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use docsmith_core::{Fault, JobId, Variant};

/// Pipeline stage tag, recorded on the run state as stages advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Scan,
    Analyze,
    Generate,
    Publish,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Scan => "scan",
            Stage::Analyze => "analyze",
            Stage::Generate => "generate",
            Stage::Publish => "publish",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot metadata captured by the fetch stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchMeta {
    pub branch: String,
    pub revision: String,
    pub author: String,
    /// First line of the head commit message.
    pub commit_summary: String,
}

/// Per-file category assigned by the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Code,
    Docs,
    Config,
    Other,
}

/// One enumerated file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Absolute path inside the workspace.
    pub path: PathBuf,
    /// Path relative to the workspace root, `/`-separated.
    pub relative_path: String,
    pub name: String,
    /// Lowercased extension without the dot; empty when absent.
    pub extension: String,
    pub size: u64,
    pub kind: FileKind,
}

impl FileEntry {
    /// Whether the file sits directly in the repository root.
    pub fn is_root_level(&self) -> bool {
        !self.relative_path.contains('/')
    }
}

/// Hierarchical view of the scanned workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub children: Vec<TreeNode>,
}

/// Aggregate counts from the scan stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    pub total_files: usize,
    pub total_dirs: usize,
    pub code_files: usize,
    pub doc_files: usize,
    pub config_files: usize,
    pub other_files: usize,
    pub total_size_bytes: u64,
    /// Set when the walk hit the file or depth limit (advisory, never
    /// terminal).
    pub truncated: bool,
}

/// A function or method signature extracted by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub params: Vec<String>,
    pub line: usize,
    pub docstring: Option<String>,
}

/// A class declaration extracted by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub docstring: Option<String>,
    pub methods: Vec<FunctionInfo>,
    pub line: usize,
}

/// An import extracted by the analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportInfo {
    pub module: String,
    /// Imported symbol, when the form names one (`from x import y`).
    pub symbol: Option<String>,
}

/// Structural analysis of one code file. A file that failed to parse
/// carries an error stub instead of failing the stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub relative_path: String,
    pub language: String,
    pub classes: Vec<ClassInfo>,
    pub functions: Vec<FunctionInfo>,
    pub imports: Vec<ImportInfo>,
    pub docstring: Option<String>,
    pub error: Option<String>,
}

impl FileAnalysis {
    pub fn error_stub(relative_path: impl Into<String>, language: &str, error: String) -> Self {
        Self {
            relative_path: relative_path.into(),
            language: language.to_string(),
            classes: Vec::new(),
            functions: Vec::new(),
            imports: Vec::new(),
            docstring: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Token usage reported by one model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// How the comments variant published its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommentOutcome {
    PullRequest(String),
    Bundle(String),
}

/// The state one pipeline run accumulates, private to its worker.
#[derive(Debug, Clone)]
pub struct RunState {
    pub job_id: JobId,
    pub source: String,
    pub credential: Option<String>,
    pub variant: Variant,
    pub has_write_access: bool,

    /// Private per-job workspace holding the fetched source.
    pub workspace: Option<PathBuf>,
    pub fetch: Option<FetchMeta>,
    pub tree: Option<TreeNode>,
    pub files: Vec<FileEntry>,
    pub stats: Option<ScanStats>,
    pub analyses: Vec<FileAnalysis>,
    pub documentation: Option<String>,
    pub model_usage: Vec<ModelUsage>,

    /// Published artifact URL (docs markdown, or the comment bundle for
    /// the comments variant's fallback path).
    pub artifact_url: Option<String>,
    pub pull_request_url: Option<String>,

    pub stage: Stage,
    /// Terminal fault, when a stage short-circuited the run.
    pub fault: Option<Fault>,
    /// Set when the run stopped for a reason that is not a fault of its
    /// own (job deleted, worker shutdown).
    pub cancelled: Option<crate::cancel::CancelReason>,
}

impl RunState {
    pub fn new(
        job_id: JobId,
        source: impl Into<String>,
        credential: Option<String>,
        variant: Variant,
        has_write_access: bool,
    ) -> Self {
        Self {
            job_id,
            source: source.into(),
            credential,
            variant,
            has_write_access,
            workspace: None,
            fetch: None,
            tree: None,
            files: Vec::new(),
            stats: None,
            analyses: Vec::new(),
            documentation: None,
            model_usage: Vec::new(),
            artifact_url: None,
            pull_request_url: None,
            stage: Stage::Fetch,
            fault: None,
            cancelled: None,
        }
    }

    /// Code files ordered by the analyzer's selection priority:
    /// root-level first, then larger, ties broken alphabetically.
    pub fn code_files_by_priority(&self) -> Vec<&FileEntry> {
        let mut code: Vec<&FileEntry> = self
            .files
            .iter()
            .filter(|f| f.kind == FileKind::Code)
            .collect();
        code.sort_by(|a, b| {
            b.is_root_level()
                .cmp(&a.is_root_level())
                .then_with(|| b.size.cmp(&a.size))
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        code
    }

    /// First README-ish entry from the flat list, if any.
    pub fn readme(&self) -> Option<&FileEntry> {
        self.files.iter().find(|f| {
            matches!(
                f.name.to_lowercase().as_str(),
                "readme.md" | "readme.txt" | "readme"
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(rel: &str, size: u64, kind: FileKind) -> FileEntry {
        FileEntry {
            path: PathBuf::from(format!("/ws/{rel}")),
            relative_path: rel.to_string(),
            name: rel.rsplit('/').next().unwrap().to_string(),
            extension: rel.rsplit('.').next().unwrap_or("").to_string(),
            size,
            kind,
        }
    }

    fn state_with(files: Vec<FileEntry>) -> RunState {
        let mut state = RunState::new(
            JobId::new(),
            "https://example.com/acme/widget",
            None,
            Variant::Docs,
            false,
        );
        state.files = files;
        state
    }

    #[test]
    fn priority_is_root_then_size_then_name() {
        let state = state_with(vec![
            entry("src/huge.py", 9000, FileKind::Code),
            entry("b.py", 10, FileKind::Code),
            entry("a.py", 10, FileKind::Code),
            entry("main.py", 500, FileKind::Code),
            entry("README.md", 100, FileKind::Docs),
        ]);

        let ordered: Vec<&str> = state
            .code_files_by_priority()
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        assert_eq!(ordered, vec!["main.py", "a.py", "b.py", "src/huge.py"]);
    }

    #[test]
    fn readme_lookup_is_case_insensitive() {
        let state = state_with(vec![
            entry("src/lib.py", 10, FileKind::Code),
            entry("README.md", 100, FileKind::Docs),
        ]);
        assert_eq!(state.readme().unwrap().relative_path, "README.md");

        let none = state_with(vec![entry("src/lib.py", 10, FileKind::Code)]);
        assert!(none.readme().is_none());
    }
}
