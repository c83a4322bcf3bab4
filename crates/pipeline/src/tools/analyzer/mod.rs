//! Code analyzer: per-language structural extraction.
//!
//! Extractors are registered by file extension and all return the same
//! `FileAnalysis` shape; callers never see the concrete extractor. New
//! languages are added by registering a new entry. A file that fails to
//! parse yields an error stub, never a stage failure.

use std::collections::HashMap;
use std::sync::Arc;

use crate::run_state::{FileAnalysis, FileEntry};

pub mod pattern;
pub mod python;

pub use pattern::PatternExtractor;
pub use python::PythonAstExtractor;

/// One language's structural extractor.
pub trait Extractor: Send + Sync {
    /// Language tag recorded on the analysis.
    fn language(&self) -> &'static str;

    /// Extract classes/functions/imports from source text.
    fn extract(&self, relative_path: &str, source: &str) -> FileAnalysis;
}

/// Extension-keyed registry of extractors.
pub struct AnalyzerRegistry {
    extractors: HashMap<&'static str, Arc<dyn Extractor>>,
}

impl AnalyzerRegistry {
    /// Registry with the built-in languages: AST-based Python, and the
    /// pattern-based extractor for the brace-delimited family.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            extractors: HashMap::new(),
        };

        registry.register("py", Arc::new(PythonAstExtractor::new()));

        let pattern: Arc<dyn Extractor> = Arc::new(PatternExtractor::new());
        for ext in [
            "js", "jsx", "ts", "tsx", "java", "go", "rs", "c", "cpp", "cs", "php", "swift",
            "kt", "scala",
        ] {
            registry.register(ext, pattern.clone());
        }

        registry
    }

    pub fn register(&mut self, extension: &'static str, extractor: Arc<dyn Extractor>) {
        self.extractors.insert(extension, extractor);
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.extractors.contains_key(extension)
    }

    /// Analyze one file; `None` when the extension has no extractor.
    pub fn analyze(&self, file: &FileEntry) -> Option<FileAnalysis> {
        let extractor = self.extractors.get(file.extension.as_str())?;
        let source = match std::fs::read_to_string(&file.path) {
            Ok(source) => source,
            Err(e) => {
                return Some(FileAnalysis::error_stub(
                    &file.relative_path,
                    extractor.language(),
                    format!("unreadable: {e}"),
                ));
            }
        };
        Some(extractor.extract(&file.relative_path, &source))
    }

    /// Analyze up to `max_files` code files in selection-priority order.
    /// Skips unknown extensions; per-file failures are isolated as error
    /// stubs, and output order is deterministic.
    pub fn analyze_selection<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a FileEntry>,
        max_files: usize,
    ) -> Vec<FileAnalysis> {
        candidates
            .into_iter()
            .filter(|f| self.supports(&f.extension))
            .take(max_files)
            .filter_map(|f| self.analyze(f))
            .collect()
    }
}

impl Default for AnalyzerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
