//! Prompt construction for the documentation generator.
//!
//! One structured prompt per job: repository name, aggregate statistics,
//! the depth-limited tree, the analysis summary, and a bounded README
//! excerpt.

use crate::run_state::{FileAnalysis, ScanStats, TreeNode};

/// Repositories above this file count get the condensed prompt layout.
const LARGE_REPO_FILES: usize = 50;

/// Assemble the generation prompt.
pub fn documentation_prompt(
    repo_name: &str,
    tree: &TreeNode,
    stats: &ScanStats,
    analyses: &[FileAnalysis],
    readme_excerpt: Option<&str>,
) -> String {
    let is_large = stats.total_files > LARGE_REPO_FILES;
    let tree_depth = if is_large { 4 } else { 10 };

    let mut prompt = format!(
        "You are a technical documentation expert. Generate comprehensive, \
         well-structured documentation for the following codebase.\n\n\
         # Repository: {repo_name}\n\n\
         ## Repository Statistics\n\
         - Total Files: {}\n\
         - Code Files: {}\n\
         - Documentation Files: {}\n\
         - Configuration Files: {}\n\
         - Total Size: {}\n\n\
         ## File Structure\n{}\n\n\
         ## Code Analysis\n{}\n",
        stats.total_files,
        stats.code_files,
        stats.doc_files,
        stats.config_files,
        format_bytes(stats.total_size_bytes),
        format_tree(tree, 0, tree_depth),
        format_analyses(analyses, is_large),
    );

    if let Some(readme) = readme_excerpt {
        prompt.push_str(&format!("\n## Existing README\n{readme}\n"));
    }

    prompt.push_str(
        "\n## Task\n\
         Create documentation comprehensive enough that a new engineer could \
         clone the repository and get it running without external help. \
         Identify the repository type and adapt the structure accordingly.\n\n\
         Always include:\n\
         1. Overview - what the project does and the problem it solves\n\
         2. Architecture - tech stack, system design, data flow\n\
         3. Getting Started - prerequisites, installation, first run\n\
         4. Environment Variables - every variable, purpose, example values\n\
         5. Scripts & Commands - build, development, production\n\
         6. Project Structure - directory layout with explanations\n\
         7. Key Files - entry points and the most important files\n\
         8. Core Components - main features and how they interact\n\
         9. Dependencies - major libraries and why they are used\n\
         10. API Documentation - endpoints or public interfaces, if applicable\n\
         11. Testing - how to run tests; note clearly when none exist\n\
         12. Troubleshooting - common issues and gotchas\n\n\
         For large repositories focus on high-level architecture and group \
         similar files rather than listing each one. Flag missing critical \
         files (no README, no env example) and obvious gaps. Be specific and \
         actionable: real commands, not placeholders.\n\n\
         Format the documentation in clean, readable markdown with a proper \
         heading hierarchy, starting with a top-level heading.\n",
    );

    prompt
}

/// Prompt for per-file inline comment generation.
pub fn comment_prompt(relative_path: &str, language: &str, content: &str) -> String {
    format!(
        "You are a helpful coding assistant. Add inline comments to the \
         following {language} code to explain what it does.\n\n\
         Guidelines:\n\
         1. Comment functions/methods with purpose, parameters, and returns\n\
         2. Comment complex or non-obvious sections\n\
         3. Keep comments concise; do not over-comment obvious code\n\
         4. Use the appropriate comment syntax for {language}\n\
         5. Preserve all original code exactly as-is; only add comments\n\n\
         File: {relative_path}\n\n\
         ```{language}\n{content}\n```\n\n\
         Return ONLY the commented code, with no additional explanation or \
         markdown formatting."
    )
}

fn format_tree(node: &TreeNode, indent: usize, max_depth: usize) -> String {
    if indent > max_depth {
        return String::new();
    }

    let prefix = "  ".repeat(indent);
    let mut lines = Vec::new();

    if node.is_dir {
        lines.push(format!("{prefix}- {}/", node.name));
        // Wide directories are elided harder the deeper we go.
        let max_children = if indent < 2 { 30 } else { 15 };
        for child in node.children.iter().take(max_children) {
            let rendered = format_tree(child, indent + 1, max_depth);
            if !rendered.is_empty() {
                lines.push(rendered);
            }
        }
    } else {
        lines.push(format!(
            "{prefix}- {} ({})",
            node.name,
            format_bytes(node.size.unwrap_or(0))
        ));
    }

    lines.join("\n")
}

fn format_analyses(analyses: &[FileAnalysis], is_large: bool) -> String {
    if analyses.is_empty() {
        return "No code analysis available.".to_string();
    }

    if is_large {
        return format_grouped_analyses(analyses);
    }

    let mut lines = vec!["Key code files analyzed:".to_string()];
    for analysis in analyses.iter().take(15) {
        if !analysis.is_ok() {
            continue;
        }
        lines.push(format!("\n### {}", analysis.relative_path));

        if !analysis.classes.is_empty() {
            let names: Vec<&str> = analysis
                .classes
                .iter()
                .take(5)
                .map(|c| c.name.as_str())
                .collect();
            lines.push(format!("  Classes: {}", names.join(", ")));
        }
        if !analysis.functions.is_empty() {
            let names: Vec<&str> = analysis
                .functions
                .iter()
                .take(10)
                .map(|f| f.name.as_str())
                .collect();
            lines.push(format!("  Functions: {}", names.join(", ")));
        }
        if !analysis.imports.is_empty() {
            let summary: Vec<String> = analysis
                .imports
                .iter()
                .take(5)
                .map(|i| match &i.symbol {
                    Some(symbol) => format!("{}.{symbol}", i.module),
                    None => i.module.clone(),
                })
                .collect();
            lines.push(format!("  Key Imports: {}", summary.join(", ")));
        }
    }

    lines.join("\n")
}

/// Large repositories get a component-level summary keyed by the first
/// path segment.
fn format_grouped_analyses(analyses: &[FileAnalysis]) -> String {
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Component {
        files: Vec<String>,
        classes: Vec<String>,
        functions: Vec<String>,
    }

    let mut components: BTreeMap<String, Component> = BTreeMap::new();
    for analysis in analyses.iter().take(20) {
        let component = match analysis.relative_path.split_once('/') {
            Some((first, _)) => first.to_string(),
            None => "root".to_string(),
        };
        let entry = components.entry(component).or_default();
        entry.files.push(
            analysis
                .relative_path
                .rsplit('/')
                .next()
                .unwrap_or(&analysis.relative_path)
                .to_string(),
        );
        if analysis.is_ok() {
            entry
                .classes
                .extend(analysis.classes.iter().take(3).map(|c| c.name.clone()));
            entry
                .functions
                .extend(analysis.functions.iter().take(3).map(|f| f.name.clone()));
        }
    }

    let mut lines = vec!["Code structure summary (grouped by component):".to_string()];
    for (component, data) in components.into_iter().take(8) {
        lines.push(format!("\n### {component}/"));
        lines.push(format!("  Files: {}", data.files.iter().take(5).cloned().collect::<Vec<_>>().join(", ")));
        if !data.classes.is_empty() {
            lines.push(format!("  Key Classes: {}", data.classes.iter().take(5).cloned().collect::<Vec<_>>().join(", ")));
        }
        if !data.functions.is_empty() {
            lines.push(format!("  Key Functions: {}", data.functions.iter().take(5).cloned().collect::<Vec<_>>().join(", ")));
        }
    }

    lines.join("\n")
}

fn format_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_state::{ClassInfo, FunctionInfo, ImportInfo};

    fn leaf(name: &str, size: u64) -> TreeNode {
        TreeNode {
            name: name.to_string(),
            is_dir: false,
            size: Some(size),
            children: Vec::new(),
        }
    }

    fn sample_tree() -> TreeNode {
        TreeNode {
            name: "widget".to_string(),
            is_dir: true,
            size: None,
            children: vec![
                leaf("README.md", 1200),
                TreeNode {
                    name: "src".to_string(),
                    is_dir: true,
                    size: None,
                    children: vec![leaf("main.py", 5300)],
                },
            ],
        }
    }

    fn sample_analysis() -> FileAnalysis {
        FileAnalysis {
            relative_path: "src/main.py".to_string(),
            language: "python".to_string(),
            classes: vec![ClassInfo {
                name: "Widget".to_string(),
                docstring: None,
                methods: Vec::new(),
                line: 10,
            }],
            functions: vec![FunctionInfo {
                name: "run".to_string(),
                params: vec!["argv".to_string()],
                line: 40,
                docstring: None,
            }],
            imports: vec![ImportInfo {
                module: "pathlib".to_string(),
                symbol: Some("Path".to_string()),
            }],
            docstring: None,
            error: None,
        }
    }

    #[test]
    fn prompt_carries_stats_tree_and_analysis() {
        let stats = ScanStats {
            total_files: 2,
            code_files: 1,
            doc_files: 1,
            total_size_bytes: 6500,
            ..Default::default()
        };
        let prompt = documentation_prompt(
            "widget",
            &sample_tree(),
            &stats,
            &[sample_analysis()],
            Some("# Widget\nA thing."),
        );

        assert!(prompt.contains("# Repository: widget"));
        assert!(prompt.contains("- Total Files: 2"));
        assert!(prompt.contains("- main.py (5.2 KB)"));
        assert!(prompt.contains("Classes: Widget"));
        assert!(prompt.contains("Functions: run"));
        assert!(prompt.contains("Key Imports: pathlib.Path"));
        assert!(prompt.contains("## Existing README"));
        assert!(prompt.contains("A thing."));
    }

    #[test]
    fn readme_section_is_omitted_when_absent() {
        let prompt = documentation_prompt(
            "widget",
            &sample_tree(),
            &ScanStats::default(),
            &[],
            None,
        );
        assert!(!prompt.contains("## Existing README"));
        assert!(prompt.contains("No code analysis available."));
    }

    #[test]
    fn large_repos_use_the_grouped_summary() {
        let stats = ScanStats {
            total_files: 500,
            ..Default::default()
        };
        let prompt = documentation_prompt(
            "widget",
            &sample_tree(),
            &stats,
            &[sample_analysis()],
            None,
        );
        assert!(prompt.contains("Code structure summary (grouped by component):"));
        assert!(prompt.contains("### src/"));
    }

    #[test]
    fn byte_formatting_picks_sane_units() {
        assert_eq!(format_bytes(512), "512.0 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn comment_prompt_embeds_file_and_language() {
        let prompt = comment_prompt("src/app.js", "javascript", "let x = 1;");
        assert!(prompt.contains("File: src/app.js"));
        assert!(prompt.contains("```javascript"));
        assert!(prompt.contains("let x = 1;"));
        assert!(prompt.contains("Return ONLY the commented code"));
    }
}
