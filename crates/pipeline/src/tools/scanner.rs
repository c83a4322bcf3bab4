//! Tree scanner: breadth-first enumeration of the fetched workspace.
//!
//! Produces the hierarchical tree, the flat file list with per-file
//! categories, and aggregate statistics. Truncation at the depth or
//! file limit is deterministic (level by level, alphabetical within a
//! level) and advisory, never terminal.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use docsmith_core::{Fault, FaultKind};
use docsmith_infra::config::ScanConfig;

use crate::run_state::{FileEntry, FileKind, ScanStats, TreeNode};

use super::ToolResult;

const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "java", "c", "cpp", "h", "hpp", "go", "rs", "rb", "php",
    "cs", "swift", "kt", "scala",
];

const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt", "adoc"];

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "ini", "cfg", "env", "example",
];

/// Classify a file by its lowercased extension.
pub fn classify(extension: &str) -> FileKind {
    if CODE_EXTENSIONS.contains(&extension) {
        FileKind::Code
    } else if DOC_EXTENSIONS.contains(&extension) {
        FileKind::Docs
    } else if CONFIG_EXTENSIONS.contains(&extension) {
        FileKind::Config
    } else {
        FileKind::Other
    }
}

/// Scan result: tree, flat list, stats.
#[derive(Debug)]
pub struct ScanOutput {
    pub tree: TreeNode,
    pub files: Vec<FileEntry>,
    pub stats: ScanStats,
}

/// Whether a directory entry is skipped outright.
fn is_ignored(name: &str, is_dir: bool, config: &ScanConfig) -> bool {
    if is_dir && config.ignored_names.contains(name) {
        return true;
    }
    if !is_dir && config.ignored_files.contains(name) {
        return true;
    }
    // Hidden entries are skipped, except env templates that matter for
    // documentation.
    if name.starts_with('.') && name != ".env" && name != ".env.example" {
        return true;
    }
    false
}

/// Walk the workspace breadth-first, alphabetical within each directory.
pub fn scan(root: &Path, config: &ScanConfig) -> ToolResult<ScanOutput> {
    if !root.is_dir() {
        return Err(Fault::with_detail(
            FaultKind::IoError,
            format!("workspace missing: {}", root.display()),
        ));
    }

    let mut files: Vec<FileEntry> = Vec::new();
    let mut dir_paths: Vec<String> = Vec::new();
    let mut stats = ScanStats::default();

    // Queue of (absolute dir, relative dir, depth). Depth 1 is the
    // content of the root.
    let mut queue: VecDeque<(std::path::PathBuf, String, usize)> = VecDeque::new();
    queue.push_back((root.to_path_buf(), String::new(), 1));

    'walk: while let Some((dir, rel_dir, depth)) = queue.pop_front() {
        if depth > config.max_depth {
            stats.truncated = true;
            continue;
        }

        let mut entries: Vec<(String, std::path::PathBuf, bool)> = Vec::new();
        let read = std::fs::read_dir(&dir)
            .map_err(|e| Fault::with_detail(FaultKind::IoError, e.to_string()))?;
        for entry in read {
            let entry = entry.map_err(|e| Fault::with_detail(FaultKind::IoError, e.to_string()))?;
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            // Symlinks are not followed; a link counts as whatever it is
            // on disk, never as a traversal edge.
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            entries.push((name, path, is_dir));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, path, is_dir) in entries {
            if is_ignored(&name, is_dir, config) {
                continue;
            }

            let relative = if rel_dir.is_empty() {
                name.clone()
            } else {
                format!("{rel_dir}/{name}")
            };

            if is_dir {
                stats.total_dirs += 1;
                dir_paths.push(relative.clone());
                queue.push_back((path, relative, depth + 1));
            } else {
                if files.len() >= config.max_files {
                    stats.truncated = true;
                    break 'walk;
                }

                let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                let extension = path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_default();
                let kind = classify(&extension);

                match kind {
                    FileKind::Code => stats.code_files += 1,
                    FileKind::Docs => stats.doc_files += 1,
                    FileKind::Config => stats.config_files += 1,
                    FileKind::Other => stats.other_files += 1,
                }
                stats.total_files += 1;
                stats.total_size_bytes += size;

                files.push(FileEntry {
                    path,
                    relative_path: relative,
                    name,
                    extension,
                    size,
                    kind,
                });
            }
        }
    }

    let root_name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.display().to_string());
    let tree = assemble_tree(root_name, &dir_paths, &files);

    Ok(ScanOutput { tree, files, stats })
}

/// Build the hierarchical tree from the enumerated paths.
fn assemble_tree(root_name: String, dirs: &[String], files: &[FileEntry]) -> TreeNode {
    #[derive(Default)]
    struct Builder {
        children: BTreeMap<String, Builder>,
        is_dir: bool,
        size: Option<u64>,
    }

    fn insert(builder: &mut Builder, path: &str, is_dir: bool, size: Option<u64>) {
        let mut node = builder;
        let segments: Vec<&str> = path.split('/').collect();
        for (i, segment) in segments.iter().enumerate() {
            node = node.children.entry(segment.to_string()).or_default();
            if i + 1 < segments.len() {
                node.is_dir = true;
            } else {
                node.is_dir = is_dir;
                node.size = size;
            }
        }
    }

    fn convert(name: String, builder: Builder) -> TreeNode {
        TreeNode {
            name,
            is_dir: builder.is_dir,
            size: builder.size,
            children: builder
                .children
                .into_iter()
                .map(|(name, child)| convert(name, child))
                .collect(),
        }
    }

    let mut root = Builder {
        is_dir: true,
        ..Default::default()
    };
    for dir in dirs {
        insert(&mut root, dir, true, None);
    }
    for file in files {
        insert(&mut root, &file.relative_path, false, Some(file.size));
    }

    convert(root_name, root)
}
