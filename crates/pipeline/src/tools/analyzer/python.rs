//! AST-based extractor for Python (indent-delimited), via tree-sitter.

use tree_sitter::{Node, Parser};

use crate::run_state::{ClassInfo, FileAnalysis, FunctionInfo, ImportInfo};

use super::Extractor;

pub struct PythonAstExtractor;

impl PythonAstExtractor {
    pub fn new() -> Self {
        Self
    }

    fn parse(source: &str) -> Result<tree_sitter::Tree, String> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::language())
            .map_err(|e| format!("failed to set language: {e}"))?;
        parser
            .parse(source, None)
            .ok_or_else(|| "failed to parse".to_string())
    }
}

impl Default for PythonAstExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor for PythonAstExtractor {
    fn language(&self) -> &'static str {
        "python"
    }

    fn extract(&self, relative_path: &str, source: &str) -> FileAnalysis {
        let tree = match Self::parse(source) {
            Ok(tree) => tree,
            Err(e) => return FileAnalysis::error_stub(relative_path, self.language(), e),
        };

        let root = tree.root_node();
        let bytes = source.as_bytes();

        let mut classes = Vec::new();
        let mut functions = Vec::new();
        let mut imports = Vec::new();

        let mut cursor = root.walk();
        for child in root.children(&mut cursor) {
            // `@decorator def f(): ...` wraps the definition one level down.
            let node = if child.kind() == "decorated_definition" {
                child
                    .child_by_field_name("definition")
                    .unwrap_or(child)
            } else {
                child
            };

            match node.kind() {
                "class_definition" => {
                    if let Some(class) = extract_class(node, bytes) {
                        classes.push(class);
                    }
                }
                "function_definition" => {
                    if let Some(function) = extract_function(node, bytes) {
                        functions.push(function);
                    }
                }
                "import_statement" | "import_from_statement" => {
                    imports.extend(extract_imports(node, bytes));
                }
                _ => {}
            }
        }

        FileAnalysis {
            relative_path: relative_path.to_string(),
            language: self.language().to_string(),
            classes,
            functions,
            imports,
            docstring: block_docstring(root, bytes),
            error: None,
        }
    }
}

fn text(node: Node<'_>, bytes: &[u8]) -> String {
    node.utf8_text(bytes).unwrap_or_default().to_string()
}

fn extract_class(node: Node<'_>, bytes: &[u8]) -> Option<ClassInfo> {
    let name = text(node.child_by_field_name("name")?, bytes);
    let body = node.child_by_field_name("body");

    let mut methods = Vec::new();
    if let Some(body) = body {
        let mut cursor = body.walk();
        for stmt in body.children(&mut cursor) {
            let stmt = if stmt.kind() == "decorated_definition" {
                stmt.child_by_field_name("definition").unwrap_or(stmt)
            } else {
                stmt
            };
            if stmt.kind() == "function_definition" {
                if let Some(method) = extract_function(stmt, bytes) {
                    methods.push(method);
                }
            }
        }
    }

    Some(ClassInfo {
        name,
        docstring: body.and_then(|b| block_docstring(b, bytes)),
        methods,
        line: node.start_position().row + 1,
    })
}

fn extract_function(node: Node<'_>, bytes: &[u8]) -> Option<FunctionInfo> {
    let name = text(node.child_by_field_name("name")?, bytes);

    let mut params = Vec::new();
    if let Some(parameters) = node.child_by_field_name("parameters") {
        let mut cursor = parameters.walk();
        for param in parameters.named_children(&mut cursor) {
            match param.kind() {
                "identifier" => params.push(text(param, bytes)),
                "typed_parameter" | "default_parameter" | "typed_default_parameter" => {
                    if let Some(inner) = param
                        .child_by_field_name("name")
                        .or_else(|| param.named_child(0))
                    {
                        params.push(text(inner, bytes));
                    }
                }
                "list_splat_pattern" | "dictionary_splat_pattern" => {
                    params.push(text(param, bytes));
                }
                _ => {}
            }
        }
    }

    Some(FunctionInfo {
        name,
        params,
        line: node.start_position().row + 1,
        docstring: node
            .child_by_field_name("body")
            .and_then(|b| block_docstring(b, bytes)),
    })
}

fn extract_imports(node: Node<'_>, bytes: &[u8]) -> Vec<ImportInfo> {
    let mut imports = Vec::new();

    if node.kind() == "import_statement" {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "dotted_name" => imports.push(ImportInfo {
                    module: text(child, bytes),
                    symbol: None,
                }),
                "aliased_import" => {
                    if let Some(name) = child.child_by_field_name("name") {
                        imports.push(ImportInfo {
                            module: text(name, bytes),
                            symbol: None,
                        });
                    }
                }
                _ => {}
            }
        }
        return imports;
    }

    // from X import a, b as c
    let module = node
        .child_by_field_name("module_name")
        .map(|m| text(m, bytes))
        .unwrap_or_default();

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if Some(child) == node.child_by_field_name("module_name") {
            continue;
        }
        match child.kind() {
            "dotted_name" => imports.push(ImportInfo {
                module: module.clone(),
                symbol: Some(text(child, bytes)),
            }),
            "aliased_import" => {
                if let Some(name) = child.child_by_field_name("name") {
                    imports.push(ImportInfo {
                        module: module.clone(),
                        symbol: Some(text(name, bytes)),
                    });
                }
            }
            "wildcard_import" => imports.push(ImportInfo {
                module: module.clone(),
                symbol: Some("*".to_string()),
            }),
            _ => {}
        }
    }

    imports
}

/// First statement of a block when it is a bare string literal.
fn block_docstring(block: Node<'_>, bytes: &[u8]) -> Option<String> {
    let first = block.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    Some(strip_quotes(&text(string, bytes)))
}

fn strip_quotes(raw: &str) -> String {
    let raw = raw.trim();
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = raw
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#""""Module docs."""
import os
import sys as system
from pathlib import Path
from typing import Optional, List


def top_level(a, b=1, *args, **kwargs):
    """Adds things."""
    return a + b


class Widget:
    """A widget."""

    def __init__(self, name):
        self.name = name

    def render(self, depth: int = 0):
        """Draw it."""
        return self.name * depth
"#;

    fn analyze(source: &str) -> FileAnalysis {
        PythonAstExtractor::new().extract("sample.py", source)
    }

    #[test]
    fn extracts_module_docstring() {
        let analysis = analyze(SAMPLE);
        assert!(analysis.is_ok());
        assert_eq!(analysis.docstring.as_deref(), Some("Module docs."));
    }

    #[test]
    fn extracts_classes_with_methods() {
        let analysis = analyze(SAMPLE);
        assert_eq!(analysis.classes.len(), 1);

        let class = &analysis.classes[0];
        assert_eq!(class.name, "Widget");
        assert_eq!(class.docstring.as_deref(), Some("A widget."));

        let method_names: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(method_names, vec!["__init__", "render"]);
        assert_eq!(class.methods[0].params, vec!["self", "name"]);
        assert_eq!(class.methods[1].docstring.as_deref(), Some("Draw it."));
    }

    #[test]
    fn extracts_free_functions_not_methods() {
        let analysis = analyze(SAMPLE);
        assert_eq!(analysis.functions.len(), 1);

        let function = &analysis.functions[0];
        assert_eq!(function.name, "top_level");
        assert_eq!(function.docstring.as_deref(), Some("Adds things."));
        assert_eq!(function.params, vec!["a", "b", "*args", "**kwargs"]);
        assert!(function.line > 1);
    }

    #[test]
    fn extracts_imports_with_symbols() {
        let analysis = analyze(SAMPLE);
        let flat: Vec<(String, Option<String>)> = analysis
            .imports
            .iter()
            .map(|i| (i.module.clone(), i.symbol.clone()))
            .collect();

        assert!(flat.contains(&("os".to_string(), None)));
        assert!(flat.contains(&("sys".to_string(), None)));
        assert!(flat.contains(&("pathlib".to_string(), Some("Path".to_string()))));
        assert!(flat.contains(&("typing".to_string(), Some("Optional".to_string()))));
        assert!(flat.contains(&("typing".to_string(), Some("List".to_string()))));
    }

    #[test]
    fn decorated_definitions_are_unwrapped() {
        let analysis = analyze(
            "@app.route('/x')\ndef handler(request):\n    return 1\n",
        );
        assert_eq!(analysis.functions.len(), 1);
        assert_eq!(analysis.functions[0].name, "handler");
    }

    #[test]
    fn garbage_still_produces_a_tolerant_analysis() {
        // tree-sitter is error-tolerant; severely broken input yields an
        // analysis with whatever could be recovered, not a stage error.
        let analysis = analyze("def broken(:\n   ???");
        assert_eq!(analysis.language, "python");
    }
}
