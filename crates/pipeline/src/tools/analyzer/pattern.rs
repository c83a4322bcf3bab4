//! Pattern-based extractor for brace-delimited languages.
//!
//! Regex extraction, tolerant by construction: anything the patterns
//! miss is simply absent from the analysis. Languages without a
//! dedicated extractor degrade to this one.

use regex::Regex;

use crate::run_state::{ClassInfo, FileAnalysis, FunctionInfo, ImportInfo};

use super::Extractor;

pub struct PatternExtractor {
    class_re: Regex,
    function_re: Regex,
    arrow_re: Regex,
    fn_re: Regex,
    es_import_re: Regex,
    require_re: Regex,
    use_re: Regex,
}

impl PatternExtractor {
    pub fn new() -> Self {
        Self {
            class_re: Regex::new(r"\bclass\s+(\w+)(?:\s+extends\s+\w+)?\s*\{").unwrap(),
            function_re: Regex::new(r"\bfunction\s+(\w+)\s*\(([^)]*)\)").unwrap(),
            arrow_re: Regex::new(
                r"\b(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s*)?\(([^)]*)\)\s*=>",
            )
            .unwrap(),
            // Rust `fn` and Go `func` declarations.
            fn_re: Regex::new(r"\b(?:pub\s+)?(?:async\s+)?(?:fn|func)\s+(\w+)\s*\(([^)]*)\)")
                .unwrap(),
            es_import_re: Regex::new(
                r#"\bimport\s+(?:\{([^}]+)\}|(\w+))\s+from\s+['"]([^'"]+)['"]"#,
            )
            .unwrap(),
            require_re: Regex::new(
                r#"\b(?:const|let|var)\s+(?:\{([^}]+)\}|(\w+))\s*=\s*require\(['"]([^'"]+)['"]\)"#,
            )
            .unwrap(),
            use_re: Regex::new(r"\buse\s+([A-Za-z_][\w:]*)").unwrap(),
        }
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

fn split_params(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

impl Extractor for PatternExtractor {
    fn language(&self) -> &'static str {
        "brace-pattern"
    }

    fn extract(&self, relative_path: &str, source: &str) -> FileAnalysis {
        let mut classes = Vec::new();
        let mut functions = Vec::new();
        let mut imports = Vec::new();

        for capture in self.class_re.captures_iter(source) {
            let whole = capture.get(0).unwrap();
            classes.push(ClassInfo {
                name: capture[1].to_string(),
                docstring: None,
                methods: Vec::new(),
                line: line_of(source, whole.start()),
            });
        }

        for re in [&self.function_re, &self.arrow_re, &self.fn_re] {
            for capture in re.captures_iter(source) {
                let whole = capture.get(0).unwrap();
                functions.push(FunctionInfo {
                    name: capture[1].to_string(),
                    params: split_params(capture.get(2).map(|m| m.as_str()).unwrap_or("")),
                    line: line_of(source, whole.start()),
                    docstring: None,
                });
            }
        }
        functions.sort_by_key(|f| f.line);

        for capture in self.es_import_re.captures_iter(source) {
            let module = capture[3].to_string();
            if let Some(named) = capture.get(1) {
                for symbol in split_params(named.as_str()) {
                    imports.push(ImportInfo {
                        module: module.clone(),
                        symbol: Some(symbol),
                    });
                }
            } else {
                imports.push(ImportInfo {
                    module,
                    symbol: capture.get(2).map(|m| m.as_str().to_string()),
                });
            }
        }

        for capture in self.require_re.captures_iter(source) {
            let module = capture[3].to_string();
            if let Some(named) = capture.get(1) {
                for symbol in split_params(named.as_str()) {
                    imports.push(ImportInfo {
                        module: module.clone(),
                        symbol: Some(symbol),
                    });
                }
            } else {
                imports.push(ImportInfo {
                    module,
                    symbol: None,
                });
            }
        }

        // Rust-style `use` paths; only when nothing ES-shaped matched,
        // so JS files don't pick up stray `use strict` noise.
        if imports.is_empty() {
            for capture in self.use_re.captures_iter(source) {
                let path = capture[1].to_string();
                if path == "strict" {
                    continue;
                }
                imports.push(ImportInfo {
                    module: path,
                    symbol: None,
                });
            }
        }

        FileAnalysis {
            relative_path: relative_path.to_string(),
            language: self.language().to_string(),
            classes,
            functions,
            imports,
            docstring: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(source: &str) -> FileAnalysis {
        PatternExtractor::new().extract("sample.js", source)
    }

    #[test]
    fn extracts_es6_classes_and_functions() {
        let analysis = analyze(
            r#"
import { useState, useEffect } from 'react';
import axios from 'axios';
const fs = require('fs');

class Widget extends Base {
  render() {}
}

function helper(a, b) { return a + b; }
const onClick = async (event) => { await submit(event); };
"#,
        );

        assert_eq!(analysis.classes.len(), 1);
        assert_eq!(analysis.classes[0].name, "Widget");

        let names: Vec<&str> = analysis.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["helper", "onClick"]);
        assert_eq!(analysis.functions[0].params, vec!["a", "b"]);

        let modules: Vec<&str> = analysis.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["react", "react", "axios", "fs"]);
        assert_eq!(analysis.imports[0].symbol.as_deref(), Some("useState"));
        assert_eq!(analysis.imports[2].symbol.as_deref(), Some("axios"));
        assert_eq!(analysis.imports[3].symbol, None);
    }

    #[test]
    fn handles_rust_and_go_declarations() {
        let rust = PatternExtractor::new().extract(
            "lib.rs",
            "use std::fmt;\nuse serde::Serialize;\n\npub fn parse(input: &str) -> u32 { 0 }\nasync fn run() {}\n",
        );
        let names: Vec<&str> = rust.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["parse", "run"]);
        let modules: Vec<&str> = rust.imports.iter().map(|i| i.module.as_str()).collect();
        assert_eq!(modules, vec!["std::fmt", "serde::Serialize"]);

        let go = PatternExtractor::new().extract(
            "main.go",
            "func main() {}\nfunc handle(w http.ResponseWriter, r *http.Request) {}\n",
        );
        assert_eq!(go.functions.len(), 2);
    }

    #[test]
    fn line_numbers_are_one_based() {
        let analysis = analyze("\n\nfunction third() {}\n");
        assert_eq!(analysis.functions[0].line, 3);
    }

    #[test]
    fn non_matching_source_yields_an_empty_analysis() {
        let analysis = analyze("just some text\nwith no code at all\n");
        assert!(analysis.is_ok());
        assert!(analysis.classes.is_empty());
        assert!(analysis.functions.is_empty());
        assert!(analysis.imports.is_empty());
    }
}
