//! Architectural Enforcement Helpers
//!
//! Shared source scanning for the integration tests in `tests/`. Each test
//! walks the production sources of the dispatch crates and checks a rule
//! that the compiler cannot express:
//! - No blocking I/O or thread sleeps inside async code
//! - Gate counters change only through the gate
//! - Connection state changes only inside the connection manager

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots, relative to the workspace root
pub const SOURCE_ROOTS: &[&str] = &["dispatch/core/src", "dispatch/cli/src"];

/// One line of production code
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File path relative to the workspace root
    pub file: String,
    /// 1-based line number
    pub number: usize,
    /// Line text with any trailing `//` comment removed
    pub code: String,
    /// Whether the line sits inside an `async fn` or `async` block
    pub in_async: bool,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.file, self.number, self.code.trim())
    }
}

/// Workspace root (two levels above this crate)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|_| PathBuf::from("../.."))
}

/// Every production line under [`SOURCE_ROOTS`].
///
/// Scanning a file stops at its first `#[cfg(test)]` item; test modules
/// live at the bottom of each file.
pub fn production_lines() -> Vec<SourceLine> {
    let root = workspace_root();
    let mut lines = Vec::new();

    for dir in SOURCE_ROOTS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            if let Ok(content) = fs::read_to_string(entry.path()) {
                scan(&relative, &content, &mut lines);
            }
        }
    }

    lines
}

fn scan(file: &str, content: &str, out: &mut Vec<SourceLine>) {
    // Brace depth at which the innermost async body opened
    let mut async_depths: Vec<usize> = Vec::new();
    let mut depth = 0usize;
    let mut pending_async = false;

    for (idx, line) in content.lines().enumerate() {
        if line.trim() == "#[cfg(test)]" {
            break;
        }

        let code = strip_comment(line);
        if code.contains("async fn ") || code.contains("async move") || code.contains("async {") {
            pending_async = true;
        }

        out.push(SourceLine {
            file: file.to_string(),
            number: idx + 1,
            code: code.to_string(),
            in_async: !async_depths.is_empty() || pending_async,
        });

        for ch in code.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    if pending_async {
                        async_depths.push(depth);
                        pending_async = false;
                    }
                }
                '}' => {
                    if async_depths.last() == Some(&depth) {
                        async_depths.pop();
                    }
                    depth = depth.saturating_sub(1);
                }
                _ => {}
            }
        }
        // `async fn f();` in a trait has no body
        if pending_async && code.trim_end().ends_with(';') {
            pending_async = false;
        }
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        // Keep URLs such as ws://host
        Some(i) if i > 0 && line[..i].ends_with(':') => line,
        Some(i) => &line[..i],
        None => line,
    }
}

/// Lines containing `needle` outside the files listed in `allowed`
pub fn occurrences_outside(needle: &str, allowed: &[&str]) -> Vec<SourceLine> {
    production_lines()
        .into_iter()
        .filter(|l| l.code.contains(needle))
        .filter(|l| !allowed.iter().any(|a| l.file.ends_with(a)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_tracks_async_bodies() {
        let src = "fn sync() {\n    a();\n}\n\nasync fn run() {\n    b();\n}\nfn after() {}\n";
        let mut lines = Vec::new();
        scan("x.rs", src, &mut lines);

        assert!(!lines[1].in_async);
        assert!(lines[5].in_async);
        assert!(!lines[7].in_async);
    }

    #[test]
    fn test_scan_stops_at_test_module() {
        let src = "fn a() {}\n#[cfg(test)]\nmod tests {\n    fn b() {}\n}\n";
        let mut lines = Vec::new();
        scan("x.rs", src, &mut lines);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_comments_are_stripped() {
        assert_eq!(strip_comment("let x = 1; // note").trim(), "let x = 1;");
        assert_eq!(strip_comment("\"ws://localhost\""), "\"ws://localhost\"");
    }

    #[test]
    fn test_sources_are_found() {
        assert!(production_lines()
            .iter()
            .any(|l| l.file.ends_with("routing/dispatcher.rs")));
    }
}
