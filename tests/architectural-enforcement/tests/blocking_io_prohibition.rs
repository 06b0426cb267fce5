//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async code in the dispatch crates MUST NOT block the runtime.
//! **Required**: `tokio::fs`, `tokio::net`, `tokio::time::sleep`, async reqwest
//!
//! Synchronous functions (config loading before the runtime does any work)
//! and test modules are exempt.

use architectural_enforcement::{production_lines, SourceLine};

const FORBIDDEN: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::thread::sleep", "Thread sleep"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
];

fn violations() -> Vec<(SourceLine, &'static str)> {
    production_lines()
        .into_iter()
        .filter(|line| line.in_async)
        .filter_map(|line| {
            FORBIDDEN
                .iter()
                .find(|(needle, _)| line.code.contains(needle))
                .map(|(_, what)| (line, *what))
        })
        .collect()
}

#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = violations();

    if !violations.is_empty() {
        eprintln!("\n❌ Blocking calls found in async production code:\n");
        for (line, what) in &violations {
            eprintln!("  ❌ {what}: {line}");
        }
        eprintln!("\n✅ Use tokio::fs, tokio::net, tokio::time::sleep or async reqwest instead.");

        panic!("Found {} blocking call(s) in async code", violations.len());
    }
}

#[test]
fn test_no_blocking_reqwest_anywhere() {
    let blocking: Vec<_> = production_lines()
        .into_iter()
        .filter(|l| l.code.contains("reqwest::blocking"))
        .collect();

    assert!(
        blocking.is_empty(),
        "reqwest::blocking is not allowed:\n{}",
        blocking
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    );
}
