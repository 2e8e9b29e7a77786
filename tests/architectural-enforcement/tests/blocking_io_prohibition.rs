//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async production code in duet-core MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net`, `reqwest` async clients, not
//! `std::fs`, `std::net`, `reqwest::blocking`.
//!
//! Blocking I/O is acceptable in non-async functions (configuration loading
//! before the runtime is saturated) and in test code.

use std::fs;
use std::path::{Path, PathBuf};

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O in async code:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - tokio::net::TcpStream::connect().await");
        eprintln!("  - reqwest async clients");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config loading before the runtime)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all blocking I/O calls in production code
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();

    check_directory(&production_dir("duet/core/src"), &mut violations);

    violations
}

/// Resolve a production source directory relative to the workspace root
fn production_dir(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(relative)
}

fn check_directory(path: &Path, violations: &mut Vec<String>) {
    assert!(
        path.exists(),
        "production directory missing: {}",
        path.display()
    );

    for entry in walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), violations);
        }
    }
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let lines: Vec<&str> = content.lines().collect();
    let production_end = production_end(&lines);

    for (idx, line) in lines.iter().enumerate().take(production_end) {
        let line_number = idx + 1;

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        // Skip if in non-async function (before/outside the runtime)
        if is_in_non_async_function(&lines, idx) {
            continue;
        }

        // Check for blocking file system I/O
        if code_part.contains("std::fs::") || code_part.contains("use std::fs") {
            violations.push(format!(
                "{}:{} - Blocking file I/O: {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }

        // Check for blocking network I/O
        if code_part.contains("std::net::") || code_part.contains("use std::net") {
            violations.push(format!(
                "{}:{} - Blocking network I/O: {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }

        // Check for blocking HTTP client
        if code_part.contains("reqwest::blocking") {
            violations.push(format!(
                "{}:{} - Blocking HTTP client: {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }
    }
}

/// Everything from the `#[cfg(test)]` module to the end of the file is
/// test code; production checks stop there.
fn production_end(lines: &[&str]) -> usize {
    lines
        .iter()
        .position(|l| l.trim() == "#[cfg(test)]")
        .unwrap_or(lines.len())
}

/// Check if line is inside a non-async function (acceptable for blocking I/O)
fn is_in_non_async_function(lines: &[&str], current_idx: usize) -> bool {
    // Scan backwards for fn (without async)
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.starts_with("fn ") || line.starts_with("pub fn ") {
            // Non-async function - blocking I/O is OK here
            return true;
        }

        if line.contains("async fn ") {
            return false; // Found async function
        }

        // Stop at module/impl boundaries
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_async_function_detection() {
        let test_code = vec![
            "fn load() {",
            "    let contents = std::fs::read_to_string(\"config.toml\")?;",
            "}",
        ];

        // Blocking I/O in a sync function is acceptable
        assert!(
            is_in_non_async_function(&test_code, 1),
            "Should detect non-async function"
        );
    }

    #[test]
    fn test_async_function_detection() {
        let test_code = vec![
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];

        assert!(
            !is_in_non_async_function(&test_code, 1),
            "Should not treat an async fn as a sync one"
        );
    }

    #[test]
    fn test_production_end_cutoff() {
        let test_code = vec![
            "fn production() {}",
            "#[cfg(test)]",
            "mod tests {",
            "    use std::fs;",
            "}",
        ];

        assert_eq!(production_end(&test_code), 1);
    }
}
