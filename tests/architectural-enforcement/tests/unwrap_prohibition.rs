//! Integration Test: Unwrap Prohibition
//!
//! **Policy**: Production code in duet-core MUST NOT call `.unwrap()`.
//! Stream and facade errors are typed (`StreamError`, `DuetError`) and
//! propagated with `?`; a panic inside an orchestrator task would silently
//! kill its exchange.
//!
//! **Exceptions**: Test code, and `.expect()` with a message for startup
//! invariants (e.g. constructing the HTTP client). `unwrap_or`,
//! `unwrap_or_else` and `unwrap_or_default` are fine; they do not panic.

use std::fs;
use std::path::{Path, PathBuf};

/// Test that production code does not contain .unwrap() calls
#[test]
fn test_no_unwrap_in_production_code() {
    let violations = find_unwrap_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: .unwrap() calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE alternatives:");
        eprintln!("  - Propagate with ? and a typed error variant");
        eprintln!("  - unwrap_or / unwrap_or_else / unwrap_or_default");
        eprintln!("  - .expect(\"message\") for startup invariants only");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - .unwrap() on Results from I/O or parsing");
        eprintln!("  - .unwrap() on Options that depend on runtime state");

        panic!(
            "\nFound {} unwrap violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all .unwrap() calls in production code
fn find_unwrap_violations() -> Vec<String> {
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
        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        // The exact token: unwrap_or* variants do not match
        if code_part.contains(".unwrap()") {
            violations.push(format!("{}:{} - {}", path.display(), idx + 1, line.trim()));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_or_variants_do_not_match() {
        let code = vec![
            "let a = value.unwrap_or_default();",
            "let b = value.unwrap_or_else(Vec::new);",
            "let c = value.unwrap_or(0);",
        ];

        let mut violations = Vec::new();
        for (idx, line) in code.iter().enumerate().take(production_end(&code)) {
            if line.contains(".unwrap()") {
                violations.push(idx);
            }
        }
        assert!(violations.is_empty(), "unwrap_or variants must be allowed");
    }

    #[test]
    fn test_bare_unwrap_matches() {
        assert!("let x = result.unwrap();".contains(".unwrap()"));
    }

    #[test]
    fn test_production_end_cutoff() {
        let code = vec![
            "fn production() {}",
            "#[cfg(test)]",
            "mod tests {",
            "    // unwraps in here are fine",
            "}",
        ];

        assert_eq!(production_end(&code), 1);
    }
}
