//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in duet-core MUST NOT call sleep methods.
//! Streams are driven by awaiting channel receives and HTTP frames, with
//! `tokio::time::timeout` bounding inactivity; nothing waits on the clock.
//!
//! **Exceptions**: Exponential backoff (retry logic only), periodic tasks
//! using `tokio::time::interval()`, test code.

use std::fs;
use std::path::{Path, PathBuf};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff in retry logic");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("  - Test code");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for stream frames (await the channel!)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    check_directory(
        &production_dir("duet/core/src"),
        &mut violations,
        &SleepPolicy {
            allow_backoff: true,
        },
    );

    violations
}

struct SleepPolicy {
    allow_backoff: bool,
}

/// Resolve a production source directory relative to the workspace root
fn production_dir(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(relative)
}

fn check_directory(path: &Path, violations: &mut Vec<String>, policy: &SleepPolicy) {
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
            check_file(entry.path(), violations, policy);
        }
    }
}

fn check_file(path: &Path, violations: &mut Vec<String>, policy: &SleepPolicy) {
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

        // Check for sleep calls
        if code_part.contains("::sleep(") || code_part.contains(".sleep(") {
            // Check if it's exponential backoff
            if policy.allow_backoff && is_backoff_context(&lines, idx) {
                continue;
            }

            // Check if it's using tokio::time::interval (acceptable)
            if is_interval_pattern(&lines, idx) {
                continue;
            }

            violations.push(format!(
                "{}:{} - {}",
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

/// Check if sleep is used for exponential backoff (acceptable for retry logic)
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    // Look for backoff, retry, reconnect in nearby lines
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for i in context_range {
        let line = lines[i].to_lowercase();

        // Check for exponential backoff calculation (2^n pattern or bit shift)
        if line.contains("<<") || line.contains("pow") || line.contains("* 2") {
            has_backoff_calc = true;
        }

        // Check for retry/reconnect context
        if line.contains("retry")
            || line.contains("reconnect")
            || line.contains("backoff")
            || line.contains("attempt")
        {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

/// Check if this is tokio::time::interval pattern (acceptable for periodic tasks)
fn is_interval_pattern(lines: &[&str], current_idx: usize) -> bool {
    // Look backwards for interval usage
    let context_range = current_idx.saturating_sub(20)..current_idx;

    for i in context_range {
        let line = lines[i];
        if line.contains("interval.tick()") || line.contains("tokio::time::interval") {
            return true;
        }
    }

    // Also check forward a bit
    let forward_range = current_idx..std::cmp::min(current_idx + 5, lines.len());
    for i in forward_range {
        let line = lines[i];
        if line.contains("interval.tick()") {
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_context_detection() {
        let test_code = vec![
            "// Retry with exponential backoff",
            "let delay = base_delay * 2u64.pow(attempt);",
            "tokio::time::sleep(Duration::from_millis(delay)).await;",
        ];

        assert!(
            is_backoff_context(&test_code, 2),
            "Should recognize backoff context"
        );
    }

    #[test]
    fn test_bare_sleep_is_not_backoff() {
        let test_code = vec![
            "loop {",
            "    tokio::time::sleep(Duration::from_millis(100)).await;",
            "    check_for_updates();",
            "}",
        ];

        assert!(
            !is_backoff_context(&test_code, 1),
            "Polling sleep is not backoff"
        );
    }

    #[test]
    fn test_production_end_cutoff() {
        let test_code = vec![
            "fn production() {}",
            "#[cfg(test)]",
            "mod tests {",
            "    // sleeps in here are fine",
            "}",
        ];

        assert_eq!(production_end(&test_code), 1);
    }
}
