//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Engine production code MUST NOT call sleep methods. The
//! engine waits on I/O (event channels) and polls timers through
//! `tokio::time::interval`; sleeping is a poor man's synchronization and
//! hides real latency.
//!
//! **Exceptions**: test code, and `tokio::time::timeout` deadlines
//! (which are waits on I/O, not sleeps).

use std::fs;
use std::path::{Path, PathBuf};

/// Test that engine production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE:");
        eprintln!("  - Test code (#[test] or #[tokio::test] functions)");
        eprintln!("  - Periodic polling via tokio::time::interval()");
        eprintln!("  - Deadlines via tokio::time::timeout()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for events (use async I/O!)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn engine_src() -> PathBuf {
    // Anchored to this member's manifest so the test works from any cwd.
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../engine/core/src")
        .canonicalize()
        .expect("engine source tree missing")
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    for entry in walkdir::WalkDir::new(engine_src())
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), &mut violations);
        }
    }

    violations
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let lines: Vec<&str> = content.lines().collect();
    let mut in_test_module = false;

    for (idx, line) in lines.iter().enumerate() {
        if line.trim_start().starts_with("#[cfg(test)]") {
            // Test modules sit at the end of each file; everything below
            // the marker is test code.
            in_test_module = true;
        }
        if in_test_module {
            continue;
        }

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        if code_part.contains("::sleep(") || code_part.contains(".sleep(") {
            violations.push(format!("{}:{} - {}", path.display(), idx + 1, line.trim()));
        }
        if code_part.contains("thread::sleep") {
            violations.push(format!("{}:{} - {}", path.display(), idx + 1, line.trim()));
        }
    }
}
