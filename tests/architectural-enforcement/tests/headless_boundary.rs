//! Integration Test: Headless Boundary
//!
//! **Policy**: The engine is headless. Everything it shows the user goes
//! through the `RenderSink` trait; importing a UI toolkit into the engine
//! collapses that boundary and makes the stream pipeline untestable.

use std::fs;
use std::path::{Path, PathBuf};

/// Crates whose presence in the engine would mean UI code leaked in.
const UI_TOOLKITS: &[&str] = &[
    "ratatui",
    "crossterm",
    "egui",
    "eframe",
    "gtk",
    "iced",
    "winit",
    "web_sys",
    "wasm_bindgen",
];

/// Test that the engine never imports a UI toolkit
#[test]
fn test_engine_has_no_ui_toolkit_imports() {
    let violations = find_toolkit_imports();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: UI toolkit imports found in the engine!");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\nThe engine renders exclusively through RenderSink.");
        eprintln!("Move presentation code behind a sink implementation.");

        panic!(
            "\nFound {} UI import violation(s) in the engine.\nFix these before merging!",
            violations.len()
        );
    }
}

fn engine_src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../engine/core/src")
        .canonicalize()
        .expect("engine source tree missing")
}

fn find_toolkit_imports() -> Vec<String> {
    let mut violations = Vec::new();

    for entry in walkdir::WalkDir::new(engine_src())
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
            continue;
        }
        let content = match fs::read_to_string(entry.path()) {
            Ok(c) => c,
            Err(_) => continue,
        };

        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim_start();
            if !trimmed.starts_with("use ") && !trimmed.starts_with("extern crate ") {
                continue;
            }
            for toolkit in UI_TOOLKITS {
                if trimmed.contains(&format!("{toolkit}::"))
                    || trimmed.contains(&format!("{toolkit};"))
                {
                    violations.push(format!(
                        "{}:{} - {}",
                        entry.path().display(),
                        idx + 1,
                        line.trim()
                    ));
                }
            }
        }
    }

    violations
}
