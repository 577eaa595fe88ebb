//! End-to-end scenarios for the sandbox subsystem.
//!
//! Tests that need the script-engine or interpreter wasm are marked ignored,
//! matching how the assets are provisioned out of band. Everything else runs
//! against the public API with no assets and no network.

use std::time::Duration;

use lesson_sandbox_rs::prelude::*;
use lesson_sandbox_rs::protocol::serialize_arg;

/// Scheduler wired to a temp directory: the script engine is absent and the
/// runtime asset is a pre-cached stub, so nothing touches the network.
fn offline_scheduler(dir: &std::path::Path) -> std::sync::Arc<Scheduler> {
    std::fs::write(dir.join("rustpython.wasm"), b"\0asm\x01\x00\x00\x00").unwrap();
    let config = SandboxConfig::builder()
        .engine_path(dir.join("missing-quickjs.wasm"))
        .runtime_url("http://127.0.0.1:1/rustpython.wasm")
        .runtime_cache_dir(dir)
        .build();
    Scheduler::new(config).unwrap()
}

/// Poll the console until `predicate` holds or the timeout elapses.
async fn wait_for(scheduler: &Scheduler, predicate: impl Fn(&[LogEntry]) -> bool) {
    for _ in 0..400 {
        if predicate(&scheduler.console().snapshot()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!(
        "condition never held; console: {:?}",
        scheduler
            .console()
            .snapshot()
            .iter()
            .map(|e| (e.level, e.message.clone()))
            .collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_whitespace_python_warns_without_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = offline_scheduler(dir.path());

    scheduler.run("   \n\t", Language::Python).await;
    wait_for(&scheduler, |entries| entries.len() == 1).await;

    let entries = scheduler.console().snapshot();
    assert_eq!(entries[0].level, LogLevel::Warning);
    assert_eq!(entries[0].message, "No Python code to run.");
}

#[tokio::test]
async fn test_stale_run_output_is_absent() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = offline_scheduler(dir.path());

    // Each web run against the missing engine produces exactly one
    // setup-failure entry tagged to its own run.
    scheduler.run("console.log('first')", Language::Web).await;
    scheduler.run("console.log('second')", Language::Web).await;
    scheduler.run("console.log('third')", Language::Web).await;

    let entries = scheduler.console().snapshot();
    assert_eq!(entries.len(), 1, "earlier runs left no entries behind");
    assert!(entries[0].message.starts_with("Error setting up console:"));
}

#[tokio::test]
async fn test_console_clear_and_append_order() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = offline_scheduler(dir.path());
    let console = scheduler.console();

    console.clear();
    assert!(console.is_empty());

    for i in 0..7 {
        console.append(format!("line {i}"), LogLevel::Info);
    }
    let entries = console.snapshot();
    assert_eq!(entries.len(), 7);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.message, format!("line {i}"));
    }
}

#[test]
fn test_serialization_round_trip() {
    let value = serde_json::json!({"k": [1, 2, {"nested": true}]});
    assert_eq!(serialize_arg(&value), serde_json::to_string(&value).unwrap());

    // Strings pass through unchanged, never re-quoted.
    let string = serde_json::json!("plain text");
    assert_eq!(serialize_arg(&string), "plain text");
}

// The scenarios below exercise the real execution substrates. They require
// the wasm assets (and, for Python, one-time network access to the pinned
// runtime URL) and are run out of band.

#[tokio::test]
#[ignore = "requires quickjs.wasm"]
async fn test_script_console_log() {
    let scheduler = Scheduler::new(SandboxConfig::default()).unwrap();
    scheduler.run(r#"console.log("hi")"#, Language::Web).await;

    wait_for(&scheduler, |entries| !entries.is_empty()).await;
    let entries = scheduler.console().snapshot();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, LogLevel::Info);
    assert_eq!(entries[0].message, "hi");
}

#[tokio::test]
#[ignore = "requires quickjs.wasm"]
async fn test_script_top_level_throw() {
    let scheduler = Scheduler::new(SandboxConfig::default()).unwrap();
    scheduler
        .run(r#"throw new Error("boom")"#, Language::Web)
        .await;

    wait_for(&scheduler, |entries| !entries.is_empty()).await;
    let entries = scheduler.console().snapshot();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].level, LogLevel::Error);
    assert!(entries[0].message.contains("boom"));
}

#[tokio::test]
#[ignore = "requires quickjs.wasm"]
async fn test_markup_scripts_are_extracted() {
    let scheduler = Scheduler::new(SandboxConfig::default()).unwrap();
    scheduler
        .run(
            "<html><body><h1>Title</h1><script>console.log(\"from markup\")</script></body></html>",
            Language::Web,
        )
        .await;

    wait_for(&scheduler, |entries| !entries.is_empty()).await;
    assert_eq!(scheduler.console().snapshot()[0].message, "from markup");
}

#[tokio::test]
#[ignore = "requires quickjs.wasm"]
async fn test_rapid_reruns_keep_only_latest_output() {
    let config = SandboxConfig::builder()
        .grace_period(Duration::from_secs(5))
        .build();
    let scheduler = Scheduler::new(config).unwrap();

    scheduler.run(r#"console.log("one")"#, Language::Web).await;
    scheduler.run(r#"console.log("two")"#, Language::Web).await;

    wait_for(&scheduler, |entries| {
        entries.iter().any(|e| e.message == "two")
    })
    .await;
    let entries = scheduler.console().snapshot();
    assert!(entries.iter().all(|e| e.message != "one"));
}

#[tokio::test]
#[ignore = "requires network access to the pinned runtime URL"]
async fn test_python_expression_result() {
    let scheduler = Scheduler::new(SandboxConfig::default()).unwrap();
    scheduler.run("1 + 1", Language::Python).await;

    wait_for(&scheduler, |entries| {
        entries.iter().any(|e| e.level == LogLevel::Success)
    })
    .await;

    let entries = scheduler.console().snapshot();
    assert_eq!(entries[0].message, "Loading Python runtime…");
    assert_eq!(entries[1].message, "Running Python…");
    let last = entries.last().unwrap();
    assert_eq!(last.level, LogLevel::Success);
    assert_eq!(last.message, "2");
}

#[tokio::test]
#[ignore = "requires network access to the pinned runtime URL"]
async fn test_python_print_and_exception() {
    let scheduler = Scheduler::new(SandboxConfig::default()).unwrap();
    scheduler
        .run("print('out')\nraise ValueError('bad value')", Language::Python)
        .await;

    wait_for(&scheduler, |entries| {
        entries.iter().any(|e| e.level == LogLevel::Error)
    })
    .await;

    let entries = scheduler.console().snapshot();
    assert!(entries.iter().any(|e| e.message == "out"));
    assert!(entries
        .iter()
        .any(|e| e.level == LogLevel::Error && e.message.contains("bad value")));
}
