//! Replays a captured runner notification stream and prints the resulting
//! tree.
//!
//! Input is JSON lines on stdin, each `{"session": "...", "event": {...}}`
//! where `event` is a raw runner notification. Sessions are opened on first
//! sight and closed at end of input, so a truncated capture still yields a
//! settled tree.

use std::io::BufRead;

use serde::Deserialize;
use smol_str::SmolStr;
use tracing::{info, warn};

use runlens_model::{ModelConfig, NodeId, TestModel, TestStatus};
use runlens_session::{protocol::Notification, SessionCoordinator};

#[derive(Debug, Deserialize)]
struct ReplayLine {
    session: SmolStr,
    event: Notification,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ModelConfig::load(std::path::Path::new("."));
    let mut coordinator = SessionCoordinator::new(config);
    let mut seen_sessions: Vec<SmolStr> = Vec::new();

    let stdin = std::io::stdin();
    for (index, line) in stdin.lock().lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("runlens-replay: read error: {err}");
                std::process::exit(1);
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ReplayLine = match serde_json::from_str(&line) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!("line {}: unrecognized input: {err}", index + 1);
                continue;
            }
        };
        if !seen_sessions.contains(&parsed.session) {
            coordinator.begin_session(&parsed.session, true);
            seen_sessions.push(parsed.session.clone());
        }
        coordinator.handle(&parsed.session, &parsed.event);
    }

    for session in &seen_sessions {
        coordinator.end_session(session);
    }
    info!("replayed {} session(s)", seen_sessions.len());

    let model = coordinator.model();
    let paths: Vec<SmolStr> = model.suite_paths().cloned().collect();
    for path in paths {
        if let Some(data) = model.suite(&path) {
            print_node(model, data.suite(), 0);
        }
    }
}

fn print_node(model: &TestModel, id: NodeId, depth: usize) {
    let Some(node) = model.node(id) else { return };
    let indent = "  ".repeat(depth);
    let label = if node.is_suite() {
        node.path.clone()
    } else {
        model.label(id)
    };
    let status = node
        .status()
        .unwrap_or_else(|| model.highest_child_status(id, false));
    let mut line = format!("{indent}{label} [{}]", status_name(status));
    if !node.children.is_empty() {
        if let Some(description) = model.description(id) {
            line.push_str(&format!(" ({description})"));
        }
    }
    if let Some(duration) = node.duration {
        line.push_str(&format!(" {}ms", duration.as_millis()));
    }
    println!("{line}");
    for &child in &node.children {
        print_node(model, child, depth + 1);
    }
}

fn status_name(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Unknown => "unknown",
        TestStatus::Skipped => "skipped",
        TestStatus::Passed => "passed",
        TestStatus::Running => "running",
        TestStatus::Failed => "failed",
    }
}
