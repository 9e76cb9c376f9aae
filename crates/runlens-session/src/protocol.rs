//! Notifications emitted by the external test runner.
//!
//! These mirror the runner's JSON stream: one object per event, discriminated
//! by a `type` field. Decoding is strict about shape but lenient about
//! optional fields; anything the runner omits stays `None`.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

/// Failed to decode a runner notification.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line was not a known notification.
    #[error("invalid notification: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode one notification from its JSON text.
pub fn parse_notification(json: &str) -> Result<Notification, ProtocolError> {
    Ok(serde_json::from_str(json)?)
}

/// One event from the runner's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// A suite (one file) is about to run.
    Suite(SuiteNotification),
    /// A group was entered.
    Group(GroupNotification),
    /// A test began executing.
    TestStart(TestStartNotification),
    /// A test finished.
    TestDone(TestDoneNotification),
    /// A test printed to stdout.
    Print(PrintNotification),
    /// A test reported an error or failure detail.
    Error(ErrorNotification),
    /// The run completed cleanly.
    Done(DoneNotification),
}

/// `suite`: announces a suite and its runner-local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteNotification {
    /// Runner-local suite id, unique within one session.
    pub id: i64,
    /// Path of the suite file.
    pub path: SmolStr,
}

/// `group`: announces a group, possibly nested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupNotification {
    /// Runner-local group id.
    pub id: i64,
    /// Display name; unnamed groups are phantom wrappers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<SmolStr>,
    /// Enclosing group id, absent for top-level groups.
    #[serde(rename = "parentID", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    /// The suite this group belongs to.
    #[serde(rename = "suiteID")]
    pub suite_id: i64,
    /// 1-based declaration line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based declaration column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// File the group is declared in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<SmolStr>,
    /// 1-based line inside the originally invoked suite file.
    #[serde(rename = "root_line", default, skip_serializing_if = "Option::is_none")]
    pub root_line: Option<u32>,
    /// 1-based column inside the originally invoked suite file.
    #[serde(rename = "root_column", default, skip_serializing_if = "Option::is_none")]
    pub root_column: Option<u32>,
    /// The originally invoked suite file.
    #[serde(rename = "root_url", default, skip_serializing_if = "Option::is_none")]
    pub root_url: Option<SmolStr>,
}

/// `testStart`: a test began executing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStartNotification {
    /// Runner-local test id.
    pub id: i64,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<SmolStr>,
    /// The suite this test belongs to.
    #[serde(rename = "suiteID")]
    pub suite_id: i64,
    /// Enclosing group ids, outermost first.
    #[serde(rename = "groupIDs", default)]
    pub group_ids: Vec<i64>,
    /// 1-based declaration line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// 1-based declaration column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// File the test is declared in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<SmolStr>,
    /// 1-based line inside the originally invoked suite file.
    #[serde(rename = "root_line", default, skip_serializing_if = "Option::is_none")]
    pub root_line: Option<u32>,
    /// 1-based column inside the originally invoked suite file.
    #[serde(rename = "root_column", default, skip_serializing_if = "Option::is_none")]
    pub root_column: Option<u32>,
    /// The originally invoked suite file.
    #[serde(rename = "root_url", default, skip_serializing_if = "Option::is_none")]
    pub root_url: Option<SmolStr>,
    /// Milliseconds since the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

/// Result field of a `testDone` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoneResult {
    /// The test was skipped.
    Skipped,
    /// The test passed.
    Success,
    /// An expectation failed.
    Failure,
    /// The test raised outside an expectation.
    Error,
}

/// `testDone`: a test finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDoneNotification {
    /// The test that finished.
    #[serde(rename = "testID")]
    pub test_id: i64,
    /// Outcome; absent when the runner could not determine one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DoneResult>,
    /// Set when the test was skipped, regardless of `result`.
    #[serde(default)]
    pub skipped: bool,
    /// Milliseconds since the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
}

/// `print`: a test wrote to stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrintNotification {
    /// The test that printed.
    #[serde(rename = "testID")]
    pub test_id: i64,
    /// The printed message.
    pub message: String,
}

/// `error`: a test reported an error or failure detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotification {
    /// The test that errored.
    #[serde(rename = "testID")]
    pub test_id: i64,
    /// The error text.
    pub error: String,
    /// Stack trace, possibly empty.
    #[serde(default)]
    pub stack_trace: String,
    /// Whether the runner classified this as a test failure.
    #[serde(default)]
    pub is_failure: bool,
}

/// `done`: the run completed cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneNotification {
    /// Whether every test passed; absent on aborted runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}
