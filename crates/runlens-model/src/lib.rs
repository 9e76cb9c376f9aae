//! `runlens-model` - reconciled test tree for editor test integrations.
//!
//! Two independent data sources feed the same tree: static outline discovery
//! of a source file, and live notifications from one or more concurrently
//! running test sessions. The [`TestModel`] merges both into a single forest
//! of suites, groups, and tests that stays stable across repeated runs.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

/// Engine configuration loaded from `runlens.toml`.
pub mod config;
mod matcher;
/// Suite/group/test nodes and derived state.
pub mod node;
/// The central mutation API and its observer contract.
pub mod model;
/// Per-suite lookup indices.
pub mod registry;

pub use config::ModelConfig;
pub use model::{CountDirection, ModelListener, TestModel, TestResult};
pub use node::{
    Node, NodeId, NodeKind, NodeSource, OutputEvent, Position, Range, TestStatus,
};
pub use registry::SuiteData;
