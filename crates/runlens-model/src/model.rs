//! The central mutation API: discovery, start, completion, output, removal,
//! and incremental aggregate recomputation.
//!
//! Every mutating operation fires change notifications on an explicit
//! observer list owned by the model; there is no global event channel.

use std::time::Duration;

use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::warn;

use crate::config::ModelConfig;
use crate::matcher::{self, TemplateKind};
use crate::node::{Node, NodeArena, NodeId, NodeKind, NodeSource, OutputEvent, Range, TestStatus};
use crate::registry::SuiteData;

/// Result value reported by the runner for a finished test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    /// The test was skipped.
    Skipped,
    /// The test passed.
    Success,
    /// An expectation failed.
    Failure,
    /// The test raised outside an expectation. Collapses to the same status
    /// as a failure; there is no separate error status.
    Error,
}

impl TestResult {
    /// The tree status this result maps to.
    #[must_use]
    pub fn status(self) -> TestStatus {
        match self {
            Self::Skipped => TestStatus::Skipped,
            Self::Success => TestStatus::Passed,
            Self::Failure | Self::Error => TestStatus::Failed,
        }
    }
}

/// Direction of an aggregate recomputation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountDirection {
    /// From a node through its ancestors only; the cheap common case after a
    /// single test completes.
    Up,
    /// Recursively through all descendants; used after bulk changes.
    Down,
}

/// Hooks invoked synchronously immediately after the corresponding mutation.
///
/// Listeners registered while a dispatch is in flight are not retained.
#[allow(unused_variables)]
pub trait ModelListener {
    /// A suite root was discovered or re-registered.
    fn suite_discovered(&mut self, model: &TestModel, node: NodeId) {}
    /// A group was discovered or reused.
    fn group_discovered(&mut self, model: &TestModel, node: NodeId) {}
    /// A test was discovered or reused.
    fn test_discovered(&mut self, model: &TestModel, node: NodeId) {}
    /// A test moved to `Running`.
    fn test_started(&mut self, model: &TestModel, node: NodeId) {}
    /// A `print` record was appended to a test.
    fn test_output(&mut self, model: &TestModel, node: NodeId, message: &str) {}
    /// An `error` record was appended to a test.
    fn test_error_output(
        &mut self,
        model: &TestModel,
        node: NodeId,
        message: &str,
        stack_trace: &str,
        is_failure: bool,
    ) {
    }
    /// A test completed.
    fn test_done(&mut self, model: &TestModel, node: NodeId) {}
    /// A suite run completed (possibly synthesized).
    fn suite_done(&mut self, model: &TestModel, node: NodeId) {}
    /// The tree changed at `node`; `removed` is set when the node was pruned.
    fn tree_changed(&mut self, model: &TestModel, node: NodeId, removed: bool) {}
}

/// The reconciled forest of suites, groups, and tests.
pub struct TestModel {
    nodes: NodeArena,
    suites: IndexMap<SmolStr, SuiteData>,
    listeners: Vec<Box<dyn ModelListener>>,
    config: ModelConfig,
}

impl std::fmt::Debug for TestModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestModel")
            .field("suites", &self.suites.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl Default for TestModel {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl TestModel {
    /// A model with the given configuration and no listeners.
    #[must_use]
    pub fn new(config: ModelConfig) -> Self {
        Self {
            nodes: NodeArena::default(),
            suites: IndexMap::new(),
            listeners: Vec::new(),
            config,
        }
    }

    /// Register an observer.
    pub fn add_listener(&mut self, listener: Box<dyn ModelListener>) {
        self.listeners.push(listener);
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Registry for a suite path.
    #[must_use]
    pub fn suite(&self, path: &str) -> Option<&SuiteData> {
        self.suites.get(path)
    }

    /// Known suite paths, in discovery order.
    pub fn suite_paths(&self) -> impl Iterator<Item = &SmolStr> {
        self.suites.keys()
    }

    /// Display label for a node (see the node model).
    #[must_use]
    pub fn label(&self, id: NodeId) -> SmolStr {
        self.nodes.label(id)
    }

    /// Derived status of a composite node.
    #[must_use]
    pub fn highest_child_status(&self, id: NodeId, include_skipped: bool) -> TestStatus {
        self.nodes.highest_status(id, include_skipped)
    }

    /// `"{pass}/{total} passed"` under the active configuration.
    #[must_use]
    pub fn description(&self, id: NodeId) -> Option<String> {
        self.nodes
            .get(id)
            .map(|node| node.description(self.config.count_skipped_tests))
    }

    /// Register (or re-register) the suite root for `path`.
    pub fn suite_discovered(&mut self, session: Option<&str>, path: &str) -> NodeId {
        if let Some(data) = self.suites.get_mut(path) {
            if let Some(session) = session {
                data.note_session(session, self.config.retained_sessions);
            }
            let root = data.suite();
            self.emit(|listener, model| listener.suite_discovered(model, root));
            return root;
        }
        let source = if session.is_some() {
            NodeSource::Result
        } else {
            NodeSource::Outline
        };
        let root = self
            .nodes
            .insert(Node::new(NodeKind::Suite, SmolStr::new(path), source));
        let mut data = SuiteData::new(root, SmolStr::new(path));
        if let Some(session) = session {
            data.note_session(session, self.config.retained_sessions);
        }
        self.suites.insert(SmolStr::new(path), data);
        self.fire_tree_changed(root, false);
        self.emit(|listener, model| listener.suite_discovered(model, root));
        root
    }

    /// Mark every known group/test in the suite stale; when the whole suite
    /// (not a single test) is being run, also flag everything as potentially
    /// deleted so anything the run never touches is pruned at `suite_done`.
    pub fn flag_suite_start(&mut self, suite_path: &str, whole_suite: bool) {
        let Some(data) = self.suites.get(suite_path) else {
            warn!("suite start flagged for unknown suite {suite_path}; ignoring");
            return;
        };
        let known: Vec<NodeId> = data
            .all_groups()
            .into_iter()
            .chain(data.all_tests())
            .collect();
        for id in known {
            if let Some(node) = self.nodes.get_mut(id) {
                node.is_stale = true;
            }
        }
        if whole_suite {
            self.mark_all_as_potentially_deleted(suite_path);
        }
    }

    /// Flag every node below the suite root as potentially deleted.
    pub fn mark_all_as_potentially_deleted(&mut self, suite_path: &str) {
        let Some(root) = self.suites.get(suite_path).map(SuiteData::suite) else {
            return;
        };
        self.mark_subtree_deleted(root);
    }

    fn mark_subtree_deleted(&mut self, id: NodeId) {
        let children = self
            .nodes
            .get(id)
            .map(|node| node.children.clone())
            .unwrap_or_default();
        for child in children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.is_potentially_deleted = true;
            }
            self.mark_subtree_deleted(child);
        }
    }

    /// Reconcile a discovered group into the tree.
    pub fn group_discovered(
        &mut self,
        session: Option<&str>,
        suite_path: &str,
        source: NodeSource,
        id: i64,
        name: Option<&str>,
        parent_id: Option<i64>,
        range: Option<Range>,
    ) -> Option<NodeId> {
        let Some(data) = self.suites.get(suite_path) else {
            warn!("group {id} discovered for unknown suite {suite_path}; dropping");
            return None;
        };
        let suite_root = data.suite();
        let reused = name.and_then(|name| data.reuse_matching_group(name));
        let intended_parent = parent_id
            .and_then(|pid| data.group_for_id(session, pid))
            .unwrap_or(suite_root);

        let node_id = reused.unwrap_or_else(|| {
            self.nodes.insert(Node::new(
                NodeKind::Group {
                    name: name.map(SmolStr::new),
                },
                SmolStr::new(suite_path),
                source,
            ))
        });
        self.store_in_registry(suite_path, session, id, name, node_id, false);

        let parent = if source == NodeSource::Result {
            self.resolve_dynamic_parent(intended_parent, node_id, name)
        } else {
            intended_parent
        };
        self.reattach(node_id, parent);
        self.mark_lineage_present(node_id);

        if let Some(node) = self.nodes.get_mut(node_id) {
            node.is_stale = false;
            if range.is_some() && (source == NodeSource::Outline || node.range.is_none()) {
                node.range = range;
            }
        }

        self.fire_tree_changed(node_id, false);
        self.emit(|listener, model| listener.group_discovered(model, node_id));
        Some(node_id)
    }

    /// Reconcile a discovered test into the tree. `has_started` marks this
    /// discovery as a start event: the output log is cleared and the status
    /// moves to `Running`.
    #[allow(clippy::too_many_arguments)]
    pub fn test_discovered(
        &mut self,
        session: Option<&str>,
        suite_path: &str,
        source: NodeSource,
        id: i64,
        name: Option<&str>,
        group_id: Option<i64>,
        path: Option<&str>,
        range: Option<Range>,
        start_time: Option<u64>,
        has_started: bool,
    ) -> Option<NodeId> {
        let Some(data) = self.suites.get(suite_path) else {
            warn!("test {id} discovered for unknown suite {suite_path}; dropping");
            return None;
        };
        let suite_root = data.suite();
        let reused = name.and_then(|name| data.reuse_matching_test(name));
        let intended_parent = group_id
            .and_then(|gid| data.group_for_id(session, gid))
            .unwrap_or(suite_root);

        let node_id = reused.unwrap_or_else(|| {
            self.nodes.insert(Node::new(
                NodeKind::Test {
                    name: name.map(SmolStr::new),
                    status: TestStatus::Unknown,
                    output: Vec::new(),
                    start_time: None,
                },
                SmolStr::new(path.unwrap_or(suite_path)),
                source,
            ))
        });
        self.store_in_registry(suite_path, session, id, name, node_id, true);

        let parent = if source == NodeSource::Result {
            self.resolve_dynamic_parent(intended_parent, node_id, name)
        } else {
            intended_parent
        };
        self.reattach(node_id, parent);
        self.mark_lineage_present(node_id);

        let previous_range = self.nodes.get(node_id).and_then(|node| node.range);
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.is_stale = false;
            if let Some(path) = path {
                if node.path != path {
                    node.path = SmolStr::new(path);
                }
            }
            match source {
                NodeSource::Outline => {
                    if range.is_some() {
                        node.range = range;
                    }
                }
                NodeSource::Result => {
                    if node.range.is_none() {
                        node.range = range;
                    }
                }
            }
            if let NodeKind::Test {
                status,
                output,
                start_time: recorded_start,
                ..
            } = &mut node.kind
            {
                if start_time.is_some() {
                    *recorded_start = start_time;
                }
                if has_started {
                    output.clear();
                    *status = TestStatus::Running;
                }
            }
        }

        // An outline edit moved this test: children discovered at runtime
        // whose ranges still point at the old location follow it.
        if source == NodeSource::Outline && range.is_some() && range != previous_range {
            let children = self
                .nodes
                .get(node_id)
                .map(|node| node.children.clone())
                .unwrap_or_default();
            for child in children {
                if let Some(child_node) = self.nodes.get_mut(child) {
                    if child_node.source == NodeSource::Result
                        && (child_node.range.is_none() || child_node.range == previous_range)
                    {
                        child_node.range = range;
                    }
                }
            }
        }

        self.fire_tree_changed(node_id, false);
        self.emit(|listener, model| listener.test_discovered(model, node_id));
        if has_started {
            self.emit(|listener, model| listener.test_started(model, node_id));
        }
        Some(node_id)
    }

    /// Record a test's completion and recompute ancestor aggregates.
    pub fn test_done(
        &mut self,
        session: Option<&str>,
        suite_path: &str,
        test_id: i64,
        result: Option<TestResult>,
        end_time: Option<u64>,
    ) {
        let Some(data) = self.suites.get(suite_path) else {
            warn!("testDone for unknown suite {suite_path}; dropping");
            return;
        };
        let Some(node_id) = data.test_for_id(session, test_id) else {
            warn!("testDone for unknown test {test_id} in {suite_path}; dropping");
            return;
        };
        if let Some(node) = self.nodes.get_mut(node_id) {
            if let NodeKind::Test {
                status, start_time, ..
            } = &mut node.kind
            {
                *status = result.map_or(TestStatus::Unknown, TestResult::status);
                if let (Some(end), Some(start)) = (end_time, *start_time) {
                    node.duration = Some(Duration::from_millis(end.saturating_sub(start)));
                }
            }
        }
        self.fire_tree_changed(node_id, false);
        self.update_test_count_labels(node_id, false, CountDirection::Up);
        self.emit(|listener, model| listener.test_done(model, node_id));
    }

    /// Complete a suite run: prune nodes the run never touched, reset
    /// anything stranded in `Running`, recompute the suite's aggregates.
    pub fn suite_done(&mut self, _session: Option<&str>, suite_path: &str) {
        let Some(data) = self.suites.get(suite_path) else {
            warn!("suiteDone for unknown suite {suite_path}; dropping");
            return;
        };
        let root = data.suite();
        self.remove_all_potentially_deleted_nodes(suite_path);
        self.reset_running(root);
        self.update_test_count_labels(root, false, CountDirection::Down);
        self.emit(|listener, model| listener.suite_done(model, root));
    }

    /// Append a `print` record to a test's output log.
    pub fn test_output(&mut self, node_id: NodeId, message: &str) {
        let Some(node) = self.nodes.get_mut(node_id) else {
            warn!("output for unknown node; dropping");
            return;
        };
        if let NodeKind::Test { output, .. } = &mut node.kind {
            output.push(OutputEvent::Print {
                message: message.to_string(),
            });
        }
        let message = message.to_string();
        self.emit(|listener, model| listener.test_output(model, node_id, &message));
    }

    /// Append an `error` record to a test's output log.
    pub fn test_error_output(
        &mut self,
        node_id: NodeId,
        message: &str,
        stack_trace: &str,
        is_failure: bool,
    ) {
        let Some(node) = self.nodes.get_mut(node_id) else {
            warn!("error output for unknown node; dropping");
            return;
        };
        if let NodeKind::Test { output, .. } = &mut node.kind {
            output.push(OutputEvent::Error {
                message: message.to_string(),
                stack_trace: stack_trace.to_string(),
                is_failure,
            });
        }
        let message = message.to_string();
        let stack_trace = stack_trace.to_string();
        self.emit(|listener, model| {
            listener.test_error_output(model, node_id, &message, &stack_trace, is_failure);
        });
    }

    /// Recompute cached counts for `node`, downward through descendants or
    /// upward through ancestors. Change events fire only when a value
    /// actually changed, unless `force` is set.
    pub fn update_test_count_labels(
        &mut self,
        node: NodeId,
        force: bool,
        direction: CountDirection,
    ) {
        match direction {
            CountDirection::Down => {
                let children = self
                    .nodes
                    .get(node)
                    .map(|n| n.children.clone())
                    .unwrap_or_default();
                for child in children {
                    self.update_test_count_labels(child, force, CountDirection::Down);
                }
                self.recompute_counts(node, force);
            }
            CountDirection::Up => {
                self.recompute_counts(node, force);
                if let Some(parent) = self.nodes.get(node).and_then(|n| n.parent) {
                    self.update_test_count_labels(parent, force, CountDirection::Up);
                }
            }
        }
    }

    /// Remove every node in the suite still flagged as potentially deleted.
    pub fn remove_all_potentially_deleted_nodes(&mut self, suite_path: &str) {
        let Some(root) = self.suites.get(suite_path).map(SuiteData::suite) else {
            return;
        };
        let mut doomed = Vec::new();
        self.collect_potentially_deleted(root, &mut doomed);
        for id in doomed {
            self.remove_subtree(suite_path, id);
        }
    }

    fn collect_potentially_deleted(&self, id: NodeId, out: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get(id) else { return };
        for &child in &node.children {
            if self
                .nodes
                .get(child)
                .is_some_and(|n| n.is_potentially_deleted)
            {
                out.push(child);
            } else {
                self.collect_potentially_deleted(child, out);
            }
        }
    }

    fn remove_subtree(&mut self, suite_path: &str, id: NodeId) {
        let parent = self.nodes.get(id).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.retain(|&child| child != id);
            }
        }
        self.remove_subtree_nodes(suite_path, id);
    }

    fn remove_subtree_nodes(&mut self, suite_path: &str, id: NodeId) {
        let children = self
            .nodes
            .get(id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            self.remove_subtree_nodes(suite_path, child);
        }
        if let Some(data) = self.suites.get_mut(suite_path) {
            data.forget_node(id);
        }
        // The node is still resolvable while the removal event dispatches.
        self.fire_tree_changed(id, true);
        self.nodes.remove(id);
    }

    fn reset_running(&mut self, id: NodeId) {
        let children = self
            .nodes
            .get(id)
            .map(|n| n.children.clone())
            .unwrap_or_default();
        for child in children {
            self.reset_running(child);
        }
        let reset = self.nodes.get_mut(id).is_some_and(|node| {
            if let NodeKind::Test { status, .. } = &mut node.kind {
                if *status == TestStatus::Running {
                    *status = TestStatus::Unknown;
                    return true;
                }
            }
            false
        });
        if reset {
            self.fire_tree_changed(id, false);
        }
    }

    fn store_in_registry(
        &mut self,
        suite_path: &str,
        session: Option<&str>,
        id: i64,
        name: Option<&str>,
        node_id: NodeId,
        is_test: bool,
    ) {
        let retained = self.config.retained_sessions;
        let Some(data) = self.suites.get_mut(suite_path) else {
            return;
        };
        if let Some(session) = session {
            data.note_session(session, retained);
        }
        if is_test {
            data.store_test(session, id, name, node_id);
        } else {
            data.store_group(session, id, name, node_id);
        }
    }

    /// Dynamic re-parenting: when no child of the intended parent carries
    /// this exact name, a parameterized runtime name lands under the first
    /// statically known template that accepts it.
    fn resolve_dynamic_parent(
        &self,
        intended: NodeId,
        node_id: NodeId,
        name: Option<&str>,
    ) -> NodeId {
        let Some(name) = name else { return intended };
        let Some(parent_node) = self.nodes.get(intended) else {
            return intended;
        };
        for &child in &parent_node.children {
            if child == node_id {
                continue;
            }
            if self
                .nodes
                .get(child)
                .and_then(Node::name)
                .is_some_and(|candidate| candidate.as_str() == name)
            {
                return intended;
            }
        }
        for &child in &parent_node.children {
            if child == node_id {
                continue;
            }
            let Some(child_node) = self.nodes.get(child) else {
                continue;
            };
            let Some(candidate) = child_node.name() else {
                continue;
            };
            let kind = match child_node.kind {
                NodeKind::Group { .. } => TemplateKind::Group,
                NodeKind::Test { .. } => TemplateKind::Test,
                NodeKind::Suite => continue,
            };
            if matcher::matches_template(candidate, name, kind) {
                return child;
            }
        }
        intended
    }

    /// Detach from the previous parent (notifying it, since its aggregates
    /// are now wrong) and attach under the new one. Runs to completion within
    /// one handler invocation so observers never see an orphaned node.
    fn reattach(&mut self, node_id: NodeId, parent: NodeId) {
        if parent == node_id {
            return;
        }
        let old_parent = self.nodes.get(node_id).and_then(|n| n.parent);
        if old_parent != Some(parent) {
            if let Some(old) = old_parent {
                if let Some(old_node) = self.nodes.get_mut(old) {
                    old_node.children.retain(|&child| child != node_id);
                }
                self.fire_tree_changed(old, false);
            }
        }
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            if !parent_node.children.contains(&node_id) {
                parent_node.children.push(node_id);
            }
        }
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.parent = Some(parent);
        }
    }

    /// Touching a node proves it (and everything above it) still exists.
    fn mark_lineage_present(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(node) = self.nodes.get_mut(id) else { break };
            node.is_potentially_deleted = false;
            current = node.parent;
        }
    }

    fn recompute_counts(&mut self, id: NodeId, force: bool) {
        let Some(node) = self.nodes.get(id) else { return };
        let (count, pass, skip) = if node.children.is_empty() {
            match node.status() {
                Some(status) => (
                    1,
                    u32::from(status == TestStatus::Passed),
                    u32::from(status == TestStatus::Skipped),
                ),
                None => (0, 0, 0),
            }
        } else {
            node.children
                .iter()
                .filter_map(|&child| self.nodes.get(child))
                .fold((0, 0, 0), |acc, child| {
                    (
                        acc.0 + child.test_count,
                        acc.1 + child.test_count_pass,
                        acc.2 + child.test_count_skip,
                    )
                })
        };
        let changed = {
            let Some(node) = self.nodes.get_mut(id) else {
                return;
            };
            let changed = node.test_count != count
                || node.test_count_pass != pass
                || node.test_count_skip != skip;
            node.test_count = count;
            node.test_count_pass = pass;
            node.test_count_skip = skip;
            changed
        };
        if changed || force {
            self.fire_tree_changed(id, false);
        }
    }

    fn fire_tree_changed(&mut self, node: NodeId, removed: bool) {
        self.emit(|listener, model| listener.tree_changed(model, node, removed));
    }

    fn emit(&mut self, dispatch: impl Fn(&mut dyn ModelListener, &TestModel)) {
        if self.listeners.is_empty() {
            return;
        }
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in &mut listeners {
            dispatch(listener.as_mut(), self);
        }
        self.listeners = listeners;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;
    use std::cell::RefCell;
    use std::rc::Rc;

    const SUITE: &str = "/ws/a_test.st";

    fn model() -> TestModel {
        TestModel::default()
    }

    fn discover_test(
        model: &mut TestModel,
        session: &str,
        id: i64,
        name: &str,
        group_id: Option<i64>,
        started: bool,
    ) -> NodeId {
        model
            .test_discovered(
                Some(session),
                SUITE,
                NodeSource::Result,
                id,
                Some(name),
                group_id,
                None,
                None,
                Some(0),
                started,
            )
            .expect("test discovered")
    }

    fn assert_count_invariant(model: &TestModel, id: NodeId) {
        let node = model.node(id).unwrap();
        if node.children.is_empty() {
            return;
        }
        let sums = node
            .children
            .iter()
            .map(|&c| model.node(c).unwrap())
            .fold((0, 0, 0), |acc, child| {
                (
                    acc.0 + child.test_count,
                    acc.1 + child.test_count_pass,
                    acc.2 + child.test_count_skip,
                )
            });
        assert_eq!(
            (node.test_count, node.test_count_pass, node.test_count_skip),
            sums
        );
        for &child in &node.children {
            assert_count_invariant(model, child);
        }
    }

    #[test]
    fn scenario_a_single_passing_test() {
        let mut model = model();
        let suite = model.suite_discovered(Some("s1"), SUITE);
        model.flag_suite_start(SUITE, true);
        model
            .group_discovered(
                Some("s1"),
                SUITE,
                NodeSource::Result,
                10,
                Some("G"),
                None,
                None,
            )
            .unwrap();
        let test = discover_test(&mut model, "s1", 100, "t1", Some(10), true);
        assert_eq!(model.node(test).unwrap().status(), Some(TestStatus::Running));
        model.test_done(Some("s1"), SUITE, 100, Some(TestResult::Success), Some(5));

        let suite_node = model.node(suite).unwrap();
        assert_eq!(suite_node.test_count, 1);
        assert_eq!(suite_node.test_count_pass, 1);
        let group = model.suite(SUITE).unwrap().reuse_matching_group("G").unwrap();
        assert_eq!(model.description(group).unwrap(), "1/1 passed");
        assert_count_invariant(&model, suite);
    }

    #[test]
    fn scenario_b_two_sessions_share_one_node() {
        let mut model = model();
        let suite = model.suite_discovered(Some("s1"), SUITE);
        model.suite_discovered(Some("s2"), SUITE);
        let first = discover_test(&mut model, "s1", 100, "t1", None, true);
        let second = discover_test(&mut model, "s2", 3, "t1", None, true);
        assert_eq!(first, second);
        assert_eq!(model.node(suite).unwrap().children.len(), 1);
    }

    #[test]
    fn scenario_c_untouched_test_is_pruned() {
        let removed = Rc::new(RefCell::new(Vec::new()));

        struct Removals(Rc<RefCell<Vec<NodeId>>>);
        impl ModelListener for Removals {
            fn tree_changed(&mut self, _model: &TestModel, node: NodeId, removed: bool) {
                if removed {
                    self.0.borrow_mut().push(node);
                }
            }
        }

        let mut model = model();
        model.add_listener(Box::new(Removals(Rc::clone(&removed))));
        let suite = model.suite_discovered(Some("s1"), SUITE);
        let old = discover_test(&mut model, "s1", 100, "t_old", None, false);
        model.test_done(Some("s1"), SUITE, 100, Some(TestResult::Success), None);

        model.mark_all_as_potentially_deleted(SUITE);
        model.suite_done(Some("s2"), SUITE);

        assert!(model.node(old).is_none());
        assert!(model.node(suite).unwrap().children.is_empty());
        assert_eq!(*removed.borrow(), vec![old]);
        assert!(model
            .suite(SUITE)
            .unwrap()
            .reuse_matching_test("t_old")
            .is_none());
    }

    #[test]
    fn scenario_d_dynamic_test_lands_under_template() {
        let mut model = model();
        model.suite_discovered(None, SUITE);
        // Outline knows a parameterized template group "loop" inside "G".
        model
            .group_discovered(None, SUITE, NodeSource::Outline, 1, Some("G"), None, None)
            .unwrap();
        let template = model
            .group_discovered(
                None,
                SUITE,
                NodeSource::Outline,
                2,
                Some("loop"),
                Some(1),
                None,
            )
            .unwrap();
        // Runtime reports the expanded instance directly under "G".
        model
            .group_discovered(
                Some("s1"),
                SUITE,
                NodeSource::Result,
                20,
                Some("G"),
                None,
                None,
            )
            .unwrap();
        let dynamic = model
            .test_discovered(
                Some("s1"),
                SUITE,
                NodeSource::Result,
                100,
                Some("loop 2"),
                Some(20),
                None,
                None,
                None,
                true,
            )
            .unwrap();
        assert_eq!(model.node(dynamic).unwrap().parent, Some(template));
        assert!(model.node(template).unwrap().children.contains(&dynamic));
    }

    #[test]
    fn scenario_e_error_collapses_to_failed() {
        let mut model = model();
        model.suite_discovered(Some("s1"), SUITE);
        let test = discover_test(&mut model, "s1", 100, "t1", None, true);
        model.test_done(Some("s1"), SUITE, 100, Some(TestResult::Error), None);
        assert_eq!(model.node(test).unwrap().status(), Some(TestStatus::Failed));
    }

    #[test]
    fn replayed_discovery_is_idempotent() {
        let mut model = model();
        let suite = model.suite_discovered(Some("s1"), SUITE);
        for session in ["s1", "s2"] {
            model.suite_discovered(Some(session), SUITE);
            model
                .group_discovered(
                    Some(session),
                    SUITE,
                    NodeSource::Result,
                    10,
                    Some("G"),
                    None,
                    None,
                )
                .unwrap();
            discover_test(&mut model, session, 100, "t1", Some(10), true);
            discover_test(&mut model, session, 101, "t2", Some(10), true);
        }
        let suite_node = model.node(suite).unwrap();
        assert_eq!(suite_node.children.len(), 1);
        let group = suite_node.children[0];
        assert_eq!(model.node(group).unwrap().children.len(), 2);
    }

    #[test]
    fn duration_comes_from_start_and_end_times() {
        let mut model = model();
        model.suite_discovered(Some("s1"), SUITE);
        let test = model
            .test_discovered(
                Some("s1"),
                SUITE,
                NodeSource::Result,
                100,
                Some("t1"),
                None,
                None,
                None,
                Some(1_000),
                true,
            )
            .unwrap();
        model.test_done(Some("s1"), SUITE, 100, Some(TestResult::Success), Some(1_450));
        assert_eq!(
            model.node(test).unwrap().duration,
            Some(Duration::from_millis(450))
        );
    }

    #[test]
    fn start_event_clears_previous_output() {
        let mut model = model();
        model.suite_discovered(Some("s1"), SUITE);
        let test = discover_test(&mut model, "s1", 100, "t1", None, true);
        model.test_output(test, "hello");
        model.test_done(Some("s1"), SUITE, 100, Some(TestResult::Failure), None);
        // Re-run: the start event resets the log and the status.
        let again = discover_test(&mut model, "s2", 9, "t1", None, true);
        assert_eq!(again, test);
        let node = model.node(test).unwrap();
        assert_eq!(node.status(), Some(TestStatus::Running));
        if let NodeKind::Test { output, .. } = &node.kind {
            assert!(output.is_empty());
        } else {
            panic!("expected a test node");
        }
    }

    #[test]
    fn suite_done_resets_stranded_running_tests() {
        let mut model = model();
        model.suite_discovered(Some("s1"), SUITE);
        let test = discover_test(&mut model, "s1", 100, "t1", None, true);
        assert_eq!(model.node(test).unwrap().status(), Some(TestStatus::Running));
        model.suite_done(Some("s1"), SUITE);
        assert_eq!(model.node(test).unwrap().status(), Some(TestStatus::Unknown));
    }

    #[test]
    fn outline_range_change_propagates_to_dynamic_children() {
        let mut model = model();
        model.suite_discovered(None, SUITE);
        let old_range = Range::single_line(4, 2);
        let template = model
            .test_discovered(
                None,
                SUITE,
                NodeSource::Outline,
                1,
                Some("loop $i"),
                None,
                None,
                Some(old_range),
                None,
                false,
            )
            .unwrap();
        model.suite_discovered(Some("s1"), SUITE);
        let child = model
            .test_discovered(
                Some("s1"),
                SUITE,
                NodeSource::Result,
                100,
                Some("loop 2"),
                None,
                None,
                Some(old_range),
                None,
                true,
            )
            .unwrap();
        assert_eq!(model.node(child).unwrap().parent, Some(template));

        // The file was edited; the outline now reports the template lower.
        let new_range = Range::single_line(9, 2);
        model
            .test_discovered(
                None,
                SUITE,
                NodeSource::Outline,
                1,
                Some("loop $i"),
                None,
                None,
                Some(new_range),
                None,
                false,
            )
            .unwrap();
        assert_eq!(model.node(child).unwrap().range, Some(new_range));
    }

    #[test]
    fn composite_status_matches_rollup() {
        let mut model = model();
        let suite = model.suite_discovered(Some("s1"), SUITE);
        discover_test(&mut model, "s1", 100, "t1", None, true);
        discover_test(&mut model, "s1", 101, "t2", None, true);
        model.test_done(Some("s1"), SUITE, 100, Some(TestResult::Success), None);
        model.test_done(Some("s1"), SUITE, 101, Some(TestResult::Failure), None);
        assert_eq!(
            model.highest_child_status(suite, true),
            TestStatus::Failed
        );
    }

    #[test]
    fn skipped_tests_are_excluded_from_totals_by_default() {
        let mut model = model();
        let suite = model.suite_discovered(Some("s1"), SUITE);
        discover_test(&mut model, "s1", 100, "t1", None, true);
        discover_test(&mut model, "s1", 101, "t2", None, true);
        model.test_done(Some("s1"), SUITE, 100, Some(TestResult::Success), None);
        model.test_done(Some("s1"), SUITE, 101, Some(TestResult::Skipped), None);
        assert_eq!(model.description(suite).unwrap(), "1/1 passed");
        assert_count_invariant(&model, suite);
    }

    #[test]
    fn unknown_lookups_never_panic() {
        let mut model = model();
        model.test_done(Some("s1"), "/nope.st", 1, Some(TestResult::Success), None);
        model.suite_done(Some("s1"), "/nope.st");
        model.flag_suite_start("/nope.st", true);
        model.suite_discovered(Some("s1"), SUITE);
        model.test_done(Some("s1"), SUITE, 999, None, None);
    }

    fn render(model: &TestModel, id: NodeId, depth: usize, out: &mut String) {
        let node = model.node(id).unwrap();
        let label = if node.is_suite() {
            node.path.clone()
        } else {
            model.label(id)
        };
        let status = node
            .status()
            .unwrap_or_else(|| model.highest_child_status(id, false));
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{label} {status:?}\n"));
        for &child in &node.children {
            render(model, child, depth + 1, out);
        }
    }

    #[test]
    fn rendered_tree_after_mixed_run() {
        let mut model = model();
        model.suite_discovered(Some("s1"), SUITE);
        model
            .group_discovered(Some("s1"), SUITE, NodeSource::Result, 1, Some("G"), None, None)
            .unwrap();
        discover_test(&mut model, "s1", 10, "t1", Some(1), true);
        discover_test(&mut model, "s1", 11, "t2", Some(1), true);
        model.test_done(Some("s1"), SUITE, 10, Some(TestResult::Success), None);
        model.test_done(Some("s1"), SUITE, 11, Some(TestResult::Failure), None);
        model.suite_done(Some("s1"), SUITE);

        let suite = model.suite(SUITE).unwrap().suite();
        let mut out = String::new();
        render(&model, suite, 0, &mut out);
        expect![[r#"
            /ws/a_test.st Failed
              G Failed
                t1 Passed
                t2 Failed
        "#]]
        .assert_eq(&out);
    }

    #[test]
    fn listener_hooks_fire_in_mutation_order() {
        let log = Rc::new(RefCell::new(Vec::new()));

        struct Log(Rc<RefCell<Vec<&'static str>>>);
        impl ModelListener for Log {
            fn suite_discovered(&mut self, _: &TestModel, _: NodeId) {
                self.0.borrow_mut().push("suite");
            }
            fn test_discovered(&mut self, _: &TestModel, _: NodeId) {
                self.0.borrow_mut().push("discovered");
            }
            fn test_started(&mut self, _: &TestModel, _: NodeId) {
                self.0.borrow_mut().push("started");
            }
            fn test_done(&mut self, _: &TestModel, _: NodeId) {
                self.0.borrow_mut().push("done");
            }
            fn suite_done(&mut self, _: &TestModel, _: NodeId) {
                self.0.borrow_mut().push("suite_done");
            }
        }

        let mut model = model();
        model.add_listener(Box::new(Log(Rc::clone(&log))));
        model.suite_discovered(Some("s1"), SUITE);
        discover_test(&mut model, "s1", 100, "t1", None, true);
        model.test_done(Some("s1"), SUITE, 100, Some(TestResult::Success), None);
        model.suite_done(Some("s1"), SUITE);
        assert_eq!(
            log.borrow().as_slice(),
            &["suite", "discovered", "started", "done", "suite_done"]
        );
    }
}
