//! Tree nodes: the suite/group/test forest and its derived state.
//!
//! Nodes live in an arena owned by the model; `children` is the single
//! owning direction, `parent` is a plain back-index into the same arena.

use std::time::Duration;

use smol_str::SmolStr;

/// Fallback display name for nodes the runner reported without a name.
pub const UNNAMED_LABEL: &str = "<unnamed>";

/// Handle to a node in the model's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

/// Zero-based line/character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    /// Zero-based line.
    pub line: u32,
    /// Zero-based character offset within the line.
    pub character: u32,
}

/// Zero-based source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Range {
    /// Inclusive start.
    pub start: Position,
    /// Exclusive end.
    pub end: Position,
}

impl Range {
    /// A synthetic range covering a single point on one line.
    #[must_use]
    pub fn single_line(line: u32, character: u32) -> Self {
        let position = Position { line, character };
        Self {
            start: position,
            end: position,
        }
    }
}

/// Provenance of a node's creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSource {
    /// Statically discovered from a source-file outline.
    Outline,
    /// First seen in a runtime notification.
    Result,
}

/// Outcome of a test. The derived `Ord` is the rollup severity order used by
/// [`highest status`](crate::model::TestModel::highest_child_status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestStatus {
    /// No outcome observed yet.
    #[default]
    Unknown,
    /// Explicitly skipped.
    Skipped,
    /// Completed successfully.
    Passed,
    /// Started but not yet completed.
    Running,
    /// Failed or errored (the two collapse to one status).
    Failed,
}

/// One print or error record attached to a test, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A `print` notification.
    Print {
        /// The printed message.
        message: String,
    },
    /// An `error` notification.
    Error {
        /// The error text.
        message: String,
        /// The accompanying stack trace, possibly empty.
        stack_trace: String,
        /// Whether the runner classified this as a test failure.
        is_failure: bool,
    },
}

/// Kind-specific payload, dispatched by pattern match.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Root of one file's tree.
    Suite,
    /// A named container of tests and sub-groups.
    Group {
        /// Display name; phantom wrappers never reach the model, but outline
        /// groups can still be unnamed.
        name: Option<SmolStr>,
    },
    /// A leaf runnable unit (or a template that acquired dynamic children).
    Test {
        /// Display name.
        name: Option<SmolStr>,
        /// Last explicitly assigned status.
        status: TestStatus,
        /// Ordered print/error log, cleared on each start.
        output: Vec<OutputEvent>,
        /// Runner-reported start time in milliseconds, if any.
        start_time: Option<u64>,
    },
}

/// One node of the reconciled tree.
#[derive(Debug, Clone)]
pub struct Node {
    /// Suite/Group/Test discriminant and payload.
    pub kind: NodeKind,
    /// File the node belongs to.
    pub path: SmolStr,
    /// Back-reference; `None` for suites.
    pub parent: Option<NodeId>,
    /// Owned, ordered children.
    pub children: Vec<NodeId>,
    /// Provenance of the node's creation.
    pub source: NodeSource,
    /// Set at run start, cleared when the node is touched again.
    pub is_stale: bool,
    /// Set before a whole-suite run; still set at run end means removal.
    pub is_potentially_deleted: bool,
    /// Source range, when known.
    pub range: Option<Range>,
    /// Elapsed time, set only on completion.
    pub duration: Option<Duration>,
    /// Cached aggregate: total descendant tests (a leaf test counts 1).
    pub test_count: u32,
    /// Cached aggregate: passed descendant tests.
    pub test_count_pass: u32,
    /// Cached aggregate: skipped descendant tests.
    pub test_count_skip: u32,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, path: SmolStr, source: NodeSource) -> Self {
        Self {
            kind,
            path,
            parent: None,
            children: Vec::new(),
            source,
            is_stale: false,
            is_potentially_deleted: false,
            range: None,
            duration: None,
            test_count: 0,
            test_count_pass: 0,
            test_count_skip: 0,
        }
    }

    /// The node's raw name, if it has one.
    #[must_use]
    pub fn name(&self) -> Option<&SmolStr> {
        match &self.kind {
            NodeKind::Suite => None,
            NodeKind::Group { name } => name.as_ref(),
            NodeKind::Test { name, .. } => name.as_ref(),
        }
    }

    /// Last explicitly assigned status; `None` for suites and groups.
    #[must_use]
    pub fn status(&self) -> Option<TestStatus> {
        match &self.kind {
            NodeKind::Test { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this node is a suite root.
    #[must_use]
    pub fn is_suite(&self) -> bool {
        matches!(self.kind, NodeKind::Suite)
    }

    /// Whether this node is a group.
    #[must_use]
    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group { .. })
    }

    /// Whether this node is a test.
    #[must_use]
    pub fn is_test(&self) -> bool {
        matches!(self.kind, NodeKind::Test { .. })
    }

    /// `"{pass}/{total} passed"`. Skipped tests are excluded from the total
    /// unless `count_skipped` is set.
    #[must_use]
    pub fn description(&self, count_skipped: bool) -> String {
        let total = if count_skipped {
            self.test_count
        } else {
            self.test_count.saturating_sub(self.test_count_skip)
        };
        format!("{}/{} passed", self.test_count_pass, total)
    }
}

/// Slab arena holding every node of every suite; freed slots are reused.
#[derive(Debug, Default)]
pub(crate) struct NodeArena {
    slots: Vec<Option<Node>>,
    free: Vec<u32>,
}

impl NodeArena {
    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(node);
            NodeId(index)
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Some(node));
            NodeId(index)
        }
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.0 as usize)?;
        let node = slot.take();
        if node.is_some() {
            self.free.push(id.0);
        }
        node
    }

    /// Display label: the name with any leading `"<parent name> "` stripped,
    /// so nested parameterized names don't repeat their ancestor's text.
    pub(crate) fn label(&self, id: NodeId) -> SmolStr {
        let Some(node) = self.get(id) else {
            return SmolStr::new(UNNAMED_LABEL);
        };
        let Some(name) = node.name() else {
            return SmolStr::new(UNNAMED_LABEL);
        };
        let parent_name = node
            .parent
            .and_then(|parent| self.get(parent))
            .and_then(Node::name);
        if let Some(parent_name) = parent_name {
            if !parent_name.is_empty() {
                let prefix = format!("{parent_name} ");
                if let Some(stripped) = name.strip_prefix(prefix.as_str()) {
                    if !stripped.is_empty() {
                        return SmolStr::new(stripped);
                    }
                }
            }
        }
        name.clone()
    }

    /// Maximum status among descendant leaf tests (self included when the
    /// node is itself a leaf test). Skipped is filtered out unless requested
    /// or the node is a suite whose only observed status is Skipped.
    pub(crate) fn highest_status(&self, id: NodeId, include_skipped: bool) -> TestStatus {
        let mut statuses = Vec::new();
        self.collect_statuses(id, &mut statuses);
        let is_suite = self.get(id).is_some_and(Node::is_suite);
        let only_skipped =
            !statuses.is_empty() && statuses.iter().all(|s| *s == TestStatus::Skipped);
        let keep_skipped = include_skipped || (is_suite && only_skipped);
        statuses
            .into_iter()
            .filter(|s| keep_skipped || *s != TestStatus::Skipped)
            .max()
            .unwrap_or(TestStatus::Unknown)
    }

    fn collect_statuses(&self, id: NodeId, out: &mut Vec<TestStatus>) {
        let Some(node) = self.get(id) else { return };
        if node.children.is_empty() {
            if let NodeKind::Test { status, .. } = &node.kind {
                out.push(*status);
            }
            return;
        }
        for &child in &node.children {
            self.collect_statuses(child, out);
        }
    }
}
