//! Static outline seeding.
//!
//! The outline provider is an external collaborator (an analyzer or language
//! server); it supplies the statically known structure of a suite file. The
//! engine uses it two ways: to seed accurate ranges for runtime-reported
//! locations, and to feed the static half of the reconciliation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use runlens_model::{NodeSource, Range, TestModel};
use smol_str::SmolStr;

/// Kind of an outline element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineKind {
    /// A group-like construct.
    Group,
    /// A test declaration.
    Test,
    /// Anything else (containers the walk passes through).
    Other,
}

/// One element of a file's statically discovered structure.
#[derive(Debug, Clone)]
pub struct OutlineNode {
    /// Display name as written in the source.
    pub name: SmolStr,
    /// Element kind.
    pub kind: OutlineKind,
    /// Zero-based range of the whole construct.
    pub range: Range,
    /// Nested elements.
    pub children: Vec<OutlineNode>,
}

/// Supplies outlines for suite files.
pub trait OutlineProvider {
    /// The outline for `path`, or `None` if not (yet) available.
    fn outline_for(&self, path: &str) -> Option<OutlineNode>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Poll the provider until an outline appears, the timeout elapses, or the
/// caller cancels; resolves to `None` rather than blocking indefinitely.
pub fn wait_for_outline(
    provider: &dyn OutlineProvider,
    path: &str,
    timeout: Duration,
    cancel: &AtomicBool,
) -> Option<OutlineNode> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        if let Some(outline) = provider.outline_for(path) {
            return Some(outline);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Find the range of the outline element declared at `line` (zero-based).
/// The statically known range spans the whole construct, which is more
/// accurate than anything the runner reports.
#[must_use]
pub fn range_at_line(outline: &OutlineNode, line: u32) -> Option<Range> {
    if outline.kind != OutlineKind::Other && outline.range.start.line == line {
        return Some(outline.range);
    }
    outline
        .children
        .iter()
        .find_map(|child| range_at_line(child, line))
}

/// Feed a file's outline into the model as `Outline`-sourced discovery. Ids
/// are generated, stable within one walk; the registry reuses nodes by name
/// across walks. Pruning of removed tests stays tied to suite runs, so an
/// outline refresh never deletes runtime-only dynamic nodes.
pub fn sync_suite_from_outline(model: &mut TestModel, path: &str, outline: &OutlineNode) {
    model.suite_discovered(None, path);
    let mut next_id = 1;
    for child in &outline.children {
        walk(model, path, child, None, &mut next_id);
    }
}

fn walk(
    model: &mut TestModel,
    path: &str,
    node: &OutlineNode,
    parent_group: Option<i64>,
    next_id: &mut i64,
) {
    match node.kind {
        OutlineKind::Group => {
            let id = *next_id;
            *next_id += 1;
            model.group_discovered(
                None,
                path,
                NodeSource::Outline,
                id,
                Some(node.name.as_str()),
                parent_group,
                Some(node.range),
            );
            for child in &node.children {
                walk(model, path, child, Some(id), next_id);
            }
        }
        OutlineKind::Test => {
            let id = *next_id;
            *next_id += 1;
            model.test_discovered(
                None,
                path,
                NodeSource::Outline,
                id,
                Some(node.name.as_str()),
                parent_group,
                Some(path),
                Some(node.range),
                None,
                false,
            );
            // Nested declarations inside a test body stay at the test's
            // level; only runtime matching nests under templates.
            for child in &node.children {
                walk(model, path, child, parent_group, next_id);
            }
        }
        OutlineKind::Other => {
            for child in &node.children {
                walk(model, path, child, parent_group, next_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlens_model::Position;

    struct Fixed(Option<OutlineNode>);
    impl OutlineProvider for Fixed {
        fn outline_for(&self, _path: &str) -> Option<OutlineNode> {
            self.0.clone()
        }
    }

    fn range(line: u32) -> Range {
        Range {
            start: Position { line, character: 0 },
            end: Position {
                line,
                character: 20,
            },
        }
    }

    fn sample_outline() -> OutlineNode {
        OutlineNode {
            name: SmolStr::new("a_test.st"),
            kind: OutlineKind::Other,
            range: range(0),
            children: vec![OutlineNode {
                name: SmolStr::new("G"),
                kind: OutlineKind::Group,
                range: range(2),
                children: vec![
                    OutlineNode {
                        name: SmolStr::new("t1"),
                        kind: OutlineKind::Test,
                        range: range(3),
                        children: Vec::new(),
                    },
                    OutlineNode {
                        name: SmolStr::new("t2"),
                        kind: OutlineKind::Test,
                        range: range(7),
                        children: Vec::new(),
                    },
                ],
            }],
        }
    }

    #[test]
    fn wait_returns_immediately_when_available() {
        let provider = Fixed(Some(sample_outline()));
        let cancel = AtomicBool::new(false);
        let outline = wait_for_outline(
            &provider,
            "/ws/a_test.st",
            Duration::from_millis(200),
            &cancel,
        );
        assert!(outline.is_some());
    }

    #[test]
    fn wait_times_out_as_not_found() {
        let provider = Fixed(None);
        let cancel = AtomicBool::new(false);
        let started = Instant::now();
        let outline = wait_for_outline(
            &provider,
            "/ws/a_test.st",
            Duration::from_millis(60),
            &cancel,
        );
        assert!(outline.is_none());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn wait_honors_cancellation() {
        let provider = Fixed(None);
        let cancel = AtomicBool::new(true);
        let outline = wait_for_outline(
            &provider,
            "/ws/a_test.st",
            Duration::from_secs(60),
            &cancel,
        );
        assert!(outline.is_none());
    }

    #[test]
    fn range_lookup_finds_nested_nodes() {
        let outline = sample_outline();
        assert_eq!(range_at_line(&outline, 3), Some(range(3)));
        assert_eq!(range_at_line(&outline, 7), Some(range(7)));
        assert_eq!(range_at_line(&outline, 99), None);
    }

    #[test]
    fn sync_builds_the_static_tree() {
        let mut model = TestModel::default();
        sync_suite_from_outline(&mut model, "/ws/a_test.st", &sample_outline());
        let suite = model.suite("/ws/a_test.st").unwrap();
        let group = suite.reuse_matching_group("G").unwrap();
        let t1 = suite.reuse_matching_test("t1").unwrap();
        assert_eq!(model.node(t1).unwrap().parent, Some(group));
        assert_eq!(model.node(group).unwrap().children.len(), 2);
        assert_eq!(model.node(t1).unwrap().range, Some(range(3)));
    }

    #[test]
    fn repeated_sync_reuses_nodes() {
        let mut model = TestModel::default();
        sync_suite_from_outline(&mut model, "/ws/a_test.st", &sample_outline());
        sync_suite_from_outline(&mut model, "/ws/a_test.st", &sample_outline());
        let suite = model.suite("/ws/a_test.st").unwrap();
        let root = model.node(suite.suite()).unwrap();
        assert_eq!(root.children.len(), 1);
        let group = root.children[0];
        assert_eq!(model.node(group).unwrap().children.len(), 2);
    }
}
