//! Per-suite indices mapping `(session, runtime-local id)` and stable names
//! to nodes.
//!
//! Runtime-local ids restart at small integers every run and are unique only
//! within one session, so the id index is keyed `"{session}_{id}"`. The name
//! index is what lets a re-run reuse nodes instead of duplicating them.

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;

use crate::node::NodeId;

/// Pseudo-session used for outline (static) discovery.
pub const STATIC_SESSION: &str = "static";

/// Registry for one suite path.
#[derive(Debug)]
pub struct SuiteData {
    pub(crate) suite: NodeId,
    pub(crate) path: SmolStr,
    groups_by_id: FxHashMap<SmolStr, NodeId>,
    groups_by_name: FxHashMap<SmolStr, NodeId>,
    tests_by_id: FxHashMap<SmolStr, NodeId>,
    tests_by_name: FxHashMap<SmolStr, NodeId>,
    /// Sessions seen for this suite, oldest first; bounds the id indices.
    sessions_seen: Vec<SmolStr>,
}

fn id_key(session: Option<&str>, local_id: i64) -> SmolStr {
    SmolStr::new(format!("{}_{local_id}", session.unwrap_or(STATIC_SESSION)))
}

impl SuiteData {
    pub(crate) fn new(suite: NodeId, path: SmolStr) -> Self {
        Self {
            suite,
            path,
            groups_by_id: FxHashMap::default(),
            groups_by_name: FxHashMap::default(),
            tests_by_id: FxHashMap::default(),
            tests_by_name: FxHashMap::default(),
            sessions_seen: Vec::new(),
        }
    }

    /// The suite's root node.
    #[must_use]
    pub fn suite(&self) -> NodeId {
        self.suite
    }

    /// The suite's file path.
    #[must_use]
    pub fn path(&self) -> &SmolStr {
        &self.path
    }

    /// Insert a group into both indices.
    pub fn store_group(
        &mut self,
        session: Option<&str>,
        local_id: i64,
        name: Option<&str>,
        node: NodeId,
    ) {
        self.groups_by_id.insert(id_key(session, local_id), node);
        if let Some(name) = name {
            self.groups_by_name.insert(SmolStr::new(name), node);
        }
    }

    /// Insert a test into both indices.
    pub fn store_test(
        &mut self,
        session: Option<&str>,
        local_id: i64,
        name: Option<&str>,
        node: NodeId,
    ) {
        self.tests_by_id.insert(id_key(session, local_id), node);
        if let Some(name) = name {
            self.tests_by_name.insert(SmolStr::new(name), node);
        }
    }

    /// The long-lived group previously stored under `name`, if any.
    #[must_use]
    pub fn reuse_matching_group(&self, name: &str) -> Option<NodeId> {
        self.groups_by_name.get(name).copied()
    }

    /// The long-lived test previously stored under `name`, if any.
    #[must_use]
    pub fn reuse_matching_test(&self, name: &str) -> Option<NodeId> {
        self.tests_by_name.get(name).copied()
    }

    /// Resolve a session-local group id.
    #[must_use]
    pub fn group_for_id(&self, session: Option<&str>, local_id: i64) -> Option<NodeId> {
        self.groups_by_id.get(&id_key(session, local_id)).copied()
    }

    /// Resolve a session-local test id.
    #[must_use]
    pub fn test_for_id(&self, session: Option<&str>, local_id: i64) -> Option<NodeId> {
        self.tests_by_id.get(&id_key(session, local_id)).copied()
    }

    /// Every distinct group known to this suite. The id index accumulates a
    /// key per session, so several keys may alias one reused node.
    #[must_use]
    pub fn all_groups(&self) -> Vec<NodeId> {
        dedup(self.groups_by_id.values().chain(self.groups_by_name.values()))
    }

    /// Every distinct test known to this suite.
    #[must_use]
    pub fn all_tests(&self) -> Vec<NodeId> {
        dedup(self.tests_by_id.values().chain(self.tests_by_name.values()))
    }

    /// Record that `session` touched this suite, evicting id entries of
    /// sessions older than the retained window. The static pseudo-session is
    /// never evicted.
    pub(crate) fn note_session(&mut self, session: &str, retained: usize) {
        if session == STATIC_SESSION {
            return;
        }
        if self.sessions_seen.iter().any(|s| s == session) {
            return;
        }
        self.sessions_seen.push(SmolStr::new(session));
        while self.sessions_seen.len() > retained.max(1) {
            let evicted = self.sessions_seen.remove(0);
            let prefix = format!("{evicted}_");
            self.groups_by_id.retain(|key, _| !key.starts_with(&prefix));
            self.tests_by_id.retain(|key, _| !key.starts_with(&prefix));
        }
    }

    /// Drop every index entry pointing at `node` (used after removal).
    pub(crate) fn forget_node(&mut self, node: NodeId) {
        self.groups_by_id.retain(|_, id| *id != node);
        self.groups_by_name.retain(|_, id| *id != node);
        self.tests_by_id.retain(|_, id| *id != node);
        self.tests_by_name.retain(|_, id| *id != node);
    }
}

fn dedup<'a>(ids: impl Iterator<Item = &'a NodeId>) -> Vec<NodeId> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for &id in ids {
        if seen.insert(id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite_data() -> SuiteData {
        SuiteData::new(NodeId(0), SmolStr::new("/ws/a_test.st"))
    }

    #[test]
    fn concurrent_sessions_do_not_collide() {
        let mut data = suite_data();
        data.store_test(Some("s1"), 100, Some("t1"), NodeId(1));
        data.store_test(Some("s2"), 100, Some("t2"), NodeId(2));
        assert_eq!(data.test_for_id(Some("s1"), 100), Some(NodeId(1)));
        assert_eq!(data.test_for_id(Some("s2"), 100), Some(NodeId(2)));
    }

    #[test]
    fn reuse_by_name_spans_sessions() {
        let mut data = suite_data();
        data.store_test(Some("s1"), 100, Some("t1"), NodeId(1));
        assert_eq!(data.reuse_matching_test("t1"), Some(NodeId(1)));
        assert_eq!(data.reuse_matching_test("t2"), None);
    }

    #[test]
    fn all_tests_deduplicates_aliases() {
        let mut data = suite_data();
        // The same node touched by three sessions.
        data.store_test(Some("s1"), 100, Some("t1"), NodeId(1));
        data.store_test(Some("s2"), 7, Some("t1"), NodeId(1));
        data.store_test(Some("s3"), 4, Some("t1"), NodeId(1));
        assert_eq!(data.all_tests(), vec![NodeId(1)]);
    }

    #[test]
    fn old_sessions_are_evicted_beyond_window() {
        let mut data = suite_data();
        data.store_test(Some("s1"), 100, Some("t1"), NodeId(1));
        data.note_session("s1", 2);
        data.store_test(Some("s2"), 100, Some("t1"), NodeId(1));
        data.note_session("s2", 2);
        data.store_test(Some("s3"), 100, Some("t1"), NodeId(1));
        data.note_session("s3", 2);
        assert_eq!(data.test_for_id(Some("s1"), 100), None);
        assert_eq!(data.test_for_id(Some("s2"), 100), Some(NodeId(1)));
        assert_eq!(data.test_for_id(Some("s3"), 100), Some(NodeId(1)));
        // Name-based reuse is unaffected by eviction.
        assert_eq!(data.reuse_matching_test("t1"), Some(NodeId(1)));
    }

    #[test]
    fn static_session_is_never_evicted() {
        let mut data = suite_data();
        data.store_group(None, 1, Some("g"), NodeId(1));
        for session in ["s1", "s2", "s3", "s4"] {
            data.note_session(session, 2);
        }
        assert_eq!(data.group_for_id(None, 1), Some(NodeId(1)));
    }

    #[test]
    fn forget_node_scrubs_all_indices() {
        let mut data = suite_data();
        data.store_test(Some("s1"), 100, Some("t1"), NodeId(1));
        data.forget_node(NodeId(1));
        assert_eq!(data.test_for_id(Some("s1"), 100), None);
        assert_eq!(data.reuse_matching_test("t1"), None);
    }
}
