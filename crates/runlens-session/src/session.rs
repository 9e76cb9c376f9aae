//! Translates one runner session's notification stream into model mutations.
//!
//! The coordinator owns the session-scoped context the model deliberately
//! does not track: runner-local suite ids, phantom group elision, location
//! normalization, and synthesizing completion for sessions that die without
//! a `done`.

use rustc_hash::{FxHashMap, FxHashSet};
use smol_str::SmolStr;
use tracing::{debug, warn};

use runlens_model::{ModelConfig, NodeId, NodeSource, Range, TestModel, TestResult};

use crate::outline::{range_at_line, OutlineProvider};
use crate::protocol::{
    DoneResult, ErrorNotification, GroupNotification, Notification, PrintNotification,
    SuiteNotification, TestDoneNotification, TestStartNotification,
};

/// Runners emit this exact error line after the real failure detail; keeping
/// it would duplicate the output log.
const DUPLICATE_FAILURE_BANNER: &str = "Test failed. See exception logs above.";

/// Synthetic tests named `loading /path/to/file` report compilation progress,
/// not test results.
const LOADING_PREFIX: &str = "loading ";

/// Where a phantom (unnamed) group's children should really attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PhantomParent {
    /// Directly under the suite root.
    TopLevel,
    /// Under the named group with this runner-local id.
    Group(i64),
}

/// Per-session bookkeeping, discarded when the session ends.
#[derive(Debug, Default)]
struct SessionState {
    /// Runner-local suite id to suite path.
    suites: FxHashMap<i64, SmolStr>,
    /// Runner-local test id to its suite path and node.
    tests: FxHashMap<i64, (SmolStr, NodeId)>,
    /// Unnamed groups elided from the tree.
    phantoms: FxHashMap<i64, PhantomParent>,
    /// Synthetic loading-progress tests, dropped entirely.
    loading: FxHashSet<i64>,
    /// Whether the run covers whole files (enables pruning at completion).
    whole_suite: bool,
    /// Suites announced by this session, in announcement order.
    owned_suites: Vec<SmolStr>,
    /// Set once a `done` notification arrived.
    completed: bool,
}

/// Drives a [`TestModel`] from runner notification streams, one logical
/// session per concurrently executing run.
pub struct SessionCoordinator {
    model: TestModel,
    outline: Option<Box<dyn OutlineProvider>>,
    sessions: FxHashMap<SmolStr, SessionState>,
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("sessions", &self.sessions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl SessionCoordinator {
    /// A coordinator over a fresh model.
    #[must_use]
    pub fn new(config: ModelConfig) -> Self {
        Self {
            model: TestModel::new(config),
            outline: None,
            sessions: FxHashMap::default(),
        }
    }

    /// Attach an outline provider; suites announced after this point are
    /// seeded from their static outline before runtime events land.
    pub fn set_outline_provider(&mut self, provider: Box<dyn OutlineProvider>) {
        self.outline = Some(provider);
    }

    /// The underlying model, for reads.
    #[must_use]
    pub fn model(&self) -> &TestModel {
        &self.model
    }

    /// The underlying model, for registering listeners or outline syncs.
    pub fn model_mut(&mut self) -> &mut TestModel {
        &mut self.model
    }

    /// Start tracking a session. `whole_suite` is set when the run targets
    /// entire files rather than individual tests; only then can completion
    /// prune nodes the run never mentioned.
    pub fn begin_session(&mut self, session: &str, whole_suite: bool) {
        if self.sessions.contains_key(session) {
            warn!("session {session} already active; restarting it");
        }
        self.sessions.insert(
            SmolStr::new(session),
            SessionState {
                whole_suite,
                ..SessionState::default()
            },
        );
    }

    /// Stop tracking a session. A session that never reported `done` crashed
    /// mid-run; completion is synthesized so no suite is stranded with
    /// running tests and stale flags.
    pub fn end_session(&mut self, session: &str) {
        let Some(state) = self.sessions.remove(session) else {
            warn!("ending unknown session {session}; ignoring");
            return;
        };
        if !state.completed {
            debug!("session {session} ended without done; synthesizing completion");
            for path in &state.owned_suites {
                self.model.suite_done(Some(session), path);
            }
        }
    }

    /// Apply one notification from `session`'s stream.
    pub fn handle(&mut self, session: &str, notification: &Notification) {
        if !self.sessions.contains_key(session) {
            warn!("notification from unknown session {session}; dropping");
            return;
        }
        match notification {
            Notification::Suite(suite) => self.handle_suite(session, suite),
            Notification::Group(group) => self.handle_group(session, group),
            Notification::TestStart(start) => self.handle_test_start(session, start),
            Notification::TestDone(done) => self.handle_test_done(session, done),
            Notification::Print(print) => self.handle_print(session, print),
            Notification::Error(error) => self.handle_error(session, error),
            Notification::Done(_) => self.handle_done(session),
        }
    }

    fn handle_suite(&mut self, session: &str, suite: &SuiteNotification) {
        if let Some(provider) = &self.outline {
            if let Some(outline) = provider.outline_for(&suite.path) {
                crate::outline::sync_suite_from_outline(&mut self.model, &suite.path, &outline);
            }
        }
        self.model.suite_discovered(Some(session), &suite.path);
        let whole_suite = self.state(session).is_some_and(|state| state.whole_suite);
        self.model.flag_suite_start(&suite.path, whole_suite);
        let Some(state) = self.state_mut(session) else { return };
        state.suites.insert(suite.id, suite.path.clone());
        if !state.owned_suites.contains(&suite.path) {
            state.owned_suites.push(suite.path.clone());
        }
    }

    fn handle_group(&mut self, session: &str, group: &GroupNotification) {
        let Some(suite_path) = self.suite_path(session, group.suite_id) else {
            warn!("group {} for unknown suite id {}; dropping", group.id, group.suite_id);
            return;
        };
        let parent = self.resolve_parent(session, group.parent_id);
        let name = group.name.as_deref().filter(|name| !name.is_empty());
        if name.is_none() {
            // Unnamed wrapper groups never appear in the tree; their children
            // attach where the wrapper would have.
            let record = match parent {
                Some(id) => PhantomParent::Group(id),
                None => PhantomParent::TopLevel,
            };
            if let Some(state) = self.state_mut(session) {
                state.phantoms.insert(group.id, record);
            }
            return;
        }
        let location = pick_location(
            name,
            group.url.as_deref(),
            group.line,
            group.column,
            group.root_url.as_deref(),
            group.root_line,
            group.root_column,
        );
        let range = self.resolve_range(&suite_path, location);
        self.model.group_discovered(
            Some(session),
            &suite_path,
            NodeSource::Result,
            group.id,
            name,
            parent,
            range,
        );
    }

    fn handle_test_start(&mut self, session: &str, start: &TestStartNotification) {
        let Some(suite_path) = self.suite_path(session, start.suite_id) else {
            warn!("test {} for unknown suite id {}; dropping", start.id, start.suite_id);
            return;
        };
        if start
            .name
            .as_deref()
            .is_some_and(|name| name.starts_with(LOADING_PREFIX))
        {
            if let Some(state) = self.state_mut(session) {
                state.loading.insert(start.id);
            }
            return;
        }
        let parent = self.resolve_parent(session, start.group_ids.last().copied());
        let location = pick_location(
            start.name.as_deref(),
            start.url.as_deref(),
            start.line,
            start.column,
            start.root_url.as_deref(),
            start.root_line,
            start.root_column,
        );
        let path = location.map(|loc| SmolStr::new(loc.0));
        let range = self.resolve_range(&suite_path, location);
        let node = self.model.test_discovered(
            Some(session),
            &suite_path,
            NodeSource::Result,
            start.id,
            start.name.as_deref(),
            parent,
            path.as_deref(),
            range,
            start.time,
            true,
        );
        if let (Some(node), Some(state)) = (node, self.state_mut(session)) {
            state.tests.insert(start.id, (suite_path, node));
        }
    }

    fn handle_test_done(&mut self, session: &str, done: &TestDoneNotification) {
        if self
            .state_mut(session)
            .is_some_and(|state| state.loading.remove(&done.test_id))
        {
            return;
        }
        let Some((suite_path, _)) = self
            .state(session)
            .and_then(|state| state.tests.get(&done.test_id).cloned())
        else {
            warn!("testDone for untracked test {}; dropping", done.test_id);
            return;
        };
        let result = if done.skipped {
            Some(TestResult::Skipped)
        } else {
            done.result.map(|result| match result {
                DoneResult::Skipped => TestResult::Skipped,
                DoneResult::Success => TestResult::Success,
                DoneResult::Failure => TestResult::Failure,
                DoneResult::Error => TestResult::Error,
            })
        };
        self.model
            .test_done(Some(session), &suite_path, done.test_id, result, done.time);
    }

    fn handle_print(&mut self, session: &str, print: &PrintNotification) {
        let Some(state) = self.state(session) else { return };
        if state.loading.contains(&print.test_id) {
            return;
        }
        let Some(&(_, node)) = state.tests.get(&print.test_id) else {
            debug!("print for untracked test {}; dropping", print.test_id);
            return;
        };
        self.model.test_output(node, &print.message);
    }

    fn handle_error(&mut self, session: &str, error: &ErrorNotification) {
        if error.error == DUPLICATE_FAILURE_BANNER {
            debug!("suppressing duplicate failure banner for test {}", error.test_id);
            return;
        }
        let Some(state) = self.state(session) else { return };
        if state.loading.contains(&error.test_id) {
            return;
        }
        let Some(&(_, node)) = state.tests.get(&error.test_id) else {
            debug!("error for untracked test {}; dropping", error.test_id);
            return;
        };
        self.model
            .test_error_output(node, &error.error, &error.stack_trace, error.is_failure);
    }

    fn handle_done(&mut self, session: &str) {
        let owned = self
            .state(session)
            .map(|state| state.owned_suites.clone())
            .unwrap_or_default();
        for path in &owned {
            self.model.suite_done(Some(session), path);
        }
        if let Some(state) = self.state_mut(session) {
            state.completed = true;
        }
    }

    fn state(&self, session: &str) -> Option<&SessionState> {
        self.sessions.get(session)
    }

    fn state_mut(&mut self, session: &str) -> Option<&mut SessionState> {
        self.sessions.get_mut(session)
    }

    fn suite_path(&self, session: &str, suite_id: i64) -> Option<SmolStr> {
        self.state(session)?.suites.get(&suite_id).cloned()
    }

    /// Resolve a runner-local group id through any chain of phantom wrappers
    /// to the id the model should use as parent. Out-of-order delivery can
    /// record a cyclic phantom chain; the walk is bounded by the map size so
    /// a cycle degrades to top-level attachment instead of hanging.
    fn resolve_parent(&self, session: &str, group_id: Option<i64>) -> Option<i64> {
        let state = self.state(session)?;
        let mut current = group_id?;
        let mut hops = 0;
        loop {
            match state.phantoms.get(&current) {
                None => return Some(current),
                Some(PhantomParent::TopLevel) => return None,
                Some(PhantomParent::Group(parent)) => {
                    hops += 1;
                    if hops > state.phantoms.len() {
                        warn!("phantom group chain cycles at {current}; attaching at top level");
                        return None;
                    }
                    current = *parent;
                }
            }
        }
    }

    /// Turn a normalized 1-based location into a zero-based range, preferring
    /// the statically known range of whatever is declared on that line.
    fn resolve_range(
        &self,
        suite_path: &str,
        location: Option<(&str, u32, u32)>,
    ) -> Option<Range> {
        let (url, line, column) = location?;
        let line = line.saturating_sub(1);
        let column = column.saturating_sub(1);
        if url == suite_path {
            if let Some(provider) = &self.outline {
                if let Some(outline) = provider.outline_for(suite_path) {
                    if let Some(range) = range_at_line(&outline, line) {
                        return Some(range);
                    }
                }
            }
        }
        Some(Range::single_line(line, column))
    }
}

/// Pick the location to attribute a node to. Runners report both the
/// immediate declaration site (`url`) and the site inside the originally
/// invoked suite file (`root_url`); the root is what the tree should point
/// at, except for setUp/tearDown wrappers whose root points at the whole
/// file rather than the hook.
fn pick_location<'a>(
    name: Option<&str>,
    url: Option<&'a str>,
    line: Option<u32>,
    column: Option<u32>,
    root_url: Option<&'a str>,
    root_line: Option<u32>,
    root_column: Option<u32>,
) -> Option<(&'a str, u32, u32)> {
    let is_hook = name.is_some_and(|name| {
        name.starts_with("(setUp") || name.starts_with("(tearDown")
    });
    if !is_hook {
        if let (Some(url), Some(line), Some(column)) = (root_url, root_line, root_column) {
            return Some((url, line, column));
        }
    }
    match (url, line, column) {
        (Some(url), Some(line), Some(column)) => Some((url, line, column)),
        _ => None,
    }
}
