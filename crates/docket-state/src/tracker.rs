//! Per-document path state machine.
//!
//! Every tracked path sits in exactly one [`PathState`]. The tracker keeps a
//! path → state map for O(1) membership checks and one bucket per state for
//! ordered iteration over that state's members. Both views are updated
//! together on every transition.

use crate::Path;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// The lifecycle state of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathState {
    /// Required by the schema and not yet present.
    Require,
    /// Written since the last commit.
    Modify,
    /// Loaded from storage (clean).
    Init,
    /// Filled from a schema default that has not been persisted.
    Default,
    /// Excluded from tracking.
    Ignore,
}

impl PathState {
    /// Every state, in bucket order.
    pub const ALL: [PathState; 5] = [
        PathState::Require,
        PathState::Modify,
        PathState::Init,
        PathState::Default,
        PathState::Ignore,
    ];

    #[inline]
    const fn slot(self) -> usize {
        match self {
            PathState::Require => 0,
            PathState::Modify => 1,
            PathState::Init => 2,
            PathState::Default => 3,
            PathState::Ignore => 4,
        }
    }
}

impl fmt::Display for PathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PathState::Require => "require",
            PathState::Modify => "modify",
            PathState::Init => "init",
            PathState::Default => "default",
            PathState::Ignore => "ignore",
        })
    }
}

/// Path state tracker.
///
/// # Examples
///
/// ```
/// use docket_state::{Path, PathState, PathStateTracker};
///
/// let mut tracker = PathStateTracker::new();
/// let name = Path::parse("name");
/// tracker.transition(&name, PathState::Init);
/// tracker.transition(&name, PathState::Modify);
///
/// assert!(tracker.is_in_state(&name, PathState::Modify));
/// assert!(tracker.paths_in(PathState::Init).is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathStateTracker {
    states: HashMap<Path, PathState>,
    buckets: [BTreeSet<Path>; 5],
}

impl PathStateTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move `path` into `state`. No-op if it is already there.
    pub fn transition(&mut self, path: &Path, state: PathState) {
        match self.states.insert(path.clone(), state) {
            Some(prev) if prev == state => return,
            Some(prev) => {
                self.buckets[prev.slot()].remove(path);
            }
            None => {}
        }
        self.buckets[state.slot()].insert(path.clone());
        tracing::trace!(path = %path, state = %state, "path state transition");
    }

    /// The paths currently in `state`.
    #[inline]
    pub fn paths_in(&self, state: PathState) -> &BTreeSet<Path> {
        &self.buckets[state.slot()]
    }

    /// True if `path` is currently in `state`.
    #[inline]
    pub fn is_in_state(&self, path: &Path, state: PathState) -> bool {
        self.states.get(path) == Some(&state)
    }

    /// The state `path` is in, if tracked.
    #[inline]
    pub fn state_of(&self, path: &Path) -> Option<PathState> {
        self.states.get(path).copied()
    }

    /// True if any path is in `state`.
    #[inline]
    pub fn any_in(&self, state: PathState) -> bool {
        !self.buckets[state.slot()].is_empty()
    }

    /// Drop every path currently in `state`.
    pub fn clear(&mut self, state: PathState) {
        let bucket = std::mem::take(&mut self.buckets[state.slot()]);
        for path in &bucket {
            self.states.remove(path);
        }
    }

    /// Move every path in `from` into `to`.
    pub fn move_all(&mut self, from: PathState, to: PathState) {
        if from == to {
            return;
        }
        let bucket = std::mem::take(&mut self.buckets[from.slot()]);
        for path in bucket {
            self.states.insert(path.clone(), to);
            self.buckets[to.slot()].insert(path);
        }
    }

    /// Remove `path` from whichever state holds it.
    pub fn clear_path(&mut self, path: &Path) -> Option<PathState> {
        let prev = self.states.remove(path)?;
        self.buckets[prev.slot()].remove(path);
        Some(prev)
    }

    /// Remove every strict descendant of `prefix`.
    pub fn clear_descendants(&mut self, prefix: &Path) {
        for path in self.descendants(prefix) {
            self.clear_path(&path);
        }
    }

    /// Tracked strict descendants of `prefix`, in path order.
    pub fn descendants(&self, prefix: &Path) -> Vec<Path> {
        let mut found: Vec<Path> = self
            .states
            .keys()
            .filter(|p| prefix.is_ancestor_of(p))
            .cloned()
            .collect();
        found.sort();
        found
    }

    /// Move every path at or below `old` to the same relative place below `new`.
    pub fn rekey_subtree(&mut self, old: &Path, new: &Path) {
        if old == new {
            return;
        }
        let moved: Vec<(Path, PathState)> = self
            .states
            .iter()
            .filter(|(p, _)| old.is_prefix_of(p))
            .map(|(p, s)| (p.clone(), *s))
            .collect();
        for (path, _) in &moved {
            self.clear_path(path);
        }
        for (path, state) in moved {
            if let Some(rebased) = path.rebase(old, new) {
                self.transition(&rebased, state);
            }
        }
    }

    /// Every tracked path with its state, in path order.
    pub fn entries(&self) -> Vec<(Path, PathState)> {
        let mut entries: Vec<(Path, PathState)> =
            self.states.iter().map(|(p, s)| (p.clone(), *s)).collect();
        entries.sort();
        entries
    }

    /// Number of tracked paths.
    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True if nothing is tracked.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// True if the bucket view and the path map agree.
    pub fn is_consistent(&self) -> bool {
        let bucketed: usize = self.buckets.iter().map(BTreeSet::len).sum();
        bucketed == self.states.len()
            && PathState::ALL.iter().all(|state| {
                self.buckets[state.slot()]
                    .iter()
                    .all(|p| self.states.get(p) == Some(state))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s)
    }

    #[test]
    fn transition_moves_between_buckets() {
        let mut t = PathStateTracker::new();
        t.transition(&p("a"), PathState::Default);
        t.transition(&p("a"), PathState::Modify);
        assert!(t.paths_in(PathState::Default).is_empty());
        assert!(t.paths_in(PathState::Modify).contains(&p("a")));
        assert_eq!(t.state_of(&p("a")), Some(PathState::Modify));
        assert!(t.is_consistent());
    }

    #[test]
    fn same_state_transition_is_noop() {
        let mut t = PathStateTracker::new();
        t.transition(&p("a"), PathState::Init);
        let before = t.clone();
        t.transition(&p("a"), PathState::Init);
        assert_eq!(t, before);
    }

    #[test]
    fn clear_state_drops_paths() {
        let mut t = PathStateTracker::new();
        t.transition(&p("a"), PathState::Modify);
        t.transition(&p("b"), PathState::Modify);
        t.transition(&p("c"), PathState::Init);
        t.clear(PathState::Modify);
        assert_eq!(t.len(), 1);
        assert_eq!(t.state_of(&p("a")), None);
        assert!(t.is_consistent());
    }

    #[test]
    fn move_all_preserves_consistency() {
        let mut t = PathStateTracker::new();
        t.transition(&p("a"), PathState::Modify);
        t.transition(&p("b"), PathState::Default);
        t.move_all(PathState::Modify, PathState::Init);
        t.move_all(PathState::Default, PathState::Init);
        assert_eq!(t.paths_in(PathState::Init).len(), 2);
        assert!(t.is_consistent());
    }

    #[test]
    fn clear_descendants_keeps_the_parent() {
        let mut t = PathStateTracker::new();
        t.transition(&p("nested"), PathState::Modify);
        t.transition(&p("nested.a"), PathState::Modify);
        t.transition(&p("nested.b"), PathState::Init);
        t.transition(&p("nestedness"), PathState::Init);
        t.clear_descendants(&p("nested"));
        assert_eq!(
            t.entries(),
            vec![
                (p("nested"), PathState::Modify),
                (p("nestedness"), PathState::Init)
            ]
        );
    }

    #[test]
    fn rekey_subtree_moves_states() {
        let mut t = PathStateTracker::new();
        t.transition(&p("items.2"), PathState::Init);
        t.transition(&p("items.2.name"), PathState::Modify);
        t.rekey_subtree(&p("items.2"), &p("items.1"));
        assert_eq!(t.state_of(&p("items.1.name")), Some(PathState::Modify));
        assert_eq!(t.state_of(&p("items.2.name")), None);
        assert!(t.is_consistent());
    }
}
