//! Path state tracker invariants under long transition sequences.

use docket_state::{path, Path, PathState, PathStateTracker};

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[(self.next() as usize) % items.len()]
    }
}

fn paths() -> Vec<Path> {
    vec![
        path!("name"),
        path!("address"),
        path!("address", "city"),
        path!("address", "zip"),
        path!("lines", 0usize, "qty"),
        path!("lines", 1usize, "qty"),
        path!("tags"),
    ]
}

fn assert_buckets_match(tracker: &PathStateTracker, all: &[Path]) {
    assert!(tracker.is_consistent());
    for state in PathState::ALL {
        let mut expected: Vec<&Path> = all
            .iter()
            .filter(|p| tracker.state_of(p) == Some(state))
            .collect();
        expected.sort();
        let actual: Vec<&Path> = tracker.paths_in(state).iter().collect();
        assert_eq!(actual, expected, "bucket {state} out of sync");
    }
}

// ============================================================================
// transition
// ============================================================================

#[test]
fn test_random_transitions_keep_buckets_exact() {
    let all = paths();
    for seed in 0..16u64 {
        let mut rng = Lcg(seed);
        let mut tracker = PathStateTracker::new();
        for _ in 0..500 {
            let path = &all[(rng.next() as usize) % all.len()];
            let state = rng.pick(&PathState::ALL);
            tracker.transition(path, state);

            assert!(tracker.is_in_state(path, state));
            for other in PathState::ALL.iter().filter(|s| **s != state) {
                assert!(!tracker.paths_in(*other).contains(path));
            }
        }
        assert_buckets_match(&tracker, &all);
    }
}

#[test]
fn test_transition_to_same_state_is_noop() {
    let mut tracker = PathStateTracker::new();
    tracker.transition(&path!("a"), PathState::Modify);
    tracker.transition(&path!("a"), PathState::Modify);
    assert_eq!(tracker.len(), 1);
    assert_eq!(tracker.paths_in(PathState::Modify).len(), 1);
}

// ============================================================================
// bulk operations
// ============================================================================

#[test]
fn test_clear_and_move_keep_consistency() {
    let all = paths();
    let mut rng = Lcg(7);
    let mut tracker = PathStateTracker::new();
    for _ in 0..200 {
        let path = &all[(rng.next() as usize) % all.len()];
        tracker.transition(path, rng.pick(&PathState::ALL));
        match rng.next() % 10 {
            0 => tracker.clear(rng.pick(&PathState::ALL)),
            1 => tracker.move_all(PathState::Modify, PathState::Init),
            2 => {
                tracker.clear_path(path);
            }
            3 => tracker.clear_descendants(&path!("address")),
            4 => tracker.rekey_subtree(&path!("lines", 1usize), &path!("lines", 0usize)),
            _ => {}
        }
        assert!(tracker.is_consistent());
    }
    assert_buckets_match(&tracker, &all);
}

#[test]
fn test_move_all_merges_into_target() {
    let mut tracker = PathStateTracker::new();
    tracker.transition(&path!("a"), PathState::Modify);
    tracker.transition(&path!("b"), PathState::Default);
    tracker.transition(&path!("c"), PathState::Init);
    tracker.move_all(PathState::Modify, PathState::Init);
    tracker.move_all(PathState::Default, PathState::Init);

    assert!(!tracker.any_in(PathState::Modify));
    assert!(!tracker.any_in(PathState::Default));
    assert_eq!(tracker.paths_in(PathState::Init).len(), 3);
}
