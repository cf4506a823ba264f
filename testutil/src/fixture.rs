use libveritas::msg::{Bundle, Message};
use libveritas::{SovereigntyState, Veritas, COMMITMENT_FINALITY_INTERVAL};
use crate::{veritas_from_anchors, TestChain, TestDelegatedSpace, TestHandleTree};

#[derive(Clone, Debug)]
pub enum Step {
    Stage(&'static [&'static str]),
    Commit,
    Finalize,
}

#[derive(Clone, Debug)]
pub struct Fixture {
    pub name: &'static str,
    pub steps: Vec<Step>,
}

pub struct HandleStates {
    /// Handles in each commitment, indexed by commitment number
    pub commits: Vec<Vec<&'static str>>,
    /// Handles staged but not yet committed
    pub staged: Vec<&'static str>,
    /// Number of finalized commitments
    pub finalized_count: usize,
}

impl HandleStates {
    /// All committed handles (any commitment)
    pub fn all_committed(&self) -> Vec<&'static str> {
        self.commits.iter().flatten().copied().collect()
    }

    /// Handles in a specific commitment
    pub fn in_commit(&self, index: usize) -> &[&'static str] {
        self.commits.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_committed(&self, handle: &str) -> bool {
        self.commits.iter().flatten().any(|&h| h == handle)
    }

    pub fn is_staged(&self, handle: &str) -> bool {
        self.staged.contains(&handle)
    }

    /// Which commitment contains this handle? None if staged/not found.
    pub fn commit_index(&self, handle: &str) -> Option<usize> {
        self.commits.iter().position(|c| c.contains(&handle))
    }

    /// Is the latest commitment still waiting for finality?
    pub fn has_pending_commit(&self) -> bool {
        self.commits.len() > self.finalized_count
    }

    /// Expected sovereignty of a handle.
    ///
    /// Committed handles are proven against the latest commitment, so they
    /// all share its finality.
    pub fn sovereignty(&self, handle: &str) -> Option<SovereigntyState> {
        if self.is_staged(handle) {
            return Some(SovereigntyState::Dependent);
        }
        self.commit_index(handle)?;
        if self.has_pending_commit() {
            Some(SovereigntyState::Pending)
        } else {
            Some(SovereigntyState::Sovereign)
        }
    }
}

impl Fixture {
    pub fn new(name: &'static str) -> Self {
        Self { name, steps: vec![] }
    }

    pub fn stage(mut self, handles: &'static [&'static str]) -> Self {
        self.steps.push(Step::Stage(handles));
        self
    }

    pub fn commit(mut self) -> Self {
        self.steps.push(Step::Commit);
        self
    }

    pub fn finalize(mut self) -> Self {
        self.steps.push(Step::Finalize);
        self
    }

    pub fn then(mut self, other: Fixture) -> Self {
        self.steps.extend(other.steps);
        self
    }

    /// Analyze steps to determine handle states
    pub fn handle_states(&self) -> HandleStates {
        let mut commits: Vec<Vec<&'static str>> = vec![];
        let mut staged: Vec<&'static str> = vec![];
        let mut finalized_count: usize = 0;

        for step in &self.steps {
            match step {
                Step::Stage(handles) => staged.extend(*handles),
                Step::Commit => commits.push(std::mem::take(&mut staged)),
                Step::Finalize => finalized_count = commits.len(),
            }
        }

        HandleStates { commits, staged, finalized_count }
    }
}

#[derive(Clone, Default)]
pub struct ChainState {
    pub chain: TestChain,
}

impl ChainState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn newest_height(&self) -> u32 {
        self.chain
            .snapshots
            .iter()
            .map(|s| s.anchor.block.height)
            .max()
            .expect("at least one snapshot")
    }

    /// A dev mode verifier trusting every recorded snapshot.
    pub fn veritas(&mut self) -> Veritas {
        if self.chain.snapshots.is_empty() {
            self.chain.snapshot();
        }
        veritas_from_anchors(self.chain.root_anchors())
    }

    pub fn message(&self, bundles: Vec<Bundle>) -> Message {
        self.chain.message(self.newest_height(), bundles)
    }
}

#[derive(Clone)]
pub struct FixtureRunner {
    pub fixture: Fixture,
    pub step: std::vec::IntoIter<Step>,
    pub space: TestDelegatedSpace,
    pub handles: TestHandleTree,
}

impl FixtureRunner {
    pub fn new(state: &mut ChainState, fixture: Fixture) -> Self {
        let space = state.chain.add_space_with_delegation(fixture.name);
        state.chain.snapshot();
        let handles = TestHandleTree::new(&space);
        Self {
            step: fixture.steps.clone().into_iter(),
            space,
            fixture,
            handles,
        }
    }

    /// Bundle proving every committed handle (final) and every staged
    /// handle (temporary) at the newest snapshot.
    pub fn build_bundle(&self, state: &ChainState) -> Bundle {
        let height = state.newest_height();
        let mut bundle = state.chain.bundle(&self.handles.space, height);

        for c in &self.handles.commitments {
            let mut names: Vec<String> = c.handles.keys().map(|l| l.to_string()).collect();
            names.sort();
            for name in names {
                bundle.handles.push(self.handles.final_handle(&state.chain, height, &name));
            }
        }

        let mut staged: Vec<String> = self.handles.staged.keys().map(|l| l.to_string()).collect();
        staged.sort();
        for name in staged {
            bundle.handles.push(self.handles.temporary_handle(&state.chain, height, &name));
        }
        bundle
    }

    pub fn run_next(&mut self, state: &mut ChainState) -> Option<Step> {
        let step = self.step.next()?;
        match &step {
            Step::Stage(stage) => {
                for &name in *stage {
                    let staged = self.handles.add_handle(name);
                    staged.handle.set_offchain_data(0, name.as_bytes());
                }
            }
            Step::Commit => {
                self.handles.commit(&mut state.chain);
                state.chain.snapshot();
            }
            Step::Finalize => {
                state.chain.increase_time(COMMITMENT_FINALITY_INTERVAL + 1);
                state.chain.snapshot();
            }
        }
        Some(step)
    }

    pub fn run(&mut self, state: &mut ChainState) {
        while self.run_next(state).is_some() {}
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// FIXTURES
// ═══════════════════════════════════════════════════════════════════════════

/// No commitments, just staged handles.
pub fn staged_only() -> Fixture {
    Fixture::new("@staged")
        .stage(&["alice", "bob"])
}

/// Single commitment, not yet finalized. Handles are Pending.
pub fn single_commit_pending() -> Fixture {
    Fixture::new("@pending")
        .stage(&["alice", "bob"])
        .commit()
}

/// Single commitment, finalized. Handles are Sovereign.
pub fn single_commit_finalized() -> Fixture {
    Fixture::new("@sovereign")
        .stage(&["alice", "bob"])
        .commit()
        .finalize()
}

/// Two commitments: first finalized, second pending.
pub fn two_commits_second_pending() -> Fixture {
    Fixture::new("@twopending")
        .stage(&["alice", "bob"])
        .commit()
        .finalize()
        .stage(&["charlie"])
        .commit()
}

/// Two commitments, both finalized.
pub fn two_commits_both_finalized() -> Fixture {
    Fixture::new("@twofinalized")
        .stage(&["alice", "bob"])
        .commit()
        .finalize()
        .stage(&["charlie"])
        .commit()
        .finalize()
}

/// Kitchen sink: multiple commitments, mixed finality, plus staged handles.
/// - Commit 0 (finalized): alice, bob
/// - Commit 1 (finalized): charlie, dave
/// - Commit 2 (pending):   eve, frank
/// - Staged (no commit):   grace, heidi
pub fn kitchen_sink() -> Fixture {
    Fixture::new("@kitchensink")
        .stage(&["alice", "bob"])
        .commit()
        .finalize()
        .stage(&["charlie", "dave"])
        .commit()
        .finalize()
        .stage(&["eve", "frank"])
        .commit()
        .stage(&["grace", "heidi"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_states_staged_only() {
        let states = staged_only().handle_states();

        assert_eq!(states.commits.len(), 0);
        assert_eq!(states.staged, vec!["alice", "bob"]);
        assert!(states.is_staged("alice"));
        assert!(!states.is_committed("alice"));
        assert!(!states.has_pending_commit());
        assert_eq!(states.sovereignty("alice"), Some(SovereigntyState::Dependent));
    }

    #[test]
    fn test_handle_states_two_commits() {
        let states = two_commits_second_pending().handle_states();
        assert_eq!(states.finalized_count, 1);
        assert!(states.has_pending_commit());
        assert_eq!(states.commit_index("charlie"), Some(1));
        assert_eq!(states.sovereignty("alice"), Some(SovereigntyState::Pending));

        let states = two_commits_both_finalized().handle_states();
        assert!(!states.has_pending_commit());
        assert_eq!(states.all_committed(), vec!["alice", "bob", "charlie"]);
        assert_eq!(states.sovereignty("charlie"), Some(SovereigntyState::Sovereign));
    }

    #[test]
    fn test_handle_states_kitchen_sink() {
        let states = kitchen_sink().handle_states();

        assert_eq!(states.commits.len(), 3);
        assert_eq!(states.finalized_count, 2);
        assert_eq!(states.in_commit(1), &["charlie", "dave"]);
        assert_eq!(states.in_commit(2), &["eve", "frank"]);
        assert_eq!(states.staged, vec!["grace", "heidi"]);
        assert!(!states.is_committed("grace"));
        assert_eq!(states.sovereignty("nobody"), None);
    }

    #[test]
    fn test_runner_records_snapshots() {
        let mut state = ChainState::new();
        let mut runner = FixtureRunner::new(&mut state, single_commit_finalized());
        runner.run(&mut state);

        assert_eq!(state.newest_height(), COMMITMENT_FINALITY_INTERVAL + 1);
        assert_eq!(runner.handles.commitments.len(), 1);
        let bundle = runner.build_bundle(&state);
        assert_eq!(bundle.handles.len(), 2);
        assert!(bundle.handles.iter().all(|h| h.inclusion.is_some()));
    }
}
