//! Counterexample representation and rendering.
//!
//! When a property violation is detected, a counterexample shows the
//! operations and state that led to the failure.

use std::fmt;

/// A counterexample showing the failure path.
///
/// Contains the sequence of states and thread actions that led to an
/// invariant violation. Can be rendered as a thread diagram.
#[derive(Debug, Clone, Default)]
pub struct Counterexample {
    /// Sequence of state snapshots
    pub states: Vec<StateSnapshot>,
    /// Thread interleaving that caused the failure
    pub interleaving: Vec<ThreadAction>,
    /// Reclamation issues detected
    pub memory_issues: Vec<MemoryIssue>,
    /// DST seed for reproduction (if applicable)
    pub dst_seed: Option<u64>,
    /// Human-readable description of the failure
    pub description: Option<String>,
}

/// Snapshot of observable state at a point in time.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Step number in the execution
    pub step: u64,
    /// Description of the state
    pub description: String,
    /// Variable values at this point
    pub variables: Vec<(String, String)>,
}

/// Action taken by a thread.
#[derive(Debug, Clone)]
pub struct ThreadAction {
    /// Thread identifier
    pub thread_id: u64,
    /// Step number when this action occurred
    pub step: u64,
    /// Description of the action
    pub action: String,
    /// Whether this action succeeded
    pub success: bool,
}

/// Reclamation issue detected from node and claim accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryIssue {
    /// More frees than allocations: some node was freed twice.
    DoubleFree { allocated: u64, freed: u64 },
    /// Unreachable nodes that were never freed.
    NodeLeak { allocated: u64, freed: u64, live: u64 },
    /// Claims taken and released do not net out to one per live node.
    UnbalancedClaims { taken: u64, released: u64, live: u64 },
}

impl Counterexample {
    /// Create a new empty counterexample.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a counterexample with DST seed for reproduction.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            dst_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Set the description for this counterexample.
    #[must_use]
    pub fn with_description(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    /// Add a state snapshot. Steps must be increasing.
    pub fn add_state(&mut self, state: StateSnapshot) {
        debug_assert!(
            self.states.last().is_none_or(|last| state.step > last.step),
            "States must be added in order"
        );
        self.states.push(state);
    }

    /// Add a thread action.
    pub fn add_action(&mut self, action: ThreadAction) {
        self.interleaving.push(action);
    }

    /// Add a reclamation issue.
    pub fn add_memory_issue(&mut self, issue: MemoryIssue) {
        self.memory_issues.push(issue);
    }

    /// Render the counterexample as a thread diagram.
    ///
    /// ```text
    /// DST_SEED=12345
    ///
    /// Step | Thread 0 | Thread 1 | State
    /// -----|----------|----------|------
    ///    1 | push(42) |          | head=N1(ext=1)
    ///    2 |          | claim    | head=N1(ext=2)
    ///    3 | pop      |          | head=null
    ///    4 |          | unlink [FAIL] | N1 freed
    /// ```
    #[must_use]
    pub fn render_diagram(&self) -> String {
        let mut output = String::new();

        if let Some(seed) = self.dst_seed {
            output.push_str(&format!("DST_SEED={}\n\n", seed));
        }

        if let Some(ref desc) = self.description {
            output.push_str("Failure: ");
            output.push_str(desc);
            output.push_str("\n\n");
        }

        if !self.interleaving.is_empty() {
            self.render_steps(&mut output);
        } else if self.states.is_empty() {
            output.push_str("(no thread actions recorded)\n");
        }

        if !self.states.is_empty() && self.interleaving.is_empty() {
            for state in &self.states {
                output.push_str(&format!("{:4} | {}\n", state.step, state.description));
                for (name, value) in &state.variables {
                    output.push_str(&format!("     |   {} = {}\n", name, value));
                }
            }
        }

        if !self.memory_issues.is_empty() {
            output.push_str("\nMemory Issues:\n");
            for issue in &self.memory_issues {
                output.push_str(&format!("  - {}\n", issue));
            }
        }

        output
    }

    fn render_steps(&self, output: &mut String) {
        let mut threads: Vec<u64> = self.interleaving.iter().map(|a| a.thread_id).collect();
        threads.sort_unstable();
        threads.dedup();

        output.push_str("Step |");
        for tid in &threads {
            output.push_str(&format!(" Thread {} |", tid));
        }
        output.push_str(" State\n");

        output.push_str("-----|");
        for _ in &threads {
            output.push_str("----------|");
        }
        output.push_str("------\n");

        let max_step = self.interleaving.iter().map(|a| a.step).max().unwrap_or(0);

        for step in 1..=max_step {
            output.push_str(&format!("{:4} |", step));

            for tid in &threads {
                let action = self
                    .interleaving
                    .iter()
                    .find(|a| a.step == step && a.thread_id == *tid);

                match action {
                    Some(a) => {
                        let status = if a.success { "" } else { " [FAIL]" };
                        output.push_str(&format!(" {}{} |", a.action, status));
                    }
                    None => output.push_str("          |"),
                }
            }

            if let Some(state) = self.states.iter().find(|s| s.step == step) {
                output.push_str(&format!(" {}", state.description));
            }

            output.push('\n');
        }
    }
}

impl fmt::Display for MemoryIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryIssue::DoubleFree { allocated, freed } => write!(
                f,
                "Double free: {} nodes freed but only {} allocated",
                freed, allocated
            ),
            MemoryIssue::NodeLeak {
                allocated,
                freed,
                live,
            } => write!(
                f,
                "Node leak: allocated={} freed={} live={} ({} unreachable nodes never freed)",
                allocated,
                freed,
                live,
                allocated.saturating_sub(*freed).saturating_sub(*live)
            ),
            MemoryIssue::UnbalancedClaims {
                taken,
                released,
                live,
            } => write!(
                f,
                "Unbalanced claims: taken={} released={} but {} live nodes hold one claim each",
                taken, released, live
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counterexample_creation() {
        let ce = Counterexample::new();
        assert!(ce.states.is_empty());
        assert!(ce.interleaving.is_empty());
        assert!(ce.dst_seed.is_none());
    }

    #[test]
    fn test_counterexample_with_seed() {
        let ce = Counterexample::with_seed(12345);
        assert_eq!(ce.dst_seed, Some(12345));
    }

    #[test]
    fn test_render_diagram() {
        let mut ce = Counterexample::with_seed(42);

        ce.add_action(ThreadAction {
            thread_id: 0,
            step: 1,
            action: "push(1)".to_string(),
            success: true,
        });

        ce.add_action(ThreadAction {
            thread_id: 1,
            step: 2,
            action: "unlink".to_string(),
            success: false,
        });

        ce.add_state(StateSnapshot {
            step: 1,
            description: "head=N1(ext=1)".to_string(),
            variables: vec![],
        });

        let diagram = ce.render_diagram();
        assert!(diagram.contains("DST_SEED=42"));
        assert!(diagram.contains("Thread 0"));
        assert!(diagram.contains("push(1)"));
        assert!(diagram.contains("unlink [FAIL]"));
        assert!(diagram.contains("head=N1(ext=1)"));
    }

    #[test]
    fn test_render_memory_issues() {
        let mut ce = Counterexample::new().with_description("ledger mismatch".to_string());
        ce.add_memory_issue(MemoryIssue::DoubleFree {
            allocated: 3,
            freed: 4,
        });

        let diagram = ce.render_diagram();
        assert!(diagram.contains("Failure: ledger mismatch"));
        assert!(diagram.contains("Double free: 4 nodes freed but only 3 allocated"));
    }
}
