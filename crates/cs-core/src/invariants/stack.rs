//! Element invariants for LIFO stacks.
//!
//! | Property | Description |
//! |----------|-------------|
//! | NoLostElements | Every pushed element is in the stack or was popped |
//! | NoDuplicates | No element appears twice in the stack |
//! | PoppedOnce | No element is returned by more than one pop |
//! | PoppedWerePushed | Every popped element was pushed |
//! | LIFO_Order | Replaying the history against a model stack matches |
//!
//! Elements are `u64` and expected to be unique per run; harnesses
//! generate them that way so that set membership is exact.

use std::collections::{HashMap, HashSet};

use crate::counterexample::{Counterexample, StateSnapshot, ThreadAction};
use crate::property::{PropertyChecker, PropertyResult};

/// Properties that any stack implementation must satisfy.
///
/// Implementations provide access to their observable state for
/// property checking.
pub trait StackProperties {
    /// Set of all elements that have been pushed.
    fn pushed_elements(&self) -> HashSet<u64>;

    /// Set of all elements that have been popped.
    fn popped_elements(&self) -> HashSet<u64>;

    /// Current contents of the stack (top to bottom).
    fn current_contents(&self) -> Vec<u64>;

    /// Operation history in linearization order.
    fn history(&self) -> StackHistory;
}

/// History of stack operations.
#[derive(Debug, Clone, Default)]
pub struct StackHistory {
    /// Sequence of operations in linearization order
    pub operations: Vec<StackOperation>,
}

/// A single stack operation.
#[derive(Debug, Clone)]
pub struct StackOperation {
    /// Thread that performed the operation
    pub thread_id: u64,
    /// Type of operation
    pub op_type: StackOpType,
    /// Element involved (pushed value, or pop result)
    pub element: Option<u64>,
    /// Step number for ordering
    pub step: u64,
}

/// Type of stack operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackOpType {
    Push,
    Pop,
    PopEmpty,
}

impl StackOperation {
    /// Short form for diagrams: `push(7)`, `pop=7`, `pop=None`.
    #[must_use]
    pub fn describe(&self) -> String {
        match (self.op_type, self.element) {
            (StackOpType::Push, Some(e)) => format!("push({e})"),
            (StackOpType::Pop, Some(e)) => format!("pop={e}"),
            _ => "pop=None".to_string(),
        }
    }
}

impl StackHistory {
    /// Create a new empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a push operation.
    pub fn record_push(&mut self, thread_id: u64, element: u64, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(StackOperation {
            thread_id,
            op_type: StackOpType::Push,
            element: Some(element),
            step,
        });
    }

    /// Record a pop operation. `None` records an empty pop.
    pub fn record_pop(&mut self, thread_id: u64, element: Option<u64>, step: u64) {
        debug_assert!(step > 0, "Step must be positive");
        self.operations.push(StackOperation {
            thread_id,
            op_type: if element.is_some() {
                StackOpType::Pop
            } else {
                StackOpType::PopEmpty
            },
            element,
            step,
        });
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Property checker for stack implementations.
pub struct StackPropertyChecker<'a, T: StackProperties> {
    stack: &'a T,
    dst_seed: Option<u64>,
}

impl<'a, T: StackProperties> StackPropertyChecker<'a, T> {
    /// Create a new checker for the given stack.
    #[must_use]
    pub fn new(stack: &'a T) -> Self {
        Self {
            stack,
            dst_seed: None,
        }
    }

    /// Set DST seed for counterexample reproduction.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.dst_seed = Some(seed);
        self
    }

    fn counterexample(&self) -> Counterexample {
        match self.dst_seed {
            Some(seed) => Counterexample::with_seed(seed),
            None => Counterexample::new(),
        }
    }

    /// NoLostElements
    ///
    /// Every element that was pushed must either be in the stack or
    /// have been popped.
    fn check_no_lost_elements(&self) -> PropertyResult {
        let pushed = self.stack.pushed_elements();
        let popped = self.stack.popped_elements();
        let contents: HashSet<u64> = self.stack.current_contents().into_iter().collect();

        let mut lost: Vec<u64> = pushed
            .iter()
            .filter(|e| !contents.contains(e) && !popped.contains(e))
            .copied()
            .collect();

        if lost.is_empty() {
            return PropertyResult::pass("NoLostElements");
        }
        lost.sort_unstable();

        let mut ce = self.counterexample();
        ce.add_state(StateSnapshot {
            step: 1,
            description: format!("Elements {:?} lost", lost),
            variables: vec![
                ("pushed".to_string(), format!("{:?}", pushed)),
                ("popped".to_string(), format!("{:?}", popped)),
                ("contents".to_string(), format!("{:?}", contents)),
            ],
        });

        PropertyResult::fail(
            "NoLostElements",
            format!(
                "Element {} was pushed but is neither in stack nor popped ({} lost in total)",
                lost[0],
                lost.len()
            ),
            Some(ce),
        )
    }

    /// NoDuplicates
    ///
    /// No element appears twice in the stack.
    fn check_no_duplicates(&self) -> PropertyResult {
        let contents = self.stack.current_contents();
        let mut seen = HashSet::with_capacity(contents.len());

        for element in &contents {
            if !seen.insert(*element) {
                return PropertyResult::fail(
                    "NoDuplicates",
                    format!("Element {} appears multiple times in stack", element),
                    None,
                );
            }
        }

        PropertyResult::pass("NoDuplicates")
    }

    /// PoppedOnce
    ///
    /// A value handed out by a pop is never handed out again. A second
    /// pop of the same node would mean its value was read after the
    /// node was reclaimed or unlinked twice.
    fn check_popped_once(&self) -> PropertyResult {
        let history = self.stack.history();
        let mut pops: HashMap<u64, u64> = HashMap::new();

        for op in &history.operations {
            if let (StackOpType::Pop, Some(element)) = (op.op_type, op.element) {
                let count = pops.entry(element).or_insert(0);
                *count += 1;
                if *count > 1 {
                    return PropertyResult::fail(
                        "PoppedOnce",
                        format!("Element {} popped twice (second at step {})", element, op.step),
                        None,
                    );
                }
            }
        }

        PropertyResult::pass("PoppedOnce")
    }

    /// PoppedWerePushed
    ///
    /// Pops never fabricate values.
    fn check_popped_were_pushed(&self) -> PropertyResult {
        let pushed = self.stack.pushed_elements();
        let popped = self.stack.popped_elements();

        let mut fabricated: Vec<u64> = popped.difference(&pushed).copied().collect();
        if fabricated.is_empty() {
            return PropertyResult::pass("PoppedWerePushed");
        }
        fabricated.sort_unstable();

        PropertyResult::fail(
            "PoppedWerePushed",
            format!("Popped elements {:?} were never pushed", fabricated),
            None,
        )
    }

    /// LIFO_Order
    ///
    /// Replays the history against a model stack and checks that every
    /// pop result matches. Only meaningful for histories recorded in
    /// linearization order. A failure carries the interleaving up to the
    /// offending step.
    fn check_lifo_order(&self) -> PropertyResult {
        let history = self.stack.history();
        let mut model_stack: Vec<u64> = Vec::new();

        for (index, op) in history.operations.iter().enumerate() {
            let mismatch = match (op.op_type, op.element) {
                (StackOpType::Push, Some(element)) => {
                    model_stack.push(element);
                    None
                }
                (StackOpType::Push, None) => None,
                (StackOpType::Pop, Some(returned)) => match model_stack.pop() {
                    Some(top) if top == returned => None,
                    Some(top) => Some(format!("pop returned {returned} but model top was {top}")),
                    None => Some(format!("pop returned {returned} but model stack was empty")),
                },
                (StackOpType::Pop | StackOpType::PopEmpty, None) if !model_stack.is_empty() => {
                    Some(format!(
                        "pop returned empty but model holds {} elements",
                        model_stack.len()
                    ))
                }
                _ => None,
            };

            if let Some(reason) = mismatch {
                let mut ce = self.counterexample();
                for prior in &history.operations[..=index] {
                    ce.add_action(ThreadAction {
                        thread_id: prior.thread_id,
                        step: prior.step,
                        action: prior.describe(),
                        success: prior.step != op.step,
                    });
                }
                return PropertyResult::fail(
                    "LIFO_Order",
                    format!("LIFO violated at step {}: {reason}", op.step),
                    Some(ce.with_description(reason)),
                );
            }
        }

        PropertyResult::pass("LIFO_Order")
    }
}

impl<T: StackProperties> PropertyChecker for StackPropertyChecker<'_, T> {
    fn check_all(&self) -> Vec<PropertyResult> {
        vec![
            self.check_no_lost_elements(),
            self.check_no_duplicates(),
            self.check_popped_once(),
            self.check_popped_were_pushed(),
            self.check_lifo_order(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sequential model implementing StackProperties
    struct TestStack {
        pushed: HashSet<u64>,
        popped: HashSet<u64>,
        contents: Vec<u64>,
        history: StackHistory,
    }

    impl TestStack {
        fn new() -> Self {
            Self {
                pushed: HashSet::new(),
                popped: HashSet::new(),
                contents: Vec::new(),
                history: StackHistory::new(),
            }
        }

        fn push(&mut self, val: u64) {
            self.pushed.insert(val);
            self.contents.push(val);
            let step = self.history.len() as u64 + 1;
            self.history.record_push(0, val, step);
        }

        fn pop(&mut self) -> Option<u64> {
            let val = self.contents.pop();
            if let Some(v) = val {
                self.popped.insert(v);
            }
            let step = self.history.len() as u64 + 1;
            self.history.record_pop(0, val, step);
            val
        }
    }

    impl StackProperties for TestStack {
        fn pushed_elements(&self) -> HashSet<u64> {
            self.pushed.clone()
        }

        fn popped_elements(&self) -> HashSet<u64> {
            self.popped.clone()
        }

        fn current_contents(&self) -> Vec<u64> {
            // Top to bottom
            self.contents.iter().rev().copied().collect()
        }

        fn history(&self) -> StackHistory {
            self.history.clone()
        }
    }

    #[test]
    fn test_correct_stack_passes_all() {
        let mut stack = TestStack::new();
        stack.push(1);
        stack.push(2);
        stack.push(3);
        stack.pop();
        stack.pop();
        stack.pop();
        stack.pop();

        let checker = StackPropertyChecker::new(&stack);
        assert!(checker.all_hold(), "{}", checker.report());
    }

    #[test]
    fn test_lost_element_detected() {
        let stack = TestStack {
            pushed: [1, 2, 3].into_iter().collect(),
            popped: [1].into_iter().collect(),
            contents: vec![2], // 3 is missing
            history: StackHistory::new(),
        };

        let checker = StackPropertyChecker::new(&stack).with_seed(7);
        let results = checker.check_all();

        let no_lost = results.iter().find(|r| r.name == "NoLostElements").unwrap();
        assert!(!no_lost.holds);
        assert!(no_lost.violation.as_ref().unwrap().contains('3'));
        assert_eq!(no_lost.counterexample.as_ref().unwrap().dst_seed, Some(7));
    }

    #[test]
    fn test_duplicate_detected() {
        let stack = TestStack {
            pushed: [1, 2].into_iter().collect(),
            popped: HashSet::new(),
            contents: vec![1, 1, 2],
            history: StackHistory::new(),
        };

        let checker = StackPropertyChecker::new(&stack);
        let results = checker.check_all();

        let no_dup = results.iter().find(|r| r.name == "NoDuplicates").unwrap();
        assert!(!no_dup.holds);
    }

    #[test]
    fn test_double_pop_detected() {
        let mut history = StackHistory::new();
        history.record_push(0, 5, 1);
        history.record_pop(0, Some(5), 2);
        history.record_pop(1, Some(5), 3);

        let stack = TestStack {
            pushed: [5].into_iter().collect(),
            popped: [5].into_iter().collect(),
            contents: vec![],
            history,
        };

        let checker = StackPropertyChecker::new(&stack);
        let violations = checker.violations();
        assert!(violations.iter().any(|r| r.name == "PoppedOnce"));
    }

    #[test]
    fn test_lifo_violation_detected() {
        let mut history = StackHistory::new();
        history.record_push(0, 1, 1);
        history.record_push(0, 2, 2);
        history.record_pop(0, Some(1), 3);

        let stack = TestStack {
            pushed: [1, 2].into_iter().collect(),
            popped: [1].into_iter().collect(),
            contents: vec![2],
            history,
        };

        let checker = StackPropertyChecker::new(&stack);
        let violations = checker.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "LIFO_Order");

        let diagram = violations[0].counterexample.as_ref().unwrap().render_diagram();
        assert!(diagram.contains("push(2)"), "{diagram}");
        assert!(diagram.contains("pop=1 [FAIL]"), "{diagram}");
        assert!(diagram.contains("model top was 2"), "{diagram}");
    }

    #[test]
    fn test_empty_pop_with_elements_is_violation() {
        let mut history = StackHistory::new();
        history.record_push(0, 9, 1);
        history.record_pop(0, None, 2);

        let stack = TestStack {
            pushed: [9].into_iter().collect(),
            popped: HashSet::new(),
            contents: vec![9],
            history,
        };

        let checker = StackPropertyChecker::new(&stack);
        assert!(!checker.all_hold());
    }
}
