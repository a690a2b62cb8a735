//! Property results and the checker trait.
//!
//! A property is a named invariant. Checking it yields a
//! `PropertyResult` that either holds or carries a violation message
//! and, when available, a counterexample for reproduction.

use std::fmt;

use crate::counterexample::Counterexample;

/// Outcome of checking a single property.
#[derive(Debug, Clone)]
pub struct PropertyResult {
    /// Property name (e.g. `NoLostElements`)
    pub name: &'static str,
    /// Whether the property held
    pub holds: bool,
    /// Human-readable violation, present iff `holds` is false
    pub violation: Option<String>,
    /// Failure path, if the checker could build one
    pub counterexample: Option<Counterexample>,
}

impl PropertyResult {
    /// A property that held.
    #[must_use]
    pub fn pass(name: &'static str) -> Self {
        Self {
            name,
            holds: true,
            violation: None,
            counterexample: None,
        }
    }

    /// A property that was violated.
    #[must_use]
    pub fn fail(
        name: &'static str,
        violation: String,
        counterexample: Option<Counterexample>,
    ) -> Self {
        debug_assert!(!violation.is_empty(), "Violation message must not be empty");
        Self {
            name,
            holds: false,
            violation: Some(violation),
            counterexample,
        }
    }
}

impl fmt::Display for PropertyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.violation {
            None => write!(f, "[PASS] {}", self.name),
            Some(violation) => {
                write!(f, "[FAIL] {}: {}", self.name, violation)?;
                if let Some(ce) = &self.counterexample {
                    write!(f, "\n{}", ce.render_diagram())?;
                }
                Ok(())
            }
        }
    }
}

/// Something that can check a fixed set of properties.
pub trait PropertyChecker {
    /// Check every property and return one result per property.
    fn check_all(&self) -> Vec<PropertyResult>;

    /// True if every property holds.
    fn all_hold(&self) -> bool {
        self.check_all().iter().all(|r| r.holds)
    }

    /// Only the violated properties.
    fn violations(&self) -> Vec<PropertyResult> {
        self.check_all().into_iter().filter(|r| !r.holds).collect()
    }

    /// One line per property, for test output.
    fn report(&self) -> String {
        self.check_all()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<PropertyResult>);

    impl PropertyChecker for Fixed {
        fn check_all(&self) -> Vec<PropertyResult> {
            self.0.clone()
        }
    }

    #[test]
    fn test_all_hold_and_violations() {
        let ok = Fixed(vec![PropertyResult::pass("A"), PropertyResult::pass("B")]);
        assert!(ok.all_hold());
        assert!(ok.violations().is_empty());

        let bad = Fixed(vec![
            PropertyResult::pass("A"),
            PropertyResult::fail("B", "broken".to_string(), None),
        ]);
        assert!(!bad.all_hold());
        let violations = bad.violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "B");
    }

    #[test]
    fn test_report_format() {
        let checker = Fixed(vec![
            PropertyResult::pass("NoLostElements"),
            PropertyResult::fail("NoDuplicates", "Element 7 twice".to_string(), None),
        ]);
        let report = checker.report();
        assert!(report.contains("[PASS] NoLostElements"));
        assert!(report.contains("[FAIL] NoDuplicates: Element 7 twice"));
    }
}
