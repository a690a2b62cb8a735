//! # cs-dst
//!
//! Deterministic simulation and stress testing for the split-count stack.
//!
//! All randomness flows from one seed, so a failing run can be replayed.
//!
//! ## Harnesses
//!
//! - `fault_injection`: single-driver runs with faults at operation
//!   boundaries, checked step by step against a sequential model.
//! - `harness`: real OS threads hammering one stack, verified for loss,
//!   duplication and, with a ledger, reclamation balance.
//!
//! ## Usage
//!
//! ```rust
//! use cs_dst::{run_dst_scenario, DstOp};
//! use cs_stack::TrackedStack;
//!
//! let ops = vec![DstOp::Push(1), DstOp::Push(2), DstOp::Pop];
//! let result = run_dst_scenario::<TrackedStack>(12345, ops);
//! assert!(result.passed, "{}", result.format());
//! ```
//!
//! ## Reproducibility
//!
//! To reproduce a failing test:
//! ```bash
//! DST_SEED=12345 cargo test -p cs-dst
//! DST_ITERATIONS=1000 cargo test -p cs-dst --release
//! ```

pub mod env;
pub mod error;
pub mod fault;
pub mod fault_injection;
pub mod harness;
pub mod random;

pub use env::DstEnv;
pub use error::HarnessError;
pub use fault::{FaultConfig, FaultInjector, FaultStats};
pub use fault_injection::{
    generate_ops, run_dst_scenario, run_dst_scenario_with, DstOp, DstResult, DstRunner,
    DstStats, DstTestableStack, FaultPoint, FaultType,
};
pub use harness::{HarnessConfig, HarnessResult, StressHarness, StressTestableStack};
pub use random::DeterministicRng;

/// Get DST seed from environment or generate random one.
///
/// Prints the seed for reproduction. Use `DST_SEED=<seed>` to reproduce.
pub fn get_or_generate_seed() -> Result<u64, HarnessError> {
    let seed = match read_u64_env("DST_SEED")? {
        Some(seed) => {
            println!("DST_SEED={seed} (from environment)");
            seed
        }
        None => {
            let seed = rand::random::<u64>();
            println!("DST_SEED={seed} (randomly generated)");
            seed
        }
    };
    tracing::info!(seed, "DST seed selected");
    Ok(seed)
}

/// Iteration count from `DST_ITERATIONS`, or `default`.
pub fn iterations_from_env(default: u64) -> Result<u64, HarnessError> {
    Ok(read_u64_env("DST_ITERATIONS")?.unwrap_or(default))
}

fn read_u64_env(var: &'static str) -> Result<Option<u64>, HarnessError> {
    match std::env::var(var) {
        Ok(value) => parse_u64(var, &value).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_u64(var: &'static str, value: &str) -> Result<u64, HarnessError> {
    value
        .trim()
        .parse()
        .map_err(|_| HarnessError::InvalidEnvVar {
            var,
            value: value.to_owned(),
        })
}

/// Install a `RUST_LOG`-filtered subscriber for tests. Safe to call from
/// every test; only the first call installs.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64("DST_SEED", "42"), Ok(42));
        assert_eq!(parse_u64("DST_SEED", " 7\n"), Ok(7));
        assert_eq!(
            parse_u64("DST_SEED", "abc"),
            Err(HarnessError::InvalidEnvVar {
                var: "DST_SEED",
                value: "abc".to_owned(),
            })
        );
    }

    #[test]
    fn test_invalid_env_var_message() {
        let err = parse_u64("DST_ITERATIONS", "-1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "DST_ITERATIONS must be a valid u64, got \"-1\""
        );
    }
}
