use thiserror::Error;

/// Misconfiguration of a DST or stress run.
#[derive(Debug, Error, PartialEq)]
pub enum HarnessError {
    #[error("{var} must be a valid u64, got {value:?}")]
    InvalidEnvVar { var: &'static str, value: String },

    #[error("harness needs at least one thread")]
    NoThreads,

    #[error("too many threads for a stress run: {0} (max {max})", max = crate::harness::MAX_THREADS)]
    TooManyThreads(usize),

    #[error("push probability must be within [0, 1], got {0}")]
    InvalidPushProbability(f64),
}
