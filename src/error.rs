use thiserror::Error;

/// Structural problems with a set of assumptions. Raised by
/// [`ParameterSetBuilder::build`](crate::config::ParameterSetBuilder::build),
/// never once a run has started.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{what} probabilities must sum to 1.0, got {sum}")]
    MixNotNormalized { what: &'static str, sum: f64 },

    #[error("invalid term for {loan}: {detail}")]
    InvalidTerm { loan: &'static str, detail: String },

    #[error("invalid value for {field}: {value} ({reason})")]
    InvalidValue { field: &'static str, value: f64, reason: &'static str },

    #[error("simulation horizon must be at least one month")]
    ZeroHorizon,

    #[error("a batch needs at least one run")]
    ZeroRuns,

    #[error("grant scheduled for month {month} lies outside the {horizon}-month horizon")]
    GrantOutsideHorizon { month: u32, horizon: u32 },
}

/// Why a single run did not produce a [`RunResult`](crate::simulation::RunResult).
/// Both cases are isolated to the run; the batch carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("cancelled before month {month}")]
    Cancelled { month: u32 },

    #[error("run panicked: {message}")]
    Panicked { message: String },
}
