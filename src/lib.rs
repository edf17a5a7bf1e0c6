pub mod analysis;
pub mod capacity;
pub mod config;
pub mod costs;
pub mod error;
pub mod finance;
pub mod market;
pub mod members;
pub mod monte_carlo;
pub mod referral;
pub mod revenue;
pub mod rng;
pub mod shocks;
pub mod simulation;
pub mod types;

pub use analysis::{AggregateResult, aggregate};
pub use config::{Assumptions, ParameterSet, ParameterSetBuilder};
pub use error::{ConfigError, RunError};
pub use monte_carlo::{BatchOutcome, CancelToken, MonteCarlo};
pub use simulation::{MonthRecord, RunResult, Simulation, run_single};
