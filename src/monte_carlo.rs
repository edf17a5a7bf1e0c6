use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ParameterSet;
use crate::error::{ConfigError, RunError};
use crate::rng::{self, SimRng};
use crate::simulation::{RunResult, Simulation};

/// Shared stop flag, checked by every run between months.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A run that produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub run_index: u64,
    pub message: String,
    pub cancelled: bool,
}

/// Everything a batch produced, in run-index order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub master_seed: u64,
    pub requested_runs: u64,
    pub runs: Vec<RunResult>,
    pub failures: Vec<RunFailure>,
    pub elapsed_ms: u64,
}

impl BatchOutcome {
    pub fn completed_runs(&self) -> u64 {
        self.runs.len() as u64
    }

    pub fn cancelled_runs(&self) -> u64 {
        self.failures.iter().filter(|f| f.cancelled).count() as u64
    }

    /// Fewer results than requested, for any reason.
    pub fn is_partial(&self) -> bool {
        self.completed_runs() < self.requested_runs
    }
}

/// Batch settings: seed, run count, and optional timeout and cancellation.
/// Each run is dispatched whole onto the rayon pool with its own substream.
#[derive(Debug, Clone)]
pub struct MonteCarlo {
    master_seed: u64,
    runs: u64,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl MonteCarlo {
    pub fn new(master_seed: u64, runs: u64) -> Self {
        MonteCarlo { master_seed, runs, timeout: None, cancel: CancelToken::new() }
    }

    /// Abandon runs that have not finished when the batch has run this long.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn run(&self, params: &ParameterSet) -> Result<BatchOutcome, ConfigError> {
        self.run_with(params, |params, run_index, rng, should_stop| {
            Simulation::from_params(params, rng).with_run_index(run_index).run_until(should_stop)
        })
    }

    /// Run the batch with a custom single-run function. A panic inside
    /// `simulate` fails that run only.
    pub fn run_with<F>(&self, params: &ParameterSet, simulate: F) -> Result<BatchOutcome, ConfigError>
    where
        F: Fn(&ParameterSet, u64, SimRng, &dyn Fn() -> bool) -> Result<RunResult, RunError> + Sync,
    {
        if self.runs == 0 {
            return Err(ConfigError::ZeroRuns);
        }
        let started = Instant::now();
        let deadline = self.timeout.map(|t| started + t);
        info!(
            target: "claysim::batch",
            runs = self.runs,
            seed = self.master_seed,
            horizon = params.horizon_months,
            "starting batch"
        );

        let should_stop = || self.cancel.is_cancelled() || deadline.is_some_and(|d| Instant::now() >= d);

        let outcomes: Vec<(u64, Result<RunResult, RunError>)> = (0..self.runs)
            .into_par_iter()
            .map(|run_index| {
                let rng = rng::derive_stream(self.master_seed, run_index);
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    simulate(params, run_index, rng, &should_stop)
                }))
                .unwrap_or_else(|payload| Err(RunError::Panicked { message: panic_message(payload.as_ref()) }));
                (run_index, result)
            })
            .collect();

        let mut runs = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (run_index, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    debug!(
                        target: "claysim::batch",
                        run = run_index,
                        ending_cash = result.ending_cash,
                        min_cash = result.min_cash,
                        "run complete"
                    );
                    runs.push(result);
                }
                Err(error) => {
                    let cancelled = matches!(error, RunError::Cancelled { .. });
                    if !cancelled {
                        warn!(target: "claysim::batch", run = run_index, %error, "run failed; batch continues");
                    }
                    failures.push(RunFailure { run_index, message: error.to_string(), cancelled });
                }
            }
        }

        let outcome = BatchOutcome {
            master_seed: self.master_seed,
            requested_runs: self.runs,
            runs,
            failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        if outcome.is_partial() {
            warn!(
                target: "claysim::batch",
                requested = outcome.requested_runs,
                completed = outcome.completed_runs(),
                cancelled = outcome.cancelled_runs(),
                "batch incomplete"
            );
        }
        info!(
            target: "claysim::batch",
            completed = outcome.completed_runs(),
            failed = outcome.failures.len(),
            elapsed_ms = outcome.elapsed_ms,
            "batch finished"
        );
        Ok(outcome)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(horizon: u32) -> ParameterSet {
        ParameterSet::builder().horizon_months(horizon).build().expect("canonical params")
    }

    #[test]
    fn zero_runs_is_a_config_error() {
        let err = MonteCarlo::new(1, 0).run(&params(12)).unwrap_err();
        assert_eq!(err, ConfigError::ZeroRuns);
    }

    #[test]
    fn results_are_in_run_index_order() {
        let outcome = MonteCarlo::new(42, 16).run(&params(6)).expect("batch");
        let indices: Vec<u64> = outcome.runs.iter().map(|r| r.run_index).collect();
        assert_eq!(indices, (0..16).collect::<Vec<_>>());
        assert!(!outcome.is_partial());
    }

    #[test]
    fn batch_is_reproducible() {
        let p = params(12);
        let a = MonteCarlo::new(9, 12).run(&p).expect("batch");
        let b = MonteCarlo::new(9, 12).run(&p).expect("batch");
        assert_eq!(a.runs, b.runs);
    }

    #[test]
    fn panicking_run_is_isolated() {
        let p = params(6);
        let outcome = MonteCarlo::new(3, 8)
            .run_with(&p, |params, run_index, rng, should_stop| {
                if run_index == 5 {
                    panic!("boom in run {run_index}");
                }
                Simulation::from_params(params, rng).with_run_index(run_index).run_until(should_stop)
            })
            .expect("batch");
        assert_eq!(outcome.completed_runs(), 7);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].run_index, 5);
        assert!(outcome.failures[0].message.contains("boom in run 5"), "{}", outcome.failures[0].message);
        assert!(!outcome.failures[0].cancelled);
        assert!(outcome.is_partial());
    }

    #[test]
    fn cancelled_batch_is_reported_partial() {
        let mc = MonteCarlo::new(1, 4);
        mc.cancel_token().cancel();
        let outcome = mc.run(&params(12)).expect("batch");
        assert_eq!(outcome.completed_runs(), 0);
        assert_eq!(outcome.cancelled_runs(), 4);
        assert!(outcome.is_partial());
    }

    #[test]
    fn elapsed_timeout_abandons_runs() {
        let outcome = MonteCarlo::new(1, 4)
            .with_timeout(Duration::ZERO)
            .run(&params(12))
            .expect("batch");
        assert_eq!(outcome.cancelled_runs(), 4);
    }
}
