use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::monte_carlo::{BatchOutcome, RunFailure};
use crate::simulation::RunResult;
use crate::types::Month;

/// Distribution statistics for one metric across N simulation runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistStats {
    pub n: usize,
    pub min: f64,
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Sorts `values` in place. `None` when empty.
pub fn percentile_stats(values: &mut [f64]) -> Option<DistStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();

    let interp = |p: f64| -> f64 {
        let h = p * (n - 1) as f64;
        let lo = h.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = h - lo as f64;
        values[lo] * (1.0 - frac) + values[hi] * frac
    };

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = if n > 1 {
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };

    Some(DistStats {
        n,
        min: values[0],
        p5: interp(0.05),
        p10: interp(0.10),
        p25: interp(0.25),
        p50: interp(0.50),
        p75: interp(0.75),
        p90: interp(0.90),
        p95: interp(0.95),
        max: values[n - 1],
        mean,
        std_dev: variance.sqrt(),
    })
}

/// Cross-run bands of every numeric [`MonthRecord`](crate::simulation::MonthRecord)
/// field for one month index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthBands {
    pub month: Month,
    pub fields: BTreeMap<String, DistStats>,
}

impl MonthBands {
    pub fn field(&self, name: &str) -> Option<&DistStats> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Share of completed runs whose cash balance ever went below zero.
    pub prob_cash_negative: f64,
    /// Share of completed runs with at least one DSCR covenant breach.
    pub prob_dscr_breach: f64,
    /// First cash-out month, over runs that ran out of cash.
    pub first_cash_out_month: Option<DistStats>,
    /// Runs by first cash-out month.
    pub first_cash_out_histogram: BTreeMap<u32, u64>,
    pub min_cash: Option<DistStats>,
    pub ending_cash: Option<DistStats>,
    pub cumulative_joins: Option<DistStats>,
    pub mean_dscr_breach_months: f64,
}

/// Batch-level result: per-month bands, risk metrics and completion metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub master_seed: u64,
    pub requested_runs: u64,
    pub completed_runs: u64,
    pub cancelled_runs: u64,
    pub failures: Vec<RunFailure>,
    pub months: Vec<MonthBands>,
    pub risk: RiskMetrics,
}

impl AggregateResult {
    pub fn is_partial(&self) -> bool {
        self.completed_runs < self.requested_runs
    }

    pub fn month(&self, month: Month) -> Option<&MonthBands> {
        self.months.iter().find(|b| b.month == month)
    }
}

/// Aggregate a batch. Depends only on the completed runs and their order, so
/// the same batch always aggregates to the same result.
pub fn aggregate(batch: &BatchOutcome) -> AggregateResult {
    AggregateResult {
        master_seed: batch.master_seed,
        requested_runs: batch.requested_runs,
        completed_runs: batch.completed_runs(),
        cancelled_runs: batch.cancelled_runs(),
        failures: batch.failures.clone(),
        months: month_bands(&batch.runs),
        risk: risk_metrics(&batch.runs),
    }
}

pub fn month_bands(runs: &[RunResult]) -> Vec<MonthBands> {
    let horizon = runs.iter().map(|r| r.records.len()).max().unwrap_or(0);
    (0..horizon)
        .map(|i| {
            let mut columns: BTreeMap<&'static str, Vec<f64>> = BTreeMap::new();
            for record in runs.iter().filter_map(|r| r.records.get(i)) {
                for (name, value) in record.numeric_fields() {
                    columns.entry(name).or_default().push(value);
                }
            }
            let fields = columns
                .into_iter()
                .filter_map(|(name, mut values)| percentile_stats(&mut values).map(|s| (name.to_string(), s)))
                .collect();
            MonthBands { month: Month(i as u32 + 1), fields }
        })
        .collect()
}

pub fn risk_metrics(runs: &[RunResult]) -> RiskMetrics {
    let n = runs.len();
    let share = |count: usize| if n == 0 { 0.0 } else { count as f64 / n as f64 };

    let mut histogram = BTreeMap::new();
    for m in runs.iter().filter_map(|r| r.first_cash_out_month) {
        *histogram.entry(m.0).or_insert(0u64) += 1;
    }

    let mut first_out: Vec<f64> = runs.iter().filter_map(|r| r.first_cash_out_month).map(|m| m.0 as f64).collect();
    let mut min_cash: Vec<f64> = runs.iter().map(|r| r.min_cash).collect();
    let mut ending: Vec<f64> = runs.iter().map(|r| r.ending_cash).collect();
    let mut joins: Vec<f64> = runs.iter().map(|r| r.cumulative_joins as f64).collect();
    let breach_months: u32 = runs.iter().map(|r| r.dscr_breach_months).sum();

    RiskMetrics {
        prob_cash_negative: share(runs.iter().filter(|r| r.went_cash_negative()).count()),
        prob_dscr_breach: share(runs.iter().filter(|r| r.any_dscr_breach()).count()),
        first_cash_out_month: percentile_stats(&mut first_out),
        first_cash_out_histogram: histogram,
        min_cash: percentile_stats(&mut min_cash),
        ending_cash: percentile_stats(&mut ending),
        cumulative_joins: percentile_stats(&mut joins),
        mean_dscr_breach_months: if n == 0 { 0.0 } else { breach_months as f64 / n as f64 },
    }
}
