use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ShockConfig;
use crate::rng;
use crate::types::CalendarMonth;

/// Downturn / recovery state machine, one per run.
///
/// `downturn_remaining_months` and `recovery_remaining_months` count the
/// current month, so a freshly drawn 3-month downturn is active for exactly
/// three calls to [`advance`](Self::advance).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroState {
    pub downturn_active: bool,
    pub downturn_remaining_months: u32,
    pub recovery_remaining_months: u32,
}

impl MacroState {
    /// Move into the next month: age the current phase, then (if no downturn is
    /// running) draw whether one starts.
    pub fn advance(&mut self, cfg: &ShockConfig, rng: &mut impl Rng) {
        if self.downturn_active {
            self.downturn_remaining_months = self.downturn_remaining_months.saturating_sub(1);
            if self.downturn_remaining_months == 0 {
                self.downturn_active = false;
                self.recovery_remaining_months = cfg.recovery_months;
            }
        } else {
            self.recovery_remaining_months = self.recovery_remaining_months.saturating_sub(1);
        }

        if !self.downturn_active && rng::bernoulli(rng, cfg.downturn_probability) {
            let drawn = rng::normal(rng, cfg.duration_mean_months, cfg.duration_sd_months);
            self.downturn_active = true;
            self.downturn_remaining_months = duration_months(drawn);
            self.recovery_remaining_months = 0;
        }
    }

    /// Multiplier on pool join rates this month.
    pub fn join_multiplier(&self, cfg: &ShockConfig) -> f64 {
        if self.downturn_active {
            cfg.join_severity
        } else if self.recovery_remaining_months > 0 {
            cfg.recovery_join_uplift
        } else {
            1.0
        }
    }

    /// Multiplier on referral conversion this month. Recovery does not lift referrals.
    pub fn referral_multiplier(&self, cfg: &ShockConfig) -> f64 {
        if self.downturn_active { cfg.join_severity } else { 1.0 }
    }

    pub fn churn_multiplier(&self, cfg: &ShockConfig) -> f64 {
        if self.downturn_active { cfg.churn_uplift } else { 1.0 }
    }
}

/// Round a drawn duration to whole months, never below one.
fn duration_months(drawn: f64) -> u32 {
    if drawn.is_finite() { drawn.round().max(1.0) as u32 } else { 1 }
}

/// Seasonal multiplier on baseline join rates for a calendar month.
pub fn seasonality(cfg: &ShockConfig, month: CalendarMonth) -> f64 {
    cfg.seasonality[month.index()]
}
