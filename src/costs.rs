use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{Assumptions, CostConfig, StaffingConfig};
use crate::rng;
use crate::types::{CalendarMonth, EntityType, Month};

/// Operating costs for one month, excluding the direct costs of revenue
/// streams (clay, firing, programs) which the revenue model reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatingCosts {
    pub rent: f64,
    pub insurance: f64,
    pub glaze_supply: f64,
    pub heating: f64,
    /// Utilities other than kiln energy.
    pub utilities: f64,
    pub marketing: f64,
    pub maintenance: f64,
    pub staffing: f64,
    pub water: f64,
    /// Owner salary under the salary-split entity; 0 otherwise.
    pub owner_salary: f64,
}

impl OperatingCosts {
    pub fn fixed(&self) -> f64 {
        self.rent + self.insurance + self.glaze_supply + self.heating + self.utilities + self.marketing
    }

    pub fn total(&self) -> f64 {
        self.fixed() + self.maintenance + self.staffing + self.water + self.owner_salary
    }
}

/// One-way staffing hire. Once membership reaches the threshold the studio
/// keeps paying staff whatever happens to membership afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffingLatch {
    hired_in: Option<Month>,
}

impl StaffingLatch {
    /// Update with this month's membership; returns whether staff are on payroll.
    pub fn observe(&mut self, cfg: &StaffingConfig, members: u32, month: Month) -> bool {
        if self.hired_in.is_none() && members >= cfg.hire_threshold_members {
            self.hired_in = Some(month);
        }
        self.is_hired()
    }

    pub fn is_hired(&self) -> bool {
        self.hired_in.is_some()
    }

    pub fn hired_in(&self) -> Option<Month> {
        self.hired_in
    }
}

/// Base rent compounded once per elapsed simulation year.
pub fn rent(cfg: &CostConfig, month: Month) -> f64 {
    cfg.rent * (1.0 + cfg.rent_escalator).powi(month.year_index() as i32)
}

pub fn heating(cfg: &CostConfig, calendar: CalendarMonth) -> f64 {
    if cfg.winter_months.contains(&calendar.0) { cfg.heating_winter } else { cfg.heating_summer }
}

/// Marketing at the ramp multiple through the startup window, base afterwards.
pub fn marketing(cfg: &CostConfig, month: Month) -> f64 {
    if month.0 <= cfg.marketing_ramp_months {
        cfg.marketing_base * cfg.marketing_ramp_multiplier
    } else {
        cfg.marketing_base
    }
}

/// `max(0, base + N(0, sd))`. Always consumes one draw when `sd > 0`.
pub fn maintenance(cfg: &CostConfig, rng: &mut impl Rng) -> f64 {
    (cfg.maintenance_base + rng::normal(rng, 0.0, cfg.maintenance_sd)).max(0.0)
}

pub fn owner_salary(a: &Assumptions) -> f64 {
    match a.tax.entity {
        EntityType::SalarySplit => a.tax.owner_salary,
        EntityType::PassThrough | EntityType::TaxableCorporation => 0.0,
    }
}

/// Monthly operating costs. `clay_bags` drives the water bill; `staffed` comes
/// from the caller's [`StaffingLatch`].
pub fn operating_costs(
    a: &Assumptions,
    month: Month,
    clay_bags: f64,
    staffed: bool,
    rng: &mut impl Rng,
) -> OperatingCosts {
    let c = &a.costs;
    OperatingCosts {
        rent: rent(c, month),
        insurance: c.insurance,
        glaze_supply: c.glaze_supply,
        heating: heating(c, month.calendar(a.start_calendar())),
        utilities: c.utilities_base,
        marketing: marketing(c, month),
        maintenance: maintenance(c, rng),
        staffing: if staffed { a.staffing.monthly_cost } else { 0.0 },
        water: clay_bags * a.clay.water_cost_per_bag,
        owner_salary: owner_salary(a),
    }
}

/// Expected monthly operating expense before any members arrive. Sizes the
/// working-capital loan, so it is deterministic: heating is averaged over the
/// year and maintenance is taken at its base.
pub fn baseline_monthly_opex(a: &Assumptions) -> f64 {
    let c = &a.costs;
    let heating_avg = (1..=12u8).map(|m| heating(c, CalendarMonth(m))).sum::<f64>() / 12.0;
    c.rent + c.insurance + c.glaze_supply + heating_avg + c.utilities_base + c.marketing_base
        + c.maintenance_base
        + owner_salary(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::derive_stream;

    fn costs() -> CostConfig {
        Assumptions::canonical().costs
    }

    #[test]
    fn rent_compounds_once_a_year() {
        let c = costs();
        assert_eq!(rent(&c, Month(1)), c.rent);
        assert_eq!(rent(&c, Month(12)), c.rent);
        assert!((rent(&c, Month(13)) - c.rent * 1.03).abs() < 1e-9);
        assert!((rent(&c, Month(25)) - c.rent * 1.03 * 1.03).abs() < 1e-9);
    }

    #[test]
    fn heating_follows_calendar() {
        let c = costs();
        assert_eq!(heating(&c, CalendarMonth(1)), c.heating_winter);
        assert_eq!(heating(&c, CalendarMonth(7)), c.heating_summer);
        assert_eq!(heating(&c, CalendarMonth(12)), c.heating_winter);
    }

    #[test]
    fn heating_respects_start_calendar_month() {
        let mut a = Assumptions::canonical();
        a.start_calendar_month = 6;
        let mut rng = derive_stream(1, 0);
        // simulation month 1 is June, month 8 is January
        assert_eq!(operating_costs(&a, Month(1), 0.0, false, &mut rng).heating, a.costs.heating_summer);
        assert_eq!(operating_costs(&a, Month(8), 0.0, false, &mut rng).heating, a.costs.heating_winter);
    }

    #[test]
    fn marketing_ramps_then_settles() {
        let c = costs();
        assert_eq!(marketing(&c, Month(1)), c.marketing_base * c.marketing_ramp_multiplier);
        assert_eq!(marketing(&c, Month(c.marketing_ramp_months)), c.marketing_base * c.marketing_ramp_multiplier);
        assert_eq!(marketing(&c, Month(c.marketing_ramp_months + 1)), c.marketing_base);
    }

    #[test]
    fn maintenance_never_negative() {
        let mut c = costs();
        c.maintenance_base = 10.0;
        c.maintenance_sd = 500.0;
        let mut rng = derive_stream(9, 0);
        for _ in 0..500 {
            assert!(maintenance(&c, &mut rng) >= 0.0);
        }
    }

    #[test]
    fn staffing_latch_never_unhires() {
        let cfg = StaffingConfig { hire_threshold_members: 50, monthly_cost: 2800.0 };
        let mut latch = StaffingLatch::default();
        assert!(!latch.observe(&cfg, 49, Month(1)));
        assert!(latch.observe(&cfg, 50, Month(2)));
        assert!(latch.observe(&cfg, 10, Month(3)), "hire must stick after membership falls");
        assert!(latch.observe(&cfg, 49, Month(4)));
        assert_eq!(latch.hired_in(), Some(Month(2)));
    }

    #[test]
    fn water_scales_with_clay_volume() {
        let a = Assumptions::canonical();
        let mut rng = derive_stream(1, 0);
        let out = operating_costs(&a, Month(1), 40.0, false, &mut rng);
        assert!((out.water - 40.0 * a.clay.water_cost_per_bag).abs() < 1e-12);
        assert_eq!(out.staffing, 0.0);
    }

    #[test]
    fn owner_salary_only_for_salary_split() {
        let mut a = Assumptions::canonical();
        assert_eq!(owner_salary(&a), 0.0);
        a.tax.entity = EntityType::SalarySplit;
        assert_eq!(owner_salary(&a), a.tax.owner_salary);
        a.tax.entity = EntityType::TaxableCorporation;
        assert_eq!(owner_salary(&a), 0.0);
    }

    #[test]
    fn baseline_opex_covers_fixed_costs() {
        let a = Assumptions::canonical();
        let c = &a.costs;
        let floor = c.rent + c.insurance + c.glaze_supply + c.heating_summer + c.utilities_base + c.marketing_base;
        assert!(baseline_monthly_opex(&a) > floor);
    }
}
