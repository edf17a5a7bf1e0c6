use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capacity::{self, Utilization};
use crate::config::{Assumptions, ParameterSet};
use crate::costs::{self, OperatingCosts, StaffingLatch};
use crate::error::RunError;
use crate::finance::{self, DebtService, Financing, TaxLedger};
use crate::market::{self, DemandFactors, MarketPools};
use crate::members::{self, ChurnDrivers, DeferredJoins, Headroom, Population};
use crate::referral;
use crate::revenue::{self, DirectCosts, RevenueBreakdown};
use crate::rng::SimRng;
use crate::shocks::{self, MacroState};
use crate::types::{ArchetypeCounts, CalendarMonth, ConvertSource, Month, Pool};

/// Accepted joins by source, after the headroom cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinBreakdown {
    /// Indexed by [`Pool::index`].
    pub pools: [u32; 3],
    pub referrals: u32,
    pub workshop_converts: u32,
    pub class_converts: u32,
}

impl JoinBreakdown {
    pub fn total(&self) -> u32 {
        self.pools.iter().sum::<u32>() + self.referrals + self.workshop_converts + self.class_converts
    }
}

/// End-of-month snapshot: population, full statement, debt and cash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthRecord {
    pub month: Month,
    pub calendar_month: CalendarMonth,
    pub members: ArchetypeCounts,
    pub joins: JoinBreakdown,
    /// Joiners turned away by onboarding or the member cap.
    pub joins_rejected: u32,
    pub churned: u32,
    pub pools: MarketPools,
    /// Binding station utilization at the start of the month.
    pub utilization: f64,
    pub downturn_active: bool,
    pub staffed: bool,
    pub revenue: RevenueBreakdown,
    pub direct_costs: DirectCosts,
    pub operating_costs: OperatingCosts,
    pub events_held: u32,
    pub class_students: u32,
    pub sales_tax_collected: f64,
    /// Revenue less direct and operating costs, before debt and tax.
    pub operating_cash_flow: f64,
    pub debt: DebtService,
    pub pre_tax_profit: f64,
    pub tax: f64,
    pub owner_draw: f64,
    pub grants: f64,
    pub net_cash_flow: f64,
    pub cash_balance: f64,
    pub dscr: Option<f64>,
    pub dscr_breach: bool,
}

impl MonthRecord {
    pub fn total_members(&self) -> u32 {
        self.members.total()
    }

    /// Every numeric field as `(name, value)`, for banding across runs.
    /// Undefined DSCR is left out.
    pub fn numeric_fields(&self) -> Vec<(&'static str, f64)> {
        let mut out = vec![
            ("members", self.total_members() as f64),
            ("members_hobbyist", self.members.0[0] as f64),
            ("members_committed_artist", self.members.0[1] as f64),
            ("members_production_potter", self.members.0[2] as f64),
            ("members_seasonal_user", self.members.0[3] as f64),
            ("joins", self.joins.total() as f64),
            ("joins_no_access", self.joins.pools[Pool::NoAccess.index()] as f64),
            ("joins_home", self.joins.pools[Pool::Home.index()] as f64),
            ("joins_community", self.joins.pools[Pool::Community.index()] as f64),
            ("joins_referrals", self.joins.referrals as f64),
            ("joins_workshop_converts", self.joins.workshop_converts as f64),
            ("joins_class_converts", self.joins.class_converts as f64),
            ("joins_rejected", self.joins_rejected as f64),
            ("churned", self.churned as f64),
            ("pool_no_access", self.pools.no_access as f64),
            ("pool_home", self.pools.home as f64),
            ("pool_community", self.pools.community as f64),
            ("pool_community_unlocked", self.pools.community_unlocked as f64),
            ("utilization", self.utilization),
            ("downturn_active", if self.downturn_active { 1.0 } else { 0.0 }),
            ("staffed", if self.staffed { 1.0 } else { 0.0 }),
            ("revenue_membership", self.revenue.membership),
            ("revenue_clay", self.revenue.clay),
            ("revenue_workshops", self.revenue.workshops),
            ("revenue_classes", self.revenue.classes),
            ("revenue_events", self.revenue.events),
            ("revenue_designated_studios", self.revenue.designated_studios),
            ("revenue_total", self.revenue.total()),
            ("events_held", self.events_held as f64),
            ("class_students", self.class_students as f64),
            ("cost_clay", self.direct_costs.clay_cogs),
            ("cost_firing", self.direct_costs.firing),
            ("cost_workshops", self.direct_costs.workshops),
            ("cost_classes", self.direct_costs.classes),
            ("cost_events", self.direct_costs.events),
            ("cost_rent", self.operating_costs.rent),
            ("cost_insurance", self.operating_costs.insurance),
            ("cost_glaze_supply", self.operating_costs.glaze_supply),
            ("cost_heating", self.operating_costs.heating),
            ("cost_utilities", self.operating_costs.utilities),
            ("cost_marketing", self.operating_costs.marketing),
            ("cost_maintenance", self.operating_costs.maintenance),
            ("cost_staffing", self.operating_costs.staffing),
            ("cost_water", self.operating_costs.water),
            ("cost_owner_salary", self.operating_costs.owner_salary),
            ("cost_total", self.direct_costs.total() + self.operating_costs.total()),
            ("sales_tax_collected", self.sales_tax_collected),
            ("operating_cash_flow", self.operating_cash_flow),
            ("interest", self.debt.interest()),
            ("principal", self.debt.principal()),
            ("debt_service", self.debt.total()),
            ("capex_loan_interest", self.debt.capex.interest),
            ("capex_loan_principal", self.debt.capex.principal),
            ("capex_loan_balance", self.debt.capex.balance),
            ("working_capital_loan_interest", self.debt.working_capital.interest),
            ("working_capital_loan_principal", self.debt.working_capital.principal),
            ("working_capital_loan_balance", self.debt.working_capital.balance),
            ("pre_tax_profit", self.pre_tax_profit),
            ("tax", self.tax),
            ("owner_draw", self.owner_draw),
            ("grants", self.grants),
            ("net_cash_flow", self.net_cash_flow),
            ("cash_balance", self.cash_balance),
            ("dscr_breach", if self.dscr_breach { 1.0 } else { 0.0 }),
        ];
        if let Some(d) = self.dscr {
            out.push(("dscr", d));
        }
        out
    }
}

/// One completed simulation: the monthly records plus derived scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_index: u64,
    pub opening_cash: f64,
    pub records: Vec<MonthRecord>,
    pub min_cash: f64,
    pub min_cash_month: Month,
    /// First month the cash balance went below zero.
    pub first_cash_out_month: Option<Month>,
    pub dscr_breach_months: u32,
    pub ending_cash: f64,
    pub cumulative_joins: u32,
    pub cumulative_churn: u32,
    pub staff_hired_in: Option<Month>,
}

impl RunResult {
    fn from_records(run_index: u64, opening_cash: f64, records: Vec<MonthRecord>, staff_hired_in: Option<Month>) -> Self {
        let (min_cash, min_cash_month) = records
            .iter()
            .fold((opening_cash, Month(0)), |(lo, at), r| {
                if r.cash_balance < lo { (r.cash_balance, r.month) } else { (lo, at) }
            });
        RunResult {
            run_index,
            opening_cash,
            min_cash,
            min_cash_month,
            first_cash_out_month: records.iter().find(|r| r.cash_balance < 0.0).map(|r| r.month),
            dscr_breach_months: records.iter().filter(|r| r.dscr_breach).count() as u32,
            ending_cash: records.last().map_or(opening_cash, |r| r.cash_balance),
            cumulative_joins: records.iter().map(|r| r.joins.total()).sum(),
            cumulative_churn: records.iter().map(|r| r.churned).sum(),
            staff_hired_in,
            records,
        }
    }

    pub fn went_cash_negative(&self) -> bool {
        self.first_cash_out_month.is_some()
    }

    pub fn any_dscr_breach(&self) -> bool {
        self.dscr_breach_months > 0
    }
}

/// Per-run mutable state. Built fresh from a [`ParameterSet`] at month 0 and
/// advanced one month per [`step`](Self::step); nothing outlives the run.
pub struct Simulation<'a> {
    params: &'a Assumptions,
    rng: SimRng,
    run_index: u64,
    month: Month,
    pools: MarketPools,
    population: Population,
    macro_state: MacroState,
    deferred: DeferredJoins,
    staffing: StaffingLatch,
    financing: Financing,
    tax: TaxLedger,
    cash: f64,
}

impl<'a> Simulation<'a> {
    /// Month-0 state. Draws nothing.
    pub fn from_params(params: &'a ParameterSet, rng: SimRng) -> Self {
        let a = params.assumptions();
        let financing = Financing::new(a);
        Simulation {
            params: a,
            rng,
            run_index: 0,
            month: Month(0),
            pools: MarketPools::new(&a.market),
            population: Population::seeded(a),
            macro_state: MacroState::default(),
            deferred: DeferredJoins::default(),
            staffing: StaffingLatch::default(),
            cash: financing.opening_cash,
            financing,
            tax: TaxLedger::default(),
        }
    }

    /// Tag the result with its position in a batch.
    pub fn with_run_index(mut self, run_index: u64) -> Self {
        self.run_index = run_index;
        self
    }

    pub fn month(&self) -> Month {
        self.month
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    /// Run every remaining month to the horizon.
    pub fn run(mut self) -> RunResult {
        let opening_cash = self.cash;
        let mut records = Vec::with_capacity(self.params.horizon_months as usize);
        while self.month.0 < self.params.horizon_months {
            records.push(self.step());
        }
        RunResult::from_records(self.run_index, opening_cash, records, self.staffing.hired_in())
    }

    /// Like [`run`](Self::run), but checks `should_stop` before each month.
    /// Months are never interrupted part-way.
    pub fn run_until(mut self, should_stop: impl Fn() -> bool) -> Result<RunResult, RunError> {
        let opening_cash = self.cash;
        let mut records = Vec::with_capacity(self.params.horizon_months as usize);
        while self.month.0 < self.params.horizon_months {
            if should_stop() {
                return Err(RunError::Cancelled { month: self.month.0 + 1 });
            }
            records.push(self.step());
        }
        Ok(RunResult::from_records(self.run_index, opening_cash, records, self.staffing.hired_in()))
    }

    /// Advance one month and return its record.
    pub fn step(&mut self) -> MonthRecord {
        let a = self.params;
        self.month = self.month.offset(1);
        let month = self.month;
        let calendar = month.calendar(a.start_calendar());

        self.pools.begin_month(&a.market, a.classes.term_months, month);
        self.population.expire_tenure(month, a);

        // macro
        let was_active = self.macro_state.downturn_active;
        self.macro_state.advance(&a.shocks, &mut self.rng);
        if self.macro_state.downturn_active && !was_active {
            debug!(
                target: "claysim::run",
                run = self.run_index,
                month = month.0,
                months = self.macro_state.downturn_remaining_months,
                "downturn started"
            );
        }

        // pool joins
        let utilization = Utilization::measure(a, &self.population.counts).binding();
        let members_at_start = self.population.total();
        let factors = DemandFactors {
            seasonality: shocks::seasonality(&a.shocks, calendar),
            price_factor: market::join_price_factor(&a.pricing),
            capacity_damping: capacity::capacity_damping(utilization, a.capacity.damping_beta),
            macro_factor: self.macro_state.join_multiplier(&a.shocks),
            wom_multiplier: market::wom_multiplier(&a.market, members_at_start),
        };
        let pool_candidates = market::draw_pool_joins(&self.pools, &a.market, &factors, &mut self.rng);

        // churn
        let drivers = ChurnDrivers::new(
            a,
            capacity::crowding_churn_factor(utilization, a.capacity.utilization_churn_uplift),
            self.macro_state.churn_multiplier(&a.shocks),
        );
        let churned = members::draw_churn(&mut self.population, a, &drivers, &mut self.rng);

        // referrals
        let referrals = referral::draw_referrals(
            &a.referral,
            self.population.total(),
            self.macro_state.referral_multiplier(&a.shocks),
            &mut self.rng,
        );

        // headroom: pools, then referrals, then deferred converts
        let mut headroom = Headroom::new(
            a.capacity.onboarding_per_month,
            a.capacity.max_members,
            self.population.total(),
        );
        let mut joins = JoinBreakdown::default();
        let mut rejected = 0;
        for pool in Pool::ALL {
            let wanted = pool_candidates[pool.index()];
            let accepted = headroom.take(wanted);
            self.pools.remove_joiners(pool, accepted);
            joins.pools[pool.index()] = accepted;
            rejected += wanted - accepted;
        }
        joins.referrals = headroom.take(referrals.converted);
        rejected += referrals.converted - joins.referrals;

        let mut converts = [(ConvertSource::Workshop, 0u32), (ConvertSource::Class, 0u32)];
        for (slot, (source, due)) in converts.iter_mut().zip(self.deferred.take_due(month)) {
            let accepted = headroom.take(due);
            rejected += due - accepted;
            *slot = (source, accepted);
        }
        joins.workshop_converts = converts[0].1;
        joins.class_converts = converts[1].1;

        // archetype assignment
        let direct = members::assign_archetypes(a, joins.pools.iter().sum::<u32>() + joins.referrals, &mut self.rng);
        self.population.admit(&direct);
        for (source, n) in converts {
            let assigned = members::assign_archetypes(a, n, &mut self.rng);
            self.population.admit_converts(month, source, assigned);
        }

        // revenue
        let members_now = self.population.total();
        let rev = revenue::month_revenue(a, month, factors.seasonality, &self.population.counts, &mut self.rng);
        for c in &rev.conversions {
            self.deferred.schedule(c.target, c.source, c.count);
        }

        // costs
        let was_staffed = self.staffing.is_hired();
        let staffed = self.staffing.observe(&a.staffing, members_now, month);
        if staffed && !was_staffed {
            debug!(target: "claysim::run", run = self.run_index, month = month.0, members = members_now, "staff hired");
        }
        let opex = costs::operating_costs(a, month, rev.clay_bags, staffed, &mut self.rng);

        // financing and tax
        let operating_cash_flow = rev.revenue.total() - rev.direct_costs.total() - opex.total();
        let debt = self.financing.pay_month();
        let pre_tax_profit = operating_cash_flow - debt.interest();
        let tax = self.tax.accrue(&a.tax, month, a.start_calendar(), pre_tax_profit, opex.owner_salary);
        let grants: f64 = a.financing.grants.iter().filter(|g| g.month == month.0).map(|g| g.amount).sum();
        let owner_draw = a.costs.owner_draw;

        let net_cash_flow = operating_cash_flow - debt.total() - tax - owner_draw + grants;
        self.cash += net_cash_flow;

        let dscr = finance::dscr(operating_cash_flow, debt.total());

        MonthRecord {
            month,
            calendar_month: calendar,
            members: self.population.counts,
            joins,
            joins_rejected: rejected,
            churned: churned.total(),
            pools: self.pools,
            utilization,
            downturn_active: self.macro_state.downturn_active,
            staffed,
            revenue: rev.revenue,
            direct_costs: rev.direct_costs,
            operating_costs: opex,
            events_held: rev.event_count,
            class_students: rev.class_students,
            sales_tax_collected: rev.sales_tax_collected,
            operating_cash_flow,
            debt,
            pre_tax_profit,
            tax,
            owner_draw,
            grants,
            net_cash_flow,
            cash_balance: self.cash,
            dscr,
            dscr_breach: finance::is_covenant_breach(dscr, a.financing.dscr_covenant),
        }
    }
}

/// Simulate one run on its own substream.
pub fn run_single(params: &ParameterSet, rng: SimRng) -> RunResult {
    Simulation::from_params(params, rng).run()
}
