use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{Archetype, CalendarMonth, ClassCalendar, EntityType, Month, Station};

const MIX_TOLERANCE: f64 = 1e-6;

/// A `(low, typical, high)` triple for a triangular draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriangularRange {
    pub low: f64,
    pub typical: f64,
    pub high: f64,
}

impl TriangularRange {
    pub const fn new(low: f64, typical: f64, high: f64) -> Self {
        TriangularRange { low, typical, high }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Monthly membership fee.
    pub membership_price: f64,
    /// Price at which join and churn rates are quoted.
    pub reference_price: f64,
    /// Exponent on `price / reference_price` for joins. Negative.
    pub join_elasticity: f64,
    /// Exponent on `price / reference_price` for churn. Positive.
    pub churn_elasticity: f64,
}

/// Weekly use of one station by one member.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationUsage {
    pub sessions_per_week: f64,
    pub hours_per_session: f64,
}

impl StationUsage {
    pub const fn new(sessions_per_week: f64, hours_per_session: f64) -> Self {
        StationUsage { sessions_per_week, hours_per_session }
    }

    pub fn weekly_hours(&self) -> f64 {
        self.sessions_per_week * self.hours_per_session
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArchetypeConfig {
    /// Share of new joiners assigned to this archetype.
    pub mix: f64,
    /// Monthly churn probability at the reference price.
    pub base_churn: f64,
    /// Indexed by [`Station::index`].
    pub usage: [StationUsage; 3],
    /// Clay bags per member per month.
    pub clay_bags: TriangularRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityConfig {
    /// Hard cap on total members.
    pub max_members: u32,
    /// Most new members the studio can onboard in one month.
    pub onboarding_per_month: u32,
    /// Station counts indexed by [`Station::index`].
    pub stations: [u32; 3],
    /// Fraction of nominal station hours that are usable.
    pub efficiency_alpha: f64,
    pub open_hours_per_week: f64,
    /// Exponent in `(1 - utilization)^beta`.
    pub damping_beta: f64,
    /// Churn uplift per unit of utilization above 1.
    pub utilization_churn_uplift: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub initial_size: u32,
    pub monthly_inflow: u32,
    /// Baseline monthly join probability per prospect.
    pub baseline_join_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Indexed by [`Pool::index`](crate::types::Pool::index).
    pub pools: [PoolConfig; 3],
    /// Fraction of the still-locked community pool unlocked at every term boundary.
    pub community_unlock_fraction: f64,
    /// Maximum word-of-mouth uplift.
    pub wom_q: f64,
    /// Member count at which word-of-mouth saturates.
    pub wom_saturation: f64,
    /// Members on the books at month 0, split by the archetype mix.
    pub starting_members: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferralConfig {
    /// Monthly probability that a member produces a referral.
    pub referral_probability: f64,
    /// Probability that a referral becomes a member.
    pub conversion_probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShockConfig {
    /// Monthly probability that a downturn starts while none is active.
    pub downturn_probability: f64,
    pub duration_mean_months: f64,
    pub duration_sd_months: f64,
    /// Join/referral multiplier while a downturn is active.
    pub join_severity: f64,
    /// Churn multiplier while a downturn is active.
    pub churn_uplift: f64,
    pub recovery_months: u32,
    /// Join multiplier during the recovery window.
    pub recovery_join_uplift: f64,
    /// Baseline join multipliers by calendar month, January first.
    pub seasonality: [f64; 12],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClayConfig {
    pub retail_price_per_bag: f64,
    pub wholesale_cost_per_bag: f64,
    pub water_cost_per_bag: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FiringConfig {
    /// Firings per month at `reference_members`.
    pub base_firings_per_month: f64,
    pub reference_members: f64,
    pub min_firings: f64,
    pub max_firings: f64,
    pub kwh_per_firing: f64,
    pub electricity_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorkshopConfig {
    pub enabled: bool,
    pub per_month: u32,
    pub avg_attendance: f64,
    pub fee: f64,
    pub variable_cost_per_event: f64,
    /// Fraction of attendees who later join.
    pub conversion_rate: f64,
    pub conversion_lag_months: u32,
    pub early_churn_multiplier: f64,
    pub early_tenure_months: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassConfig {
    pub enabled: bool,
    pub calendar: ClassCalendar,
    /// Term length; also the community-pool unlock cycle.
    pub term_months: u32,
    pub cohorts_per_start: u32,
    pub seats_per_cohort: u32,
    pub fill_rate: TriangularRange,
    pub price_per_student: f64,
    pub materials_per_student: f64,
    pub instructor_hours_per_cohort: f64,
    pub instructor_rate: f64,
    pub conversion_rate: f64,
    pub conversion_lag_months: u32,
    pub early_churn_multiplier: f64,
    pub early_tenure_months: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    pub enabled: bool,
    /// Poisson mean before seasonality.
    pub mean_per_month: f64,
    pub max_per_month: u32,
    pub ticket_price: f64,
    pub attendance: TriangularRange,
    pub consumables_per_attendee: TriangularRange,
    pub staff_hours_per_event: f64,
    pub staff_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StudioRentalConfig {
    pub enabled: bool,
    pub units: u32,
    pub monthly_price: f64,
    pub occupancy_baseline: f64,
    pub occupancy_sd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostConfig {
    pub rent: f64,
    /// Annual compounding rent increase.
    pub rent_escalator: f64,
    pub insurance: f64,
    pub glaze_supply: f64,
    pub heating_winter: f64,
    pub heating_summer: f64,
    /// Calendar months (1-12) billed at the winter heating rate.
    pub winter_months: Vec<u8>,
    /// Utilities other than kiln energy.
    pub utilities_base: f64,
    pub marketing_base: f64,
    pub marketing_ramp_multiplier: f64,
    pub marketing_ramp_months: u32,
    pub maintenance_base: f64,
    pub maintenance_sd: f64,
    /// Monthly distribution to the owner; not deductible.
    pub owner_draw: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StaffingConfig {
    pub hire_threshold_members: u32,
    pub monthly_cost: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoanConfig {
    pub annual_rate: f64,
    pub term_years: u32,
    pub io_months: u32,
    /// Explicit principal; auto-sized when `None`.
    pub principal_override: Option<f64>,
    /// Upfront fee as a fraction of the base principal.
    pub fee_rate: f64,
    /// Roll the fee into principal instead of paying it in cash.
    pub finance_fees: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    pub month: u32,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancingConfig {
    /// SBA 504-style loan sized from capital expenditure.
    pub capex_loan: LoanConfig,
    /// SBA 7(a)-style loan sized from operating runway.
    pub working_capital_loan: LoanConfig,
    pub capex_total: f64,
    pub capex_contingency: f64,
    pub capex_buffer: f64,
    pub runway_months: f64,
    pub runway_buffer: f64,
    pub owner_equity: f64,
    pub dscr_covenant: f64,
    pub grants: Vec<Grant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxConfig {
    pub entity: EntityType,
    pub personal_income_rate: f64,
    pub social_security_rate: f64,
    /// Annual earnings cap for Social Security.
    pub social_security_wage_base: f64,
    pub medicare_rate: f64,
    /// Share of net profit subject to self-employment tax.
    pub self_employment_factor: f64,
    /// Monthly owner salary under [`EntityType::SalarySplit`].
    pub owner_salary: f64,
    pub corporate_rate: f64,
    /// Collected on retail clay sales and remitted; never revenue.
    pub sales_tax_rate: f64,
}

/// Raw, unvalidated assumptions. Deserialize from JSON or start from
/// [`Assumptions::canonical`], then validate with [`ParameterSetBuilder::build`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assumptions {
    pub horizon_months: u32,
    pub start_calendar_month: u8,
    pub pricing: PricingConfig,
    /// Indexed by [`Archetype::index`].
    pub archetypes: [ArchetypeConfig; 4],
    pub capacity: CapacityConfig,
    pub market: MarketConfig,
    pub referral: ReferralConfig,
    pub shocks: ShockConfig,
    pub clay: ClayConfig,
    pub firing: FiringConfig,
    pub workshops: WorkshopConfig,
    pub classes: ClassConfig,
    pub events: EventConfig,
    pub studios: StudioRentalConfig,
    pub costs: CostConfig,
    pub staffing: StaffingConfig,
    pub financing: FinancingConfig,
    pub tax: TaxConfig,
}

impl Default for Assumptions {
    fn default() -> Self {
        Self::canonical()
    }
}

impl Assumptions {
    pub fn canonical() -> Self {
        // ── Archetypes ────────────────────────────────────────────────────────
        // usage order: wheels, handbuilding, glaze
        let hobbyist = ArchetypeConfig {
            mix: 0.35,
            base_churn: 0.05,
            usage: [
                StationUsage::new(1.0, 2.0),
                StationUsage::new(0.5, 2.0),
                StationUsage::new(0.5, 1.0),
            ],
            clay_bags: TriangularRange::new(0.25, 0.5, 1.0),
        };
        let committed_artist = ArchetypeConfig {
            mix: 0.40,
            base_churn: 0.025,
            usage: [
                StationUsage::new(2.0, 3.0),
                StationUsage::new(1.0, 2.0),
                StationUsage::new(1.0, 1.5),
            ],
            clay_bags: TriangularRange::new(0.5, 1.0, 2.0),
        };
        let production_potter = ArchetypeConfig {
            mix: 0.10,
            base_churn: 0.015,
            usage: [
                StationUsage::new(3.5, 4.0),
                StationUsage::new(1.0, 2.0),
                StationUsage::new(1.5, 2.0),
            ],
            clay_bags: TriangularRange::new(2.0, 3.0, 5.0),
        };
        let seasonal_user = ArchetypeConfig {
            mix: 0.15,
            base_churn: 0.08,
            usage: [
                StationUsage::new(0.75, 2.0),
                StationUsage::new(0.5, 2.0),
                StationUsage::new(0.3, 1.0),
            ],
            clay_bags: TriangularRange::new(0.1, 0.25, 0.5),
        };

        Assumptions {
            horizon_months: 60,
            start_calendar_month: 1,
            pricing: PricingConfig {
                membership_price: 175.0,
                reference_price: 175.0,
                join_elasticity: -1.5,
                churn_elasticity: 0.8,
            },
            archetypes: [hobbyist, committed_artist, production_potter, seasonal_user],
            capacity: CapacityConfig {
                max_members: 77,
                onboarding_per_month: 10,
                stations: [8, 6, 3],
                efficiency_alpha: 0.75,
                open_hours_per_week: 84.0,
                damping_beta: 4.0,
                utilization_churn_uplift: 0.5,
            },
            // ── Market pools: no-access, home, community ─────────────────────
            market: MarketConfig {
                pools: [
                    PoolConfig { initial_size: 20, monthly_inflow: 2, baseline_join_rate: 0.12 },
                    PoolConfig { initial_size: 50, monthly_inflow: 1, baseline_join_rate: 0.04 },
                    PoolConfig { initial_size: 100, monthly_inflow: 2, baseline_join_rate: 0.08 },
                ],
                community_unlock_fraction: 0.25,
                wom_q: 0.3,
                wom_saturation: 60.0,
                starting_members: 0,
            },
            referral: ReferralConfig { referral_probability: 0.04, conversion_probability: 0.35 },
            shocks: ShockConfig {
                downturn_probability: 0.02,
                duration_mean_months: 9.0,
                duration_sd_months: 3.0,
                join_severity: 0.65,
                churn_uplift: 1.3,
                recovery_months: 6,
                recovery_join_uplift: 1.1,
                seasonality: [1.1, 1.0, 1.0, 0.95, 0.9, 0.8, 0.75, 0.85, 1.15, 1.1, 0.95, 0.8],
            },
            clay: ClayConfig {
                retail_price_per_bag: 25.0,
                wholesale_cost_per_bag: 12.0,
                water_cost_per_bag: 0.8,
            },
            firing: FiringConfig {
                base_firings_per_month: 10.0,
                reference_members: 50.0,
                min_firings: 4.0,
                max_firings: 20.0,
                kwh_per_firing: 45.0,
                electricity_rate: 0.16,
            },
            // ── Programs ─────────────────────────────────────────────────────
            workshops: WorkshopConfig {
                enabled: true,
                per_month: 2,
                avg_attendance: 8.0,
                fee: 75.0,
                variable_cost_per_event: 160.0,
                conversion_rate: 0.12,
                conversion_lag_months: 1,
                early_churn_multiplier: 1.5,
                early_tenure_months: 3,
            },
            classes: ClassConfig {
                enabled: true,
                calendar: ClassCalendar::Semester,
                term_months: 3,
                cohorts_per_start: 2,
                seats_per_cohort: 10,
                fill_rate: TriangularRange::new(0.6, 0.8, 1.0),
                price_per_student: 350.0,
                materials_per_student: 40.0,
                instructor_hours_per_cohort: 18.0,
                instructor_rate: 40.0,
                conversion_rate: 0.15,
                conversion_lag_months: 2,
                early_churn_multiplier: 2.0,
                early_tenure_months: 3,
            },
            events: EventConfig {
                enabled: true,
                mean_per_month: 1.5,
                max_per_month: 4,
                ticket_price: 45.0,
                attendance: TriangularRange::new(6.0, 12.0, 20.0),
                consumables_per_attendee: TriangularRange::new(8.0, 12.0, 18.0),
                staff_hours_per_event: 4.0,
                staff_rate: 25.0,
            },
            studios: StudioRentalConfig {
                enabled: true,
                units: 4,
                monthly_price: 350.0,
                occupancy_baseline: 0.8,
                occupancy_sd: 0.1,
            },
            // ── Operating costs ──────────────────────────────────────────────
            costs: CostConfig {
                rent: 3_500.0,
                rent_escalator: 0.03,
                insurance: 250.0,
                glaze_supply: 200.0,
                heating_winter: 450.0,
                heating_summer: 120.0,
                winter_months: vec![1, 2, 3, 11, 12],
                utilities_base: 300.0,
                marketing_base: 300.0,
                marketing_ramp_multiplier: 2.0,
                marketing_ramp_months: 6,
                maintenance_base: 200.0,
                maintenance_sd: 75.0,
                owner_draw: 0.0,
            },
            staffing: StaffingConfig { hire_threshold_members: 50, monthly_cost: 2_800.0 },
            // ── Financing ────────────────────────────────────────────────────
            financing: FinancingConfig {
                capex_loan: LoanConfig {
                    annual_rate: 0.07,
                    term_years: 20,
                    io_months: 6,
                    principal_override: None,
                    fee_rate: 0.03,
                    finance_fees: true,
                },
                working_capital_loan: LoanConfig {
                    annual_rate: 0.105,
                    term_years: 10,
                    io_months: 6,
                    principal_override: None,
                    fee_rate: 0.03,
                    finance_fees: false,
                },
                capex_total: 95_000.0,
                capex_contingency: 0.10,
                capex_buffer: 5_000.0,
                runway_months: 6.0,
                runway_buffer: 10_000.0,
                owner_equity: 20_000.0,
                dscr_covenant: 1.25,
                grants: Vec::new(),
            },
            tax: TaxConfig {
                entity: EntityType::PassThrough,
                personal_income_rate: 0.25,
                social_security_rate: 0.124,
                social_security_wage_base: 168_600.0,
                medicare_rate: 0.029,
                self_employment_factor: 0.9235,
                owner_salary: 3_500.0,
                corporate_rate: 0.26,
                sales_tax_rate: 0.08,
            },
        }
    }

    pub fn archetype(&self, a: Archetype) -> &ArchetypeConfig {
        &self.archetypes[a.index()]
    }

    pub fn station_count(&self, s: Station) -> u32 {
        self.capacity.stations[s.index()]
    }

    pub fn start_calendar(&self) -> CalendarMonth {
        CalendarMonth(self.start_calendar_month)
    }

    /// Check every structural constraint the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon_months == 0 {
            return Err(ConfigError::ZeroHorizon);
        }
        if !(1..=12).contains(&self.start_calendar_month) {
            return Err(invalid("start_calendar_month", self.start_calendar_month as f64, "must be 1-12"));
        }

        let mix_sum: f64 = self.archetypes.iter().map(|a| a.mix).sum();
        if (mix_sum - 1.0).abs() > MIX_TOLERANCE {
            return Err(ConfigError::MixNotNormalized { what: "archetype mix", sum: mix_sum });
        }
        for a in &self.archetypes {
            probability("archetype mix", a.mix)?;
            probability("archetype base_churn", a.base_churn)?;
            triangular("archetype clay_bags", &a.clay_bags)?;
            for u in &a.usage {
                non_negative("sessions_per_week", u.sessions_per_week)?;
                non_negative("hours_per_session", u.hours_per_session)?;
            }
        }

        positive("reference_price", self.pricing.reference_price)?;
        non_negative("membership_price", self.pricing.membership_price)?;
        if self.pricing.join_elasticity > 0.0 {
            return Err(invalid("join_elasticity", self.pricing.join_elasticity, "must not be positive"));
        }

        positive("efficiency_alpha", self.capacity.efficiency_alpha)?;
        positive("open_hours_per_week", self.capacity.open_hours_per_week)?;
        non_negative("damping_beta", self.capacity.damping_beta)?;
        non_negative("utilization_churn_uplift", self.capacity.utilization_churn_uplift)?;
        if self.market.starting_members > self.capacity.max_members {
            return Err(invalid(
                "starting_members",
                self.market.starting_members as f64,
                "exceeds max_members",
            ));
        }

        for p in &self.market.pools {
            probability("baseline_join_rate", p.baseline_join_rate)?;
        }
        probability("community_unlock_fraction", self.market.community_unlock_fraction)?;
        non_negative("wom_q", self.market.wom_q)?;
        positive("wom_saturation", self.market.wom_saturation)?;

        probability("referral_probability", self.referral.referral_probability)?;
        probability("referral conversion_probability", self.referral.conversion_probability)?;

        probability("downturn_probability", self.shocks.downturn_probability)?;
        non_negative("duration_sd_months", self.shocks.duration_sd_months)?;
        non_negative("join_severity", self.shocks.join_severity)?;
        non_negative("churn_uplift", self.shocks.churn_uplift)?;
        non_negative("recovery_join_uplift", self.shocks.recovery_join_uplift)?;
        for &s in &self.shocks.seasonality {
            non_negative("seasonality", s)?;
        }

        positive("reference_members", self.firing.reference_members)?;
        if self.firing.min_firings > self.firing.max_firings {
            return Err(invalid("min_firings", self.firing.min_firings, "exceeds max_firings"));
        }

        probability("workshop conversion_rate", self.workshops.conversion_rate)?;
        probability("class conversion_rate", self.classes.conversion_rate)?;
        if self.classes.term_months == 0 {
            return Err(invalid("class term_months", 0.0, "must be at least 1"));
        }
        triangular("class fill_rate", &self.classes.fill_rate)?;
        probability("class fill_rate high", self.classes.fill_rate.high)?;
        non_negative("event mean_per_month", self.events.mean_per_month)?;
        triangular("event attendance", &self.events.attendance)?;
        triangular("event consumables_per_attendee", &self.events.consumables_per_attendee)?;
        probability("occupancy_baseline", self.studios.occupancy_baseline)?;
        non_negative("occupancy_sd", self.studios.occupancy_sd)?;

        non_negative("maintenance_sd", self.costs.maintenance_sd)?;
        for &m in &self.costs.winter_months {
            if !(1..=12).contains(&m) {
                return Err(invalid("winter_months", m as f64, "must be 1-12"));
            }
        }

        loan("capex loan", &self.financing.capex_loan)?;
        loan("working capital loan", &self.financing.working_capital_loan)?;
        non_negative("capex_total", self.financing.capex_total)?;
        non_negative("runway_months", self.financing.runway_months)?;
        for g in &self.financing.grants {
            if g.month == 0 || g.month > self.horizon_months {
                return Err(ConfigError::GrantOutsideHorizon {
                    month: g.month,
                    horizon: self.horizon_months,
                });
            }
        }

        probability("personal_income_rate", self.tax.personal_income_rate)?;
        probability("corporate_rate", self.tax.corporate_rate)?;
        probability("sales_tax_rate", self.tax.sales_tax_rate)?;
        non_negative("social_security_wage_base", self.tax.social_security_wage_base)?;

        Ok(())
    }
}

fn invalid(field: &'static str, value: f64, reason: &'static str) -> ConfigError {
    ConfigError::InvalidValue { field, value, reason }
}

fn probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, value, "must lie in [0, 1]"))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, value, "must be finite and non-negative"))
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, value, "must be finite and positive"))
    }
}

fn triangular(field: &'static str, r: &TriangularRange) -> Result<(), ConfigError> {
    non_negative(field, r.low)?;
    if r.low <= r.typical && r.typical <= r.high {
        Ok(())
    } else {
        Err(invalid(field, r.typical, "requires low <= typical <= high"))
    }
}

fn loan(name: &'static str, l: &LoanConfig) -> Result<(), ConfigError> {
    if l.term_years == 0 {
        return Err(ConfigError::InvalidTerm { loan: name, detail: "term must be at least one year".into() });
    }
    if l.io_months >= l.term_years * Month::MONTHS_PER_YEAR {
        return Err(ConfigError::InvalidTerm {
            loan: name,
            detail: format!(
                "interest-only period of {} months leaves no amortization within {} years",
                l.io_months, l.term_years
            ),
        });
    }
    non_negative("annual_rate", l.annual_rate)?;
    non_negative("fee_rate", l.fee_rate)?;
    if let Some(p) = l.principal_override {
        non_negative("principal_override", p)?;
    }
    Ok(())
}

/// Validated, immutable assumptions shared read-only by every run in a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSet {
    assumptions: Assumptions,
}

impl ParameterSet {
    /// Builder seeded with [`Assumptions::canonical`].
    pub fn builder() -> ParameterSetBuilder {
        ParameterSetBuilder::new(Assumptions::canonical())
    }

    pub fn assumptions(&self) -> &Assumptions {
        &self.assumptions
    }
}

impl Deref for ParameterSet {
    type Target = Assumptions;

    fn deref(&self) -> &Assumptions {
        &self.assumptions
    }
}

impl TryFrom<Assumptions> for ParameterSet {
    type Error = ConfigError;

    fn try_from(assumptions: Assumptions) -> Result<Self, ConfigError> {
        ParameterSetBuilder::new(assumptions).build()
    }
}

/// Fluent construction of a [`ParameterSet`]; validation happens once in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ParameterSetBuilder {
    assumptions: Assumptions,
}

impl ParameterSetBuilder {
    pub fn new(assumptions: Assumptions) -> Self {
        ParameterSetBuilder { assumptions }
    }

    pub fn horizon_months(mut self, months: u32) -> Self {
        self.assumptions.horizon_months = months;
        self
    }

    pub fn start_calendar_month(mut self, month: u8) -> Self {
        self.assumptions.start_calendar_month = month;
        self
    }

    pub fn max_members(mut self, cap: u32) -> Self {
        self.assumptions.capacity.max_members = cap;
        self
    }

    pub fn starting_members(mut self, members: u32) -> Self {
        self.assumptions.market.starting_members = members;
        self
    }

    pub fn membership_price(mut self, price: f64) -> Self {
        self.assumptions.pricing.membership_price = price;
        self
    }

    pub fn entity(mut self, entity: EntityType) -> Self {
        self.assumptions.tax.entity = entity;
        self
    }

    pub fn grant(mut self, month: u32, amount: f64) -> Self {
        self.assumptions.financing.grants.push(Grant { month, amount });
        self
    }

    /// Arbitrary edit for the long tail of assumptions without a dedicated setter.
    pub fn edit(mut self, f: impl FnOnce(&mut Assumptions)) -> Self {
        f(&mut self.assumptions);
        self
    }

    pub fn build(self) -> Result<ParameterSet, ConfigError> {
        self.assumptions.validate()?;
        Ok(ParameterSet { assumptions: self.assumptions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_assumptions_validate() {
        assert!(ParameterSet::builder().build().is_ok());
    }

    #[test]
    fn mix_not_summing_to_one_is_rejected() {
        let err = ParameterSet::builder()
            .edit(|a| a.archetypes[0].mix = 0.5)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MixNotNormalized { .. }), "got {err:?}");
    }

    #[test]
    fn io_period_covering_whole_term_is_rejected() {
        let err = ParameterSet::builder()
            .edit(|a| {
                a.financing.working_capital_loan.term_years = 1;
                a.financing.working_capital_loan.io_months = 12;
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTerm { .. }), "got {err:?}");
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let err = ParameterSet::builder().horizon_months(0).build().unwrap_err();
        assert_eq!(err, ConfigError::ZeroHorizon);
    }

    #[test]
    fn grant_outside_horizon_is_rejected() {
        let err = ParameterSet::builder().horizon_months(12).grant(13, 5_000.0).build().unwrap_err();
        assert_eq!(err, ConfigError::GrantOutsideHorizon { month: 13, horizon: 12 });
    }

    #[test]
    fn out_of_range_probability_is_rejected() {
        let err = ParameterSet::builder()
            .edit(|a| a.referral.conversion_probability = 1.4)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }), "got {err:?}");
    }

    #[test]
    fn inverted_triangular_range_is_rejected() {
        let err = ParameterSet::builder()
            .edit(|a| a.events.attendance = TriangularRange::new(10.0, 5.0, 20.0))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "event attendance", .. }));
    }

    #[test]
    fn starting_members_above_cap_is_rejected() {
        let err = ParameterSet::builder().max_members(10).starting_members(11).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "starting_members", .. }));
    }

    #[test]
    fn builder_setters_land_in_parameter_set() {
        let params = ParameterSet::builder()
            .horizon_months(24)
            .max_members(40)
            .membership_price(200.0)
            .entity(EntityType::TaxableCorporation)
            .build()
            .unwrap();
        assert_eq!(params.horizon_months, 24);
        assert_eq!(params.capacity.max_members, 40);
        assert_eq!(params.pricing.membership_price, 200.0);
        assert_eq!(params.tax.entity, EntityType::TaxableCorporation);
    }

    #[test]
    fn assumptions_load_from_json() {
        let json = serde_json::to_string(&Assumptions::canonical()).unwrap();
        let loaded: Assumptions = serde_json::from_str(&json).unwrap();
        let params = ParameterSet::try_from(loaded).unwrap();
        assert_eq!(params.assumptions(), &Assumptions::canonical());
    }
}
