use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{
    Assumptions, ClassConfig, EventConfig, FiringConfig, StudioRentalConfig, WorkshopConfig,
};
use crate::rng;
use crate::types::{ArchetypeCounts, ClassCalendar, ConvertSource, Month};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueBreakdown {
    pub membership: f64,
    pub clay: f64,
    pub workshops: f64,
    pub classes: f64,
    pub events: f64,
    pub designated_studios: f64,
}

impl RevenueBreakdown {
    pub fn total(&self) -> f64 {
        self.membership + self.clay + self.workshops + self.classes + self.events + self.designated_studios
    }
}

/// Costs that scale with activity in a revenue stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectCosts {
    pub clay_cogs: f64,
    /// Kiln energy; the only place firing cost is counted.
    pub firing: f64,
    pub workshops: f64,
    pub classes: f64,
    pub events: f64,
}

impl DirectCosts {
    pub fn total(&self) -> f64 {
        self.clay_cogs + self.firing + self.workshops + self.classes + self.events
    }
}

/// Attendees scheduled to become members in a later month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledConversion {
    pub target: Month,
    pub source: ConvertSource,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RevenueOutcome {
    pub revenue: RevenueBreakdown,
    pub direct_costs: DirectCosts,
    pub clay_bags: f64,
    /// Sales tax on retail clay: collected and remitted, never revenue.
    pub sales_tax_collected: f64,
    pub firings: f64,
    pub event_count: u32,
    pub class_students: u32,
    pub conversions: Vec<ScheduledConversion>,
}

/// All revenue streams for one month given the end-of-month population.
/// Disabled streams draw nothing.
pub fn month_revenue(
    a: &Assumptions,
    month: Month,
    seasonality: f64,
    members: &ArchetypeCounts,
    rng: &mut impl Rng,
) -> RevenueOutcome {
    let mut out = RevenueOutcome::default();
    let total_members = members.total();

    out.revenue.membership = total_members as f64 * a.pricing.membership_price;

    let bags = clay_bags(a, members, rng);
    out.clay_bags = bags;
    out.revenue.clay = bags * a.clay.retail_price_per_bag;
    out.direct_costs.clay_cogs = bags * a.clay.wholesale_cost_per_bag;
    out.sales_tax_collected = out.revenue.clay * a.tax.sales_tax_rate;

    out.firings = firing_count(&a.firing, total_members);
    out.direct_costs.firing = out.firings * a.firing.kwh_per_firing * a.firing.electricity_rate;

    if a.workshops.enabled {
        let w = workshops(&a.workshops, month);
        out.revenue.workshops = w.revenue;
        out.direct_costs.workshops = w.cost;
        out.conversions.extend(w.conversion);
    }

    if a.classes.enabled {
        let c = classes(&a.classes, month, rng);
        out.revenue.classes = c.revenue;
        out.direct_costs.classes = c.cost;
        out.class_students = c.participants;
        out.conversions.extend(c.conversion);
    }

    if a.events.enabled {
        let e = events(&a.events, seasonality, rng);
        out.revenue.events = e.revenue;
        out.direct_costs.events = e.cost;
        out.event_count = e.participants;
    }

    if a.studios.enabled {
        out.revenue.designated_studios = designated_studios(&a.studios, rng);
    }

    out
}

/// Σ archetype count × one triangular draw of bags per member.
pub fn clay_bags(a: &Assumptions, members: &ArchetypeCounts, rng: &mut impl Rng) -> f64 {
    members
        .iter()
        .map(|(archetype, count)| {
            if count == 0 {
                0.0
            } else {
                count as f64 * rng::triangular(rng, &a.archetype(archetype).clay_bags)
            }
        })
        .sum()
}

/// Firings scale with membership relative to the reference ratio, within `[min, max]`.
pub fn firing_count(cfg: &FiringConfig, members: u32) -> f64 {
    (cfg.base_firings_per_month * members as f64 / cfg.reference_members)
        .clamp(cfg.min_firings, cfg.max_firings)
}

/// Revenue, cost and deferred conversions of one program this month.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgramOutcome {
    pub revenue: f64,
    pub cost: f64,
    /// Attendees, students or events depending on the program.
    pub participants: u32,
    pub conversion: Option<ScheduledConversion>,
}

pub fn workshops(cfg: &WorkshopConfig, month: Month) -> ProgramOutcome {
    let attendees = cfg.per_month as f64 * cfg.avg_attendance;
    let converts = (attendees * cfg.conversion_rate).round() as u32;
    ProgramOutcome {
        revenue: attendees * cfg.fee,
        cost: cfg.per_month as f64 * cfg.variable_cost_per_event,
        participants: attendees.round() as u32,
        conversion: (converts > 0).then(|| ScheduledConversion {
            target: month.offset(cfg.conversion_lag_months),
            source: ConvertSource::Workshop,
            count: converts,
        }),
    }
}

/// Whether a new cohort set starts in `month`.
pub fn class_starts(cfg: &ClassConfig, month: Month) -> bool {
    match cfg.calendar {
        ClassCalendar::Monthly => true,
        ClassCalendar::Semester => cfg.term_months > 0 && (month.0.saturating_sub(1)) % cfg.term_months == 0,
    }
}

/// Cohorts that start this month are billed and costed in full now.
pub fn classes(cfg: &ClassConfig, month: Month, rng: &mut impl Rng) -> ProgramOutcome {
    if !class_starts(cfg, month) {
        return ProgramOutcome::default();
    }
    let mut students = 0u32;
    for _ in 0..cfg.cohorts_per_start {
        let fill = rng::triangular(rng, &cfg.fill_rate).clamp(0.0, 1.0);
        students += (cfg.seats_per_cohort as f64 * fill).round() as u32;
    }
    let converts = (students as f64 * cfg.conversion_rate).round() as u32;
    ProgramOutcome {
        revenue: students as f64 * cfg.price_per_student,
        cost: students as f64 * cfg.materials_per_student
            + cfg.cohorts_per_start as f64 * cfg.instructor_hours_per_cohort * cfg.instructor_rate,
        participants: students,
        conversion: (converts > 0).then(|| ScheduledConversion {
            target: month.offset(cfg.conversion_lag_months),
            source: ConvertSource::Class,
            count: converts,
        }),
    }
}

/// Capped, seasonally modulated Poisson count of events, each with its own
/// attendance and per-attendee consumables draw.
pub fn events(cfg: &EventConfig, seasonality: f64, rng: &mut impl Rng) -> ProgramOutcome {
    let count = rng::poisson(rng, cfg.mean_per_month * seasonality).min(cfg.max_per_month);
    let mut out = ProgramOutcome { participants: count, ..ProgramOutcome::default() };
    for _ in 0..count {
        let attendance = rng::triangular(rng, &cfg.attendance).round();
        let unit_cost = rng::triangular(rng, &cfg.consumables_per_attendee);
        out.revenue += cfg.ticket_price * attendance;
        out.cost += unit_cost * attendance + cfg.staff_hours_per_event * cfg.staff_rate;
    }
    out
}

/// Units × price × occupancy, occupancy drawn around the baseline and kept in `[0, 1]`.
pub fn designated_studios(cfg: &StudioRentalConfig, rng: &mut impl Rng) -> f64 {
    let occupancy = rng::normal(rng, cfg.occupancy_baseline, cfg.occupancy_sd).clamp(0.0, 1.0);
    cfg.units as f64 * cfg.monthly_price * occupancy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::derive_stream;

    #[test]
    fn membership_revenue_is_members_times_price() {
        let a = Assumptions::canonical();
        let mut rng = derive_stream(1, 0);
        let members = ArchetypeCounts([10, 10, 5, 5]);
        let out = month_revenue(&a, Month(1), 1.0, &members, &mut rng);
        assert_eq!(out.revenue.membership, 30.0 * a.pricing.membership_price);
    }

    #[test]
    fn sales_tax_is_not_revenue() {
        let a = Assumptions::canonical();
        let mut rng = derive_stream(1, 0);
        let out = month_revenue(&a, Month(1), 1.0, &ArchetypeCounts([10, 10, 5, 5]), &mut rng);
        assert!(out.sales_tax_collected > 0.0);
        let expected = out.clay_bags * a.clay.retail_price_per_bag;
        assert!((out.revenue.clay - expected).abs() < 1e-9);
        assert!((out.sales_tax_collected - expected * a.tax.sales_tax_rate).abs() < 1e-9);
    }

    #[test]
    fn clay_bags_lie_within_archetype_ranges() {
        let a = Assumptions::canonical();
        let mut rng = derive_stream(3, 0);
        let members = ArchetypeCounts([0, 0, 4, 0]);
        for _ in 0..200 {
            let bags = clay_bags(&a, &members, &mut rng);
            assert!((8.0..=20.0).contains(&bags), "4 production potters drew {bags} bags");
        }
    }

    #[test]
    fn firing_count_scales_and_clamps() {
        let cfg = Assumptions::canonical().firing;
        assert_eq!(firing_count(&cfg, 0), cfg.min_firings);
        assert!((firing_count(&cfg, 50) - 10.0).abs() < 1e-12);
        assert_eq!(firing_count(&cfg, 10_000), cfg.max_firings);
    }

    #[test]
    fn workshop_conversions_are_deferred_by_lag() {
        let cfg = Assumptions::canonical().workshops;
        let w = workshops(&cfg, Month(4));
        // 2 × 8 = 16 attendees, 12 % → 2 converts
        assert_eq!(w.revenue, 16.0 * cfg.fee);
        let conv = w.conversion.expect("expected converts");
        assert_eq!(conv.count, 2);
        assert_eq!(conv.target, Month(4 + cfg.conversion_lag_months));
        assert_eq!(conv.source, ConvertSource::Workshop);
    }

    #[test]
    fn semester_classes_start_on_term_boundaries() {
        let cfg = Assumptions::canonical().classes;
        assert!(class_starts(&cfg, Month(1)));
        assert!(!class_starts(&cfg, Month(2)));
        assert!(!class_starts(&cfg, Month(3)));
        assert!(class_starts(&cfg, Month(4)));

        let mut rng = derive_stream(1, 0);
        assert_eq!(classes(&cfg, Month(2), &mut rng), ProgramOutcome::default());
    }

    #[test]
    fn monthly_classes_start_every_month() {
        let mut cfg = Assumptions::canonical().classes;
        cfg.calendar = ClassCalendar::Monthly;
        assert!((1..=12).all(|m| class_starts(&cfg, Month(m))));
    }

    #[test]
    fn class_students_bounded_by_seats() {
        let cfg = Assumptions::canonical().classes;
        let mut rng = derive_stream(2, 0);
        let c = classes(&cfg, Month(1), &mut rng);
        assert!(c.participants <= cfg.cohorts_per_start * cfg.seats_per_cohort);
        let instructor = cfg.cohorts_per_start as f64 * cfg.instructor_hours_per_cohort * cfg.instructor_rate;
        assert!(c.cost >= instructor);
    }

    #[test]
    fn event_count_respects_cap() {
        let mut cfg = Assumptions::canonical().events;
        cfg.mean_per_month = 50.0;
        cfg.max_per_month = 3;
        let mut rng = derive_stream(5, 0);
        for _ in 0..50 {
            assert!(events(&cfg, 1.0, &mut rng).participants <= 3);
        }
    }

    #[test]
    fn studio_occupancy_is_bounded() {
        let mut cfg = Assumptions::canonical().studios;
        cfg.occupancy_sd = 2.0;
        let mut rng = derive_stream(6, 0);
        let max = cfg.units as f64 * cfg.monthly_price;
        for _ in 0..200 {
            let r = designated_studios(&cfg, &mut rng);
            assert!((0.0..=max).contains(&r));
        }
    }

    #[test]
    fn disabled_streams_contribute_nothing() {
        let mut a = Assumptions::canonical();
        a.workshops.enabled = false;
        a.classes.enabled = false;
        a.events.enabled = false;
        a.studios.enabled = false;
        let mut rng = derive_stream(1, 0);
        let out = month_revenue(&a, Month(1), 1.0, &ArchetypeCounts([3, 3, 3, 3]), &mut rng);
        assert_eq!(out.revenue.workshops + out.revenue.classes + out.revenue.events, 0.0);
        assert_eq!(out.revenue.designated_studios, 0.0);
        assert!(out.conversions.is_empty());
    }
}
