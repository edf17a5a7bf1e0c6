use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::Assumptions;
use crate::rng;
use crate::types::{Archetype, ArchetypeCounts, ConvertSource, Month};

/// Early-tenure converts who joined in the same month from the same funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenureBucket {
    pub joined: Month,
    pub source: ConvertSource,
    pub counts: ArchetypeCounts,
}

/// Member population as bucketed counts.
///
/// `counts` holds every member. `tenure` holds the subset of class/workshop
/// converts still inside their early-tenure window; those members are also
/// included in `counts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Population {
    pub counts: ArchetypeCounts,
    pub tenure: Vec<TenureBucket>,
}

impl Population {
    /// Month-0 population: `starting_members` split by the archetype mix with
    /// largest-remainder rounding, so no draws happen before month 1.
    pub fn seeded(a: &Assumptions) -> Self {
        let n = a.market.starting_members;
        let exact: Vec<f64> = a.archetypes.iter().map(|c| c.mix * n as f64).collect();
        let mut counts = ArchetypeCounts::default();
        for (slot, x) in counts.0.iter_mut().zip(&exact) {
            *slot = x.floor() as u32;
        }
        let mut order: Vec<usize> = (0..exact.len()).collect();
        order.sort_by(|&i, &j| {
            let ri = exact[i] - exact[i].floor();
            let rj = exact[j] - exact[j].floor();
            rj.partial_cmp(&ri).unwrap_or(std::cmp::Ordering::Equal).then(i.cmp(&j))
        });
        let short = n.saturating_sub(counts.total()) as usize;
        for &i in order.iter().take(short) {
            counts.0[i] += 1;
        }
        Population { counts, tenure: Vec::new() }
    }

    pub fn total(&self) -> u32 {
        self.counts.total()
    }

    pub fn admit(&mut self, joiners: &ArchetypeCounts) {
        self.counts.add(joiners);
    }

    /// Admit deferred converts and open an early-tenure bucket for them.
    pub fn admit_converts(&mut self, month: Month, source: ConvertSource, joiners: ArchetypeCounts) {
        if joiners.total() == 0 {
            return;
        }
        self.counts.add(&joiners);
        self.tenure.push(TenureBucket { joined: month, source, counts: joiners });
    }

    /// Close buckets whose early-tenure window has passed. The members stay.
    pub fn expire_tenure(&mut self, month: Month, a: &Assumptions) {
        self.tenure.retain(|b| {
            b.counts.total() > 0 && month.0.saturating_sub(b.joined.0) <= early_window(a, b.source)
        });
    }

    /// Members of `archetype` currently inside an early-tenure window.
    pub fn early_count(&self, archetype: Archetype) -> u32 {
        self.tenure.iter().map(|b| b.counts[archetype]).sum()
    }
}

fn early_window(a: &Assumptions, source: ConvertSource) -> u32 {
    match source {
        ConvertSource::Workshop => a.workshops.early_tenure_months,
        ConvertSource::Class => a.classes.early_tenure_months,
    }
}

fn early_multiplier(a: &Assumptions, source: ConvertSource) -> f64 {
    match source {
        ConvertSource::Workshop => a.workshops.early_churn_multiplier,
        ConvertSource::Class => a.classes.early_churn_multiplier,
    }
}

/// Month-level multipliers on every archetype's base churn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChurnDrivers {
    /// `(price / reference) ^ churn_elasticity`.
    pub price_factor: f64,
    /// `1 + uplift · max(0, utilization − 1)`.
    pub crowding: f64,
    /// Downturn churn uplift, 1 in normal times.
    pub macro_factor: f64,
}

impl ChurnDrivers {
    pub fn new(a: &Assumptions, crowding: f64, macro_factor: f64) -> Self {
        let price_factor = (a.pricing.membership_price / a.pricing.reference_price)
            .powf(a.pricing.churn_elasticity);
        ChurnDrivers { price_factor, crowding, macro_factor }
    }
}

/// Clamped monthly churn probability.
pub fn churn_probability(base_churn: f64, drivers: &ChurnDrivers, early_multiplier: f64) -> f64 {
    rng::clamp_probability(
        base_churn * drivers.price_factor * drivers.crowding * drivers.macro_factor * early_multiplier,
        "churn probability",
    )
}

/// Draw churners per archetype bucket and remove them. Returns churn by archetype.
pub fn draw_churn(
    population: &mut Population,
    a: &Assumptions,
    drivers: &ChurnDrivers,
    rng: &mut impl Rng,
) -> ArchetypeCounts {
    let mut churned = ArchetypeCounts::default();
    for archetype in Archetype::ALL {
        let base = a.archetype(archetype).base_churn;
        let general = population.counts[archetype].saturating_sub(population.early_count(archetype));
        let mut lost = rng::binomial(rng, general, churn_probability(base, drivers, 1.0));

        for bucket in population.tenure.iter_mut() {
            let p = churn_probability(base, drivers, early_multiplier(a, bucket.source));
            let n = rng::binomial(rng, bucket.counts[archetype], p);
            bucket.counts[archetype] -= n;
            lost += n;
        }

        population.counts[archetype] = population.counts[archetype].saturating_sub(lost);
        churned[archetype] = lost;
    }
    churned
}

/// Multinomial archetype assignment for `n` new joiners.
pub fn assign_archetypes(a: &Assumptions, n: u32, rng: &mut impl Rng) -> ArchetypeCounts {
    let weights = [
        a.archetype(Archetype::Hobbyist).mix,
        a.archetype(Archetype::CommittedArtist).mix,
        a.archetype(Archetype::ProductionPotter).mix,
        a.archetype(Archetype::SeasonalUser).mix,
    ];
    ArchetypeCounts(rng::multinomial(rng, n, &weights))
}

/// Remaining onboarding slots this month. Each join source takes from it in
/// turn: pool joins, then referrals, then deferred conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headroom {
    remaining: u32,
}

impl Headroom {
    pub fn new(onboarding_per_month: u32, max_members: u32, current_members: u32) -> Self {
        Headroom { remaining: onboarding_per_month.min(max_members.saturating_sub(current_members)) }
    }

    /// Grant up to `wanted` slots and return how many were granted.
    pub fn take(&mut self, wanted: u32) -> u32 {
        let granted = wanted.min(self.remaining);
        self.remaining -= granted;
        granted
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Future joins from workshop and class attendees, keyed by target month.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeferredJoins {
    queue: BTreeMap<Month, [u32; 2]>,
}

impl DeferredJoins {
    pub fn schedule(&mut self, target: Month, source: ConvertSource, n: u32) {
        if n == 0 {
            return;
        }
        self.queue.entry(target).or_insert([0, 0])[source_slot(source)] += n;
    }

    /// Remove and return everything due on or before `month`, workshops first.
    pub fn take_due(&mut self, month: Month) -> [(ConvertSource, u32); 2] {
        let later = self.queue.split_off(&month.offset(1));
        let due = std::mem::replace(&mut self.queue, later);
        let mut totals = [0u32; 2];
        for counts in due.values() {
            totals[0] += counts[0];
            totals[1] += counts[1];
        }
        [(ConvertSource::Workshop, totals[0]), (ConvertSource::Class, totals[1])]
    }

    pub fn pending(&self) -> u32 {
        self.queue.values().map(|c| c[0] + c[1]).sum()
    }
}

fn source_slot(source: ConvertSource) -> usize {
    match source {
        ConvertSource::Workshop => 0,
        ConvertSource::Class => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::derive_stream;

    fn neutral_drivers() -> ChurnDrivers {
        ChurnDrivers { price_factor: 1.0, crowding: 1.0, macro_factor: 1.0 }
    }

    #[test]
    fn seeded_population_matches_starting_members() {
        let mut a = Assumptions::canonical();
        for n in [0, 1, 7, 33, 77] {
            a.market.starting_members = n;
            let pop = Population::seeded(&a);
            assert_eq!(pop.total(), n);
            assert!(pop.tenure.is_empty());
        }
    }

    #[test]
    fn seeded_population_follows_mix() {
        let mut a = Assumptions::canonical();
        a.market.starting_members = 20;
        let pop = Population::seeded(&a);
        // 0.35, 0.40, 0.10, 0.15 of 20
        assert_eq!(pop.counts, ArchetypeCounts([7, 8, 2, 3]));
    }

    #[test]
    fn churn_never_exceeds_population() {
        let a = Assumptions::canonical();
        let mut pop = Population { counts: ArchetypeCounts([5, 5, 5, 5]), tenure: Vec::new() };
        let mut rng = derive_stream(1, 0);
        let drivers = ChurnDrivers { price_factor: 100.0, crowding: 1.0, macro_factor: 1.0 };
        let churned = draw_churn(&mut pop, &a, &drivers, &mut rng);
        assert_eq!(churned, ArchetypeCounts([5, 5, 5, 5]), "p clamps to 1");
        assert_eq!(pop.total(), 0);
    }

    #[test]
    fn early_tenure_bucket_churns_faster() {
        let mut a = Assumptions::canonical();
        a.archetypes[Archetype::Hobbyist.index()].base_churn = 0.1;
        a.classes.early_churn_multiplier = 5.0;
        let mut rng = derive_stream(2, 0);
        let (mut general_lost, mut early_lost) = (0u32, 0u32);
        for _ in 0..400 {
            let mut pop = Population::default();
            pop.admit(&ArchetypeCounts([20, 0, 0, 0]));
            pop.admit_converts(Month(1), ConvertSource::Class, ArchetypeCounts([20, 0, 0, 0]));
            draw_churn(&mut pop, &a, &neutral_drivers(), &mut rng);
            let early_left = pop.early_count(Archetype::Hobbyist);
            early_lost += 20 - early_left;
            general_lost += 20 - (pop.counts[Archetype::Hobbyist] - early_left);
        }
        assert!(
            early_lost > 3 * general_lost,
            "early converts should churn ~5x faster: early {early_lost}, general {general_lost}"
        );
    }

    #[test]
    fn tenure_buckets_expire_but_members_stay() {
        let mut a = Assumptions::canonical();
        a.workshops.early_tenure_months = 2;
        let mut pop = Population::default();
        pop.admit_converts(Month(3), ConvertSource::Workshop, ArchetypeCounts([1, 2, 0, 0]));
        pop.expire_tenure(Month(5), &a);
        assert_eq!(pop.tenure.len(), 1);
        pop.expire_tenure(Month(6), &a);
        assert!(pop.tenure.is_empty());
        assert_eq!(pop.total(), 3);
    }

    #[test]
    fn churn_probability_is_clamped() {
        let drivers = ChurnDrivers { price_factor: 10.0, crowding: 3.0, macro_factor: 2.0 };
        assert_eq!(churn_probability(0.5, &drivers, 1.0), 1.0);
        assert_eq!(churn_probability(0.0, &drivers, 4.0), 0.0);
    }

    #[test]
    fn higher_price_raises_churn_driver() {
        let mut a = Assumptions::canonical();
        let at_ref = ChurnDrivers::new(&a, 1.0, 1.0).price_factor;
        a.pricing.membership_price *= 1.5;
        assert!(ChurnDrivers::new(&a, 1.0, 1.0).price_factor > at_ref);
    }

    #[test]
    fn headroom_allocates_in_call_order() {
        let mut h = Headroom::new(10, 77, 70);
        assert_eq!(h.remaining(), 7);
        assert_eq!(h.take(5), 5);
        assert_eq!(h.take(5), 2);
        assert_eq!(h.take(5), 0);
    }

    #[test]
    fn headroom_is_zero_at_cap() {
        let mut h = Headroom::new(10, 77, 77);
        assert_eq!(h.take(3), 0);
        let mut over = Headroom::new(10, 77, 80);
        assert_eq!(over.take(3), 0);
    }

    #[test]
    fn assigned_archetypes_sum_to_joiners() {
        let a = Assumptions::canonical();
        let mut rng = derive_stream(5, 0);
        for n in [0, 1, 9, 40] {
            assert_eq!(assign_archetypes(&a, n, &mut rng).total(), n);
        }
    }

    #[test]
    fn deferred_joins_release_on_target_month() {
        let mut q = DeferredJoins::default();
        q.schedule(Month(3), ConvertSource::Workshop, 2);
        q.schedule(Month(3), ConvertSource::Class, 4);
        q.schedule(Month(5), ConvertSource::Class, 1);
        assert_eq!(q.take_due(Month(2)), [(ConvertSource::Workshop, 0), (ConvertSource::Class, 0)]);
        assert_eq!(q.take_due(Month(3)), [(ConvertSource::Workshop, 2), (ConvertSource::Class, 4)]);
        assert_eq!(q.pending(), 1);
        assert_eq!(q.take_due(Month(5))[1], (ConvertSource::Class, 1));
        assert_eq!(q.pending(), 0);
    }
}
