use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{MarketConfig, PricingConfig};
use crate::rng;
use crate::types::{Month, Pool};

/// Remaining prospects in each finite pool. Counts never go below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketPools {
    pub no_access: u32,
    pub home: u32,
    /// Whole community pool, locked and unlocked.
    pub community: u32,
    /// The part of `community` eligible to join; always `<= community`.
    pub community_unlocked: u32,
}

impl MarketPools {
    pub fn new(cfg: &MarketConfig) -> Self {
        MarketPools {
            no_access: cfg.pools[Pool::NoAccess.index()].initial_size,
            home: cfg.pools[Pool::Home.index()].initial_size,
            community: cfg.pools[Pool::Community.index()].initial_size,
            community_unlocked: 0,
        }
    }

    pub fn size(&self, pool: Pool) -> u32 {
        match pool {
            Pool::NoAccess => self.no_access,
            Pool::Home => self.home,
            Pool::Community => self.community,
        }
    }

    /// Prospects who may join this month.
    pub fn eligible(&self, pool: Pool) -> u32 {
        match pool {
            Pool::Community => self.community_unlocked,
            other => self.size(other),
        }
    }

    /// Monthly inflow into every pool, then the community unlock on term boundaries
    /// (months 1, 1 + term, 1 + 2·term, …).
    pub fn begin_month(&mut self, cfg: &MarketConfig, term_months: u32, month: Month) {
        self.no_access += cfg.pools[Pool::NoAccess.index()].monthly_inflow;
        self.home += cfg.pools[Pool::Home.index()].monthly_inflow;
        self.community += cfg.pools[Pool::Community.index()].monthly_inflow;

        if term_months > 0 && month.0 >= 1 && (month.0 - 1) % term_months == 0 {
            let locked = self.community - self.community_unlocked;
            let unlock = (locked as f64 * cfg.community_unlock_fraction).round() as u32;
            self.community_unlocked += unlock.min(locked);
        }
    }

    /// Take accepted joiners out of their pool.
    pub fn remove_joiners(&mut self, pool: Pool, n: u32) {
        match pool {
            Pool::NoAccess => self.no_access = self.no_access.saturating_sub(n),
            Pool::Home => self.home = self.home.saturating_sub(n),
            Pool::Community => {
                let n = n.min(self.community_unlocked);
                self.community_unlocked -= n;
                self.community -= n;
            }
        }
    }
}

/// Multiplicative drivers of the monthly join probability, shared by all pools.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DemandFactors {
    pub seasonality: f64,
    pub price_factor: f64,
    pub capacity_damping: f64,
    /// Downturn severity or recovery uplift; 1 in normal times.
    pub macro_factor: f64,
    pub wom_multiplier: f64,
}

impl DemandFactors {
    pub fn combined(&self) -> f64 {
        self.seasonality * self.price_factor * self.capacity_damping * self.macro_factor * self.wom_multiplier
    }
}

/// `(price / reference_price) ^ join_elasticity`.
pub fn join_price_factor(pricing: &PricingConfig) -> f64 {
    (pricing.membership_price / pricing.reference_price).powf(pricing.join_elasticity)
}

/// `1 + q · min(members / saturation, 1)`.
pub fn wom_multiplier(cfg: &MarketConfig, members: u32) -> f64 {
    1.0 + cfg.wom_q * (members as f64 / cfg.wom_saturation).min(1.0)
}

/// Clamped monthly join probability for one pool.
pub fn join_probability(cfg: &MarketConfig, pool: Pool, factors: &DemandFactors) -> f64 {
    rng::clamp_probability(
        cfg.pools[pool.index()].baseline_join_rate * factors.combined(),
        "pool join probability",
    )
}

/// Binomial joiners per pool, in [`Pool::ALL`] order. These are candidates:
/// the orchestrator caps them against onboarding and member headroom.
pub fn draw_pool_joins(
    pools: &MarketPools,
    cfg: &MarketConfig,
    factors: &DemandFactors,
    rng: &mut impl Rng,
) -> [u32; 3] {
    let mut out = [0; 3];
    for pool in Pool::ALL {
        let p = join_probability(cfg, pool, factors);
        out[pool.index()] = rng::binomial(rng, pools.eligible(pool), p);
    }
    out
}
