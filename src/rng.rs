use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::{Binomial, Distribution, LogNormal, Normal, Poisson, Triangular};
use tracing::warn;

use crate::config::TriangularRange;

/// The generator type every run draws from.
pub type SimRng = ChaCha20Rng;

/// Independent, reproducible substream for `run_index` under `master_seed`.
///
/// The master seed fixes the ChaCha key and the run index selects the stream,
/// so run `i` sees the same numbers whether it executes first, last, or on
/// another thread. Within a month the draws happen in this order:
///
/// 1. macro shock state (start probability, duration)
/// 2. pool joins: no-access, home, community
/// 3. churn: per archetype, general population then tenure buckets
/// 4. referrals: referrals made, then conversions
/// 5. archetype assignment of accepted joiners
/// 6. revenue terms: clay per archetype, class fill, events, designated studios
/// 7. maintenance variation
pub fn derive_stream(master_seed: u64, run_index: u64) -> SimRng {
    let mut rng = ChaCha20Rng::seed_from_u64(master_seed);
    rng.set_stream(run_index);
    rng
}

/// Clamp a derived probability into `[0, 1]`. Undefined values become 0.
/// Anything that needed clamping is logged as a numeric degeneracy.
pub fn clamp_probability(p: f64, what: &'static str) -> f64 {
    if p.is_nan() {
        warn!(target: "claysim::numeric", what, "undefined probability replaced with 0");
        return 0.0;
    }
    if !(0.0..=1.0).contains(&p) {
        warn!(target: "claysim::numeric", what, p, "probability clamped to [0, 1]");
    }
    p.clamp(0.0, 1.0)
}

pub fn uniform(rng: &mut impl Rng, low: f64, high: f64) -> f64 {
    if high <= low {
        return low;
    }
    rng.random_range(low..high)
}

pub fn bernoulli(rng: &mut impl Rng, p: f64) -> bool {
    rng.random_bool(p.clamp(0.0, 1.0))
}

/// Successes out of `n` trials. `p` must already be clamped.
pub fn binomial(rng: &mut impl Rng, n: u32, p: f64) -> u32 {
    if n == 0 || p <= 0.0 {
        return 0;
    }
    if p >= 1.0 {
        return n;
    }
    match Binomial::new(n as u64, p) {
        Ok(dist) => dist.sample(rng) as u32,
        Err(e) => {
            warn!(target: "claysim::numeric", n, p, error = %e, "binomial undefined; drawing 0");
            0
        }
    }
}

/// Poisson count; non-positive or undefined means yield 0.
pub fn poisson(rng: &mut impl Rng, lambda: f64) -> u32 {
    if !(lambda.is_finite() && lambda > 0.0) {
        return 0;
    }
    match Poisson::new(lambda) {
        Ok(dist) => dist.sample(rng) as u32,
        Err(e) => {
            warn!(target: "claysim::numeric", lambda, error = %e, "poisson undefined; drawing 0");
            0
        }
    }
}

pub fn triangular(rng: &mut impl Rng, range: &TriangularRange) -> f64 {
    if range.high <= range.low {
        return range.low;
    }
    match Triangular::new(range.low, range.high, range.typical) {
        Ok(dist) => dist.sample(rng),
        Err(e) => {
            warn!(target: "claysim::numeric", ?range, error = %e, "triangular undefined; using typical");
            range.typical
        }
    }
}

pub fn normal(rng: &mut impl Rng, mean: f64, sd: f64) -> f64 {
    if sd <= 0.0 {
        return mean;
    }
    match Normal::new(mean, sd) {
        Ok(dist) => dist.sample(rng),
        Err(e) => {
            warn!(target: "claysim::numeric", mean, sd, error = %e, "normal undefined; using mean");
            mean
        }
    }
}

/// Log-normal with ln-space parameters; E[X] = exp(mu + sigma²/2).
pub fn lognormal(rng: &mut impl Rng, mu: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return mu.exp();
    }
    match LogNormal::new(mu, sigma) {
        Ok(dist) => dist.sample(rng),
        Err(e) => {
            warn!(target: "claysim::numeric", mu, sigma, error = %e, "lognormal undefined; using median");
            mu.exp()
        }
    }
}

/// Split `n` across categories by `weights` using conditional binomials.
/// Weights need not be normalized; the last positive-weight category absorbs
/// rounding. All-zero weights assign nobody.
pub fn multinomial<const K: usize>(rng: &mut impl Rng, n: u32, weights: &[f64; K]) -> [u32; K] {
    let mut out = [0u32; K];
    let Some(last) = weights.iter().rposition(|&w| w > 0.0) else {
        return out;
    };
    let mut remaining = n;
    let mut mass: f64 = weights.iter().map(|w| w.max(0.0)).sum();
    for (k, &w) in weights.iter().enumerate().take(last + 1) {
        if remaining == 0 {
            break;
        }
        let w = w.max(0.0);
        let draw = if k == last { remaining } else { binomial(rng, remaining, (w / mass).min(1.0)) };
        out[k] = draw;
        remaining -= draw;
        mass -= w;
    }
    out
}
