use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::ReferralConfig;
use crate::rng;

/// Referral outcome for one month, before the headroom cap is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referrals {
    pub made: u32,
    pub converted: u32,
}

/// Each member refers with a fixed probability; each referral converts with
/// a separate probability scaled by the macro factor.
pub fn draw_referrals(
    cfg: &ReferralConfig,
    members: u32,
    macro_factor: f64,
    rng: &mut impl Rng,
) -> Referrals {
    let p_refer = rng::clamp_probability(cfg.referral_probability, "referral probability");
    let made = rng::binomial(rng, members, p_refer);
    let p_convert = rng::clamp_probability(
        cfg.conversion_probability * macro_factor,
        "referral conversion probability",
    );
    let converted = rng::binomial(rng, made, p_convert);
    Referrals { made, converted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::derive_stream;

    #[test]
    fn no_members_no_referrals() {
        let cfg = ReferralConfig { referral_probability: 0.5, conversion_probability: 0.5 };
        let mut rng = derive_stream(1, 0);
        assert_eq!(draw_referrals(&cfg, 0, 1.0, &mut rng), Referrals::default());
    }

    #[test]
    fn conversions_bounded_by_referrals() {
        let cfg = ReferralConfig { referral_probability: 0.3, conversion_probability: 0.6 };
        let mut rng = derive_stream(1, 0);
        for _ in 0..200 {
            let r = draw_referrals(&cfg, 60, 1.0, &mut rng);
            assert!(r.made <= 60);
            assert!(r.converted <= r.made);
        }
    }

    #[test]
    fn downturn_suppresses_conversions() {
        let cfg = ReferralConfig { referral_probability: 1.0, conversion_probability: 0.8 };
        let mut rng = derive_stream(4, 0);
        let r = draw_referrals(&cfg, 50, 0.0, &mut rng);
        assert_eq!(r.made, 50);
        assert_eq!(r.converted, 0);
    }

    #[test]
    fn expected_conversions_match_rates() {
        let cfg = ReferralConfig { referral_probability: 0.1, conversion_probability: 0.5 };
        let mut rng = derive_stream(8, 0);
        let n = 4_000;
        let mean = (0..n)
            .map(|_| draw_referrals(&cfg, 100, 1.0, &mut rng).converted as f64)
            .sum::<f64>()
            / n as f64;
        assert!((mean - 5.0).abs() < 0.25, "mean conversions {mean:.2} not near 5");
    }
}
