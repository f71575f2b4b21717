/// Taker fee rates by crypto volume tier. Orders here are market orders, so
/// the taker side always applies. Final fees are reconciled later from the
/// broker's CFEE activities; this is only the emission-time estimate.
const TAKER_RATES: &[f64] = &[
    0.0025, // tier 0
    0.0022, 0.0020, 0.0018, 0.0015, 0.0013, 0.0012, 0.0010,
    0.0008, // tier 8+
];

pub fn taker_rate_for_tier(tier: i32) -> f64 {
    let idx = tier.clamp(0, TAKER_RATES.len() as i32 - 1) as usize;
    TAKER_RATES[idx]
}

/// Estimated crypto fee for a notional traded at the account's tier
pub fn estimate_crypto_fee(notional_usd: f64, crypto_tier: Option<i32>) -> f64 {
    let rate = taker_rate_for_tier(crypto_tier.unwrap_or(0));
    (notional_usd.abs() * rate * 1e8).round() / 1e8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_zero_is_default() {
        assert_eq!(estimate_crypto_fee(10_000.0, None), 25.0);
        assert_eq!(estimate_crypto_fee(10_000.0, Some(0)), 25.0);
    }

    #[test]
    fn higher_tiers_pay_less() {
        let t0 = estimate_crypto_fee(10_000.0, Some(0));
        let t4 = estimate_crypto_fee(10_000.0, Some(4));
        let t8 = estimate_crypto_fee(10_000.0, Some(8));
        assert!(t0 > t4 && t4 > t8);
    }

    #[test]
    fn out_of_range_tiers_clamp() {
        assert_eq!(
            estimate_crypto_fee(1000.0, Some(99)),
            estimate_crypto_fee(1000.0, Some(8))
        );
        assert_eq!(
            estimate_crypto_fee(1000.0, Some(-3)),
            estimate_crypto_fee(1000.0, Some(0))
        );
    }
}
