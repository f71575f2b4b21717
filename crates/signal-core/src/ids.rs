use chrono::{DateTime, NaiveDate, Utc};
use sha2::{Digest, Sha256};

/// Deterministic signal identifier.
///
/// Hash of `ds|strategy_id|symbol|pattern_name|bar_ts`. Re-running the
/// generator over the same bar always yields the same id, which doubles as
/// the broker client-order-id for end-to-end idempotency.
pub fn deterministic_signal_id(
    ds: NaiveDate,
    strategy_id: &str,
    symbol: &str,
    pattern_name: &str,
    bar_ts: DateTime<Utc>,
) -> String {
    let payload = format!(
        "{}|{}|{}|{}|{}",
        ds.format("%Y-%m-%d"),
        strategy_id,
        symbol,
        pattern_name,
        bar_ts.to_rfc3339()
    );
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(digest)
}

/// Content hash used by the strategy-sync SCD2 pipeline
pub fn content_hash(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn signal_id_is_deterministic() {
        let ds = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let a = deterministic_signal_id(ds, "BULL_FLAG", "BTC/USD", "BULL_FLAG", ts);
        let b = deterministic_signal_id(ds, "BULL_FLAG", "BTC/USD", "BULL_FLAG", ts);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn signal_id_varies_with_inputs() {
        let ds = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let base = deterministic_signal_id(ds, "BULL_FLAG", "BTC/USD", "BULL_FLAG", ts);
        assert_ne!(
            base,
            deterministic_signal_id(ds, "BULL_FLAG", "ETH/USD", "BULL_FLAG", ts)
        );
        assert_ne!(
            base,
            deterministic_signal_id(ds, "BULL_FLAG", "BTC/USD", "MORNING_STAR", ts)
        );
    }
}
