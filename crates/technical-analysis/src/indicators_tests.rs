use crate::indicators::*;
use chrono::{Duration, TimeZone, Utc};
use signal_core::Bar;

fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: start + Duration::days(i as i64),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0 + i as f64,
        })
        .collect()
}

#[test]
fn sma_basic() {
    let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    let result = sma(&data, 3);
    assert_eq!(result, vec![2.0, 3.0, 4.0]);
}

#[test]
fn sma_insufficient_data() {
    assert!(sma(&[1.0, 2.0], 3).is_empty());
    assert!(sma(&[1.0, 2.0, 3.0], 0).is_empty());
}

#[test]
fn ema_full_length_with_seed() {
    let data: Vec<f64> = (1..=10).map(|i| i as f64).collect();
    let result = ema(&data, 3);
    assert_eq!(result.len(), data.len());
    // Seed is the SMA of the first 3 values
    assert_eq!(result[0], 2.0);
    assert_eq!(result[2], 2.0);
    // EMA trails a rising series from below
    assert!(result[9] < 10.0);
    assert!(result[9] > result[5]);
}

#[test]
fn rsi_all_gains_saturates_high() {
    let data: Vec<f64> = (1..=40).map(|i| i as f64).collect();
    let result = rsi(&data, 14);
    assert!(!result.is_empty());
    assert!(result.iter().all(|&v| v > 99.0));
}

#[test]
fn rsi_all_losses_saturates_low() {
    let data: Vec<f64> = (1..=40).rev().map(|i| i as f64).collect();
    let result = rsi(&data, 14);
    assert!(!result.is_empty());
    assert!(result.iter().all(|&v| v < 1.0));
}

#[test]
fn atr_positive_and_smoothed() {
    let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.5).sin()).collect();
    let bars = bars_from_closes(&closes);
    let result = atr(&bars, 14);
    assert_eq!(result.len(), bars.len() - 14);
    assert!(result.iter().all(|&v| v > 0.0));
}

#[test]
fn bollinger_lower_below_middle() {
    let closes: Vec<f64> = (0..30).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
    let bands = bollinger_bands(&closes, 20, 2.0);
    assert_eq!(bands.lower.len(), closes.len() - 19);
    for i in 0..bands.lower.len() {
        assert!(bands.lower[i] <= bands.middle[i]);
        assert!(bands.upper[i] >= bands.middle[i]);
    }
}

#[test]
fn mfi_stays_in_bounds() {
    let closes: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.9).sin() * 4.0).collect();
    let bars = bars_from_closes(&closes);
    let result = mfi(&bars, 14);
    assert!(!result.is_empty());
    assert!(result.iter().all(|&v| (0.0..=100.0).contains(&v)));
}

#[test]
fn adx_requires_two_periods_plus_one() {
    let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
    let bars = bars_from_closes(&closes);
    assert!(adx(&bars, 14).adx.is_empty());

    let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
    let bars = bars_from_closes(&closes);
    let result = adx(&bars, 14);
    assert!(!result.adx.is_empty());
    // A persistent one-way trend yields a strong ADX
    assert!(*result.adx.last().unwrap() > 25.0);
}

#[test]
fn chandelier_sits_below_recent_high() {
    let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64 * 0.5).collect();
    let bars = bars_from_closes(&closes);
    let result = chandelier_exit_long(&bars, 22, 3.0);
    assert!(!result.is_empty());

    let last_high_window: f64 = bars[bars.len() - 22..]
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    assert!(*result.last().unwrap() < last_high_window);
}

#[test]
fn frame_columns_align_with_bars() {
    let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.3).sin() * 6.0).collect();
    let bars = bars_from_closes(&closes);
    let frame = IndicatorFrame::compute(&bars);

    assert_eq!(frame.ema_50.len(), bars.len());
    assert_eq!(frame.rsi_14.len(), bars.len());
    assert_eq!(frame.atr_14.len(), bars.len());
    assert_eq!(frame.atr_sma_20.len(), bars.len());
    assert_eq!(frame.adx_14.len(), bars.len());
    assert_eq!(frame.vol_sma_20.len(), bars.len());
    assert_eq!(frame.chandelier_exit_long.len(), bars.len());

    // Warmup is None, the tail is populated
    assert!(frame.rsi_14[0].is_none());
    assert!(frame.rsi_14.last().unwrap().is_some());
    assert!(frame.atr_sma_20[10].is_none());
    assert!(frame.atr_sma_20.last().unwrap().is_some());
}

#[test]
fn frame_on_empty_bars_is_empty() {
    let frame = IndicatorFrame::compute(&[]);
    assert!(frame.is_empty());
}
