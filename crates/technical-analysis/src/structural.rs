use signal_core::{Bar, PatternClassification, Pivot, PivotKind, PivotSnapshot};

/// Minimum bars between first and last pivot; prevents micro-pattern
/// misclassification.
pub const MINIMUM_PATTERN_WIDTH: usize = 10;

/// Formations spanning more than this many bars classify as MACRO.
pub const MACRO_THRESHOLD_DAYS: i64 = 90;

/// Metadata for a structural pattern detected at the latest bar
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMeta {
    pub duration_days: i64,
    pub classification: PatternClassification,
    pub anchors: Vec<PivotSnapshot>,
}

fn classify(duration_days: i64) -> PatternClassification {
    if duration_days > MACRO_THRESHOLD_DAYS {
        PatternClassification::MacroPattern
    } else {
        PatternClassification::StandardPattern
    }
}

fn meta_from(current_idx: usize, first_pivot_idx: usize, anchors: Vec<PivotSnapshot>) -> PatternMeta {
    let duration_days = (current_idx - first_pivot_idx) as i64;
    PatternMeta {
        duration_days,
        classification: classify(duration_days),
        anchors,
    }
}

fn pivots_match_price(a: &Pivot, b: &Pivot, tolerance_pct: f64) -> bool {
    let avg = (a.price + b.price) / 2.0;
    if avg <= 0.0 {
        return false;
    }
    (a.price - b.price).abs() / avg < tolerance_pct
}

/// Structural patterns evaluated against the latest bar
#[derive(Debug, Clone, Default)]
pub struct StructuralSet {
    pub double_bottom: Option<PatternMeta>,
    pub inverse_head_shoulders: Option<PatternMeta>,
    pub bull_flag: Option<PatternMeta>,
    pub cup_and_handle: Option<PatternMeta>,
    pub ascending_triangle: Option<PatternMeta>,
    pub falling_wedge: Option<PatternMeta>,
}

impl StructuralSet {
    pub fn detect(bars: &[Bar], pivots: &[Pivot]) -> Self {
        if bars.is_empty() {
            return Self::default();
        }
        Self {
            double_bottom: detect_double_bottom(bars, pivots),
            inverse_head_shoulders: detect_inverse_head_shoulders(bars, pivots),
            bull_flag: detect_bull_flag(bars, pivots),
            cup_and_handle: detect_cup_and_handle(bars, pivots),
            ascending_triangle: detect_ascending_triangle(bars, pivots),
            falling_wedge: detect_falling_wedge(bars, pivots),
        }
    }
}

/// Two valleys within 1.5% of each other separated by a peak at least 3%
/// above them.
pub fn detect_double_bottom(bars: &[Bar], pivots: &[Pivot]) -> Option<PatternMeta> {
    let valleys: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Valley).collect();
    let peaks: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Peak).collect();

    if valleys.len() < 2 || peaks.is_empty() {
        return None;
    }

    let current_idx = bars.len() - 1;
    let mut found = None;

    for pair in valleys.windows(2) {
        let (v1, v2) = (pair[0], pair[1]);

        if v2.index - v1.index < MINIMUM_PATTERN_WIDTH {
            continue;
        }
        if !pivots_match_price(v1, v2, 0.015) {
            continue;
        }

        // Neckline: highest peak between the two valleys
        let Some(p1) = peaks
            .iter()
            .filter(|p| p.index > v1.index && p.index < v2.index)
            .max_by(|a, b| a.price.total_cmp(&b.price))
        else {
            continue;
        };

        let avg_bottoms = (v1.price + v2.price) / 2.0;
        if p1.price < avg_bottoms * 1.03 {
            continue;
        }

        if current_idx >= v2.index {
            found = Some(meta_from(
                current_idx,
                v1.index,
                vec![v1.into(), (*p1).into(), v2.into()],
            ));
        }
    }

    found
}

/// Five pivots V1-P1-V2-P2-V3: head at least 3% below the lowest shoulder,
/// shoulders within 3%, time ratio of the two halves within [0.6, 1.4],
/// breakout above the neckline (the lower of the two peaks).
pub fn detect_inverse_head_shoulders(bars: &[Bar], pivots: &[Pivot]) -> Option<PatternMeta> {
    let valleys: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Valley).collect();
    let peaks: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Peak).collect();

    if valleys.len() < 3 || peaks.len() < 2 {
        return None;
    }

    let current_idx = bars.len() - 1;
    let current_close = bars[current_idx].close;
    let mut found = None;

    for trio in valleys.windows(3) {
        let (v1, v2, v3) = (trio[0], trio[1], trio[2]);

        if v3.index - v1.index < MINIMUM_PATTERN_WIDTH {
            continue;
        }

        // Head prominence
        let lowest_shoulder = v1.price.min(v3.price);
        if lowest_shoulder <= 0.0 || (lowest_shoulder - v2.price) / lowest_shoulder < 0.03 {
            continue;
        }

        // Shoulder symmetry
        let avg_shoulders = (v1.price + v3.price) / 2.0;
        if (v1.price - v3.price).abs() / avg_shoulders > 0.03 {
            continue;
        }

        let p1 = peaks
            .iter()
            .filter(|p| p.index > v1.index && p.index < v2.index)
            .max_by(|a, b| a.price.total_cmp(&b.price));
        let p2 = peaks
            .iter()
            .filter(|p| p.index > v2.index && p.index < v3.index)
            .max_by(|a, b| a.price.total_cmp(&b.price));
        let (Some(p1), Some(p2)) = (p1, p2) else {
            continue;
        };

        // Time symmetry
        let left = (v2.index - v1.index) as f64;
        let right = (v3.index - v2.index) as f64;
        if right > 0.0 {
            let ratio = left / right;
            if !(0.6..=1.4).contains(&ratio) {
                continue;
            }
        }

        let neckline = p1.price.min(p2.price);
        if current_idx >= v3.index && current_close > neckline {
            found = Some(meta_from(
                current_idx,
                v1.index,
                vec![v1.into(), (*p1).into(), v2.into(), (*p2).into(), v3.into()],
            ));
        }
    }

    found
}

/// Pole of at least 15% from valley to peak, consolidation held in the upper
/// half of the pole with decaying volume, close near the flag high.
pub fn detect_bull_flag(bars: &[Bar], pivots: &[Pivot]) -> Option<PatternMeta> {
    if pivots.len() < 2 {
        return None;
    }

    let valleys: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Valley).collect();
    let peaks: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Peak).collect();
    if valleys.is_empty() || peaks.is_empty() {
        return None;
    }

    let current_idx = bars.len() - 1;
    let current_close = bars[current_idx].close;

    for pole_valley in valleys.iter().copied() {
        for pole_peak in peaks.iter().copied().filter(|p| p.index > pole_valley.index) {
            let pole_height = pole_peak.price - pole_valley.price;
            if pole_valley.price <= 0.0 || pole_height / pole_valley.price < 0.15 {
                continue;
            }

            if current_idx - pole_valley.index < MINIMUM_PATTERN_WIDTH {
                continue;
            }

            let consolidation_start = pole_peak.index + 1;
            if consolidation_start >= current_idx {
                continue;
            }

            let flag = &bars[consolidation_start..=current_idx];
            if flag.len() < 5 {
                continue;
            }

            let flag_low = flag.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            let flag_high = flag.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);

            // Consolidation must hold the upper half of the pole
            let pole_midpoint = pole_valley.price + pole_height * 0.5;
            if flag_low < pole_midpoint {
                continue;
            }

            // Volume decay during the flag
            let pole = &bars[pole_valley.index..=pole_peak.index];
            let pole_avg_vol = pole.iter().map(|b| b.volume).sum::<f64>() / pole.len() as f64;
            let flag_avg_vol = flag.iter().map(|b| b.volume).sum::<f64>() / flag.len() as f64;
            if flag_avg_vol >= pole_avg_vol {
                continue;
            }

            if current_close >= flag_high * 0.95 {
                let mut anchors: Vec<PivotSnapshot> = vec![pole_valley.into(), pole_peak.into()];
                anchors.extend(
                    pivots
                        .iter()
                        .filter(|p| p.index > pole_peak.index)
                        .take(4)
                        .map(PivotSnapshot::from),
                );
                return Some(meta_from(current_idx, pole_valley.index, anchors));
            }
        }
    }

    None
}

/// Left rim, at least 3 interior valleys forming a U, right rim within 10% of
/// the left, handle retracing no more than 15% of the cup depth, breakout
/// near the right rim.
pub fn detect_cup_and_handle(bars: &[Bar], pivots: &[Pivot]) -> Option<PatternMeta> {
    if pivots.len() < 5 {
        return None;
    }

    let valleys: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Valley).collect();
    let peaks: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Peak).collect();
    if valleys.len() < 3 || peaks.len() < 2 {
        return None;
    }

    let current_idx = bars.len() - 1;
    let current_close = bars[current_idx].close;

    for (i, left_rim) in peaks.iter().copied().enumerate() {
        if i + 1 >= peaks.len() {
            break;
        }

        let cup_valleys: Vec<&Pivot> = valleys
            .iter()
            .copied()
            .filter(|v| v.index > left_rim.index)
            .collect();
        if cup_valleys.len() < 3 {
            continue;
        }

        // Right rim: first later peak within 10% of the left rim price
        let right_rim = peaks
            .iter()
            .copied()
            .filter(|p| p.index > cup_valleys[0].index)
            .find(|p| (p.price - left_rim.price).abs() / left_rim.price <= 0.10);
        let Some(right_rim) = right_rim else {
            continue;
        };

        if right_rim.index - left_rim.index < MINIMUM_PATTERN_WIDTH {
            continue;
        }

        let interior: Vec<&Pivot> = cup_valleys
            .iter()
            .copied()
            .filter(|v| v.index > left_rim.index && v.index < right_rim.index)
            .collect();
        if interior.len() < 3 {
            continue;
        }

        let cup_bottom = interior
            .iter()
            .map(|v| v.price)
            .fold(f64::INFINITY, f64::min);
        let cup_depth = left_rim.price - cup_bottom;

        // U-shape: the rims of the interior must sit above the bottom
        let first = interior.first().map(|v| v.price).unwrap_or(cup_bottom);
        let last = interior.last().map(|v| v.price).unwrap_or(cup_bottom);
        if !(first > cup_bottom && last > cup_bottom) {
            continue;
        }

        // Handle: pivots after the right rim, shallow retracement
        let handle: Vec<&Pivot> = pivots.iter().filter(|p| p.index > right_rim.index).collect();
        if handle.is_empty() {
            continue;
        }

        let handle_low = handle
            .iter()
            .take(3)
            .map(|p| p.price)
            .fold(f64::INFINITY, f64::min);
        let handle_retrace_pct = if cup_depth > 0.0 {
            (right_rim.price - handle_low) / cup_depth
        } else {
            1.0
        };
        if handle_retrace_pct > 0.15 {
            continue;
        }

        let last_handle_idx = handle.iter().take(3).map(|p| p.index).max().unwrap_or(0);
        if current_idx >= last_handle_idx && current_close >= right_rim.price * 0.98 {
            let mut anchors: Vec<PivotSnapshot> = vec![left_rim.into()];
            anchors.extend(interior.iter().take(3).map(|v| PivotSnapshot::from(*v)));
            anchors.push(right_rim.into());
            anchors.extend(handle.iter().take(2).map(|p| PivotSnapshot::from(*p)));
            return Some(meta_from(current_idx, left_rim.index, anchors));
        }
    }

    None
}

/// Flat resistance (recent peaks within 2% of their mean) over rising support
/// (non-decreasing valleys with at least 1% total rise).
pub fn detect_ascending_triangle(bars: &[Bar], pivots: &[Pivot]) -> Option<PatternMeta> {
    if pivots.len() < 4 {
        return None;
    }

    let valleys: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Valley).collect();
    let peaks: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Peak).collect();
    if valleys.len() < 2 || peaks.len() < 2 {
        return None;
    }

    let recent_peaks = &peaks[peaks.len().saturating_sub(3)..];
    let recent_valleys = &valleys[valleys.len().saturating_sub(3)..];

    let first_idx = recent_peaks
        .iter()
        .chain(recent_valleys.iter())
        .map(|p| p.index)
        .min()?;
    let last_idx = recent_peaks
        .iter()
        .chain(recent_valleys.iter())
        .map(|p| p.index)
        .max()?;
    if last_idx - first_idx < MINIMUM_PATTERN_WIDTH {
        return None;
    }

    // Flat resistance
    let avg_peak = recent_peaks.iter().map(|p| p.price).sum::<f64>() / recent_peaks.len() as f64;
    let max_variance = recent_peaks
        .iter()
        .map(|p| (p.price - avg_peak).abs() / avg_peak)
        .fold(0.0, f64::max);
    if max_variance > 0.02 {
        return None;
    }

    // Rising support
    let valley_prices: Vec<f64> = recent_valleys.iter().map(|v| v.price).collect();
    let monotone = valley_prices.windows(2).all(|w| w[0] <= w[1]);
    let slope_ok = valley_prices
        .first()
        .zip(valley_prices.last())
        .map(|(first, last)| *first > 0.0 && (last - first) / first > 0.01)
        .unwrap_or(false);
    if !(monotone && slope_ok) {
        return None;
    }

    let current_idx = bars.len() - 1;
    let mut anchors: Vec<PivotSnapshot> = recent_peaks.iter().map(|p| PivotSnapshot::from(*p)).collect();
    anchors.extend(recent_valleys.iter().map(|v| PivotSnapshot::from(*v)));
    Some(meta_from(current_idx, first_idx, anchors))
}

/// Strictly lower highs over strictly lower lows with the highs falling
/// slower than the lows (convergence), broken by a close above the most
/// recent peak.
pub fn detect_falling_wedge(bars: &[Bar], pivots: &[Pivot]) -> Option<PatternMeta> {
    if pivots.len() < 4 {
        return None;
    }

    let valleys: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Valley).collect();
    let peaks: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Peak).collect();
    if valleys.len() < 2 || peaks.len() < 2 {
        return None;
    }

    let recent_peaks = &peaks[peaks.len().saturating_sub(3)..];
    let recent_valleys = &valleys[valleys.len().saturating_sub(3)..];

    let first_idx = recent_peaks
        .iter()
        .chain(recent_valleys.iter())
        .map(|p| p.index)
        .min()?;
    let last_idx = recent_peaks
        .iter()
        .chain(recent_valleys.iter())
        .map(|p| p.index)
        .max()?;
    if last_idx - first_idx < MINIMUM_PATTERN_WIDTH {
        return None;
    }

    let peak_prices: Vec<f64> = recent_peaks.iter().map(|p| p.price).collect();
    let valley_prices: Vec<f64> = recent_valleys.iter().map(|v| v.price).collect();

    let lower_highs = peak_prices.windows(2).all(|w| w[0] > w[1]);
    let lower_lows = valley_prices.windows(2).all(|w| w[0] > w[1]);
    if !(lower_highs && lower_lows) {
        return None;
    }

    // Convergence: highs falling slower than lows
    let peak_descent = (peak_prices[0] - peak_prices[peak_prices.len() - 1]) / peak_prices[0];
    let valley_descent =
        (valley_prices[0] - valley_prices[valley_prices.len() - 1]) / valley_prices[0];
    if peak_descent >= valley_descent {
        return None;
    }

    let current_idx = bars.len() - 1;
    let current_close = bars[current_idx].close;
    let upper_trendline = recent_peaks.last().map(|p| p.price)?;
    if current_close <= upper_trendline {
        return None;
    }

    let mut anchors: Vec<PivotSnapshot> = recent_peaks.iter().map(|p| PivotSnapshot::from(*p)).collect();
    anchors.extend(recent_valleys.iter().map(|v| PivotSnapshot::from(*v)));
    Some(meta_from(current_idx, first_idx, anchors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn pivot(index: usize, price: f64, kind: PivotKind) -> Pivot {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Pivot {
            timestamp: start + Duration::days(index as i64),
            price,
            kind,
            index,
        }
    }

    fn flat_bars(n: usize, close: f64) -> Vec<Bar> {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| Bar {
                timestamp: start + Duration::days(i as i64),
                open: close,
                high: close + 0.5,
                low: close - 0.5,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn double_bottom_matches_reference_geometry() {
        // Valleys at 90.0 (idx 0) and 90.5 (idx 21), peak 100.0 (idx 10):
        // width 21, variance 0.55%, neckline 11.1% above the bottoms
        let pivots = vec![
            pivot(0, 90.0, PivotKind::Valley),
            pivot(10, 100.0, PivotKind::Peak),
            pivot(21, 90.5, PivotKind::Valley),
        ];
        let bars = flat_bars(25, 99.0);

        let meta = detect_double_bottom(&bars, &pivots).expect("double bottom");
        assert_eq!(meta.anchors.len(), 3);
        assert_eq!(meta.anchors[0].price, 90.0);
        assert_eq!(meta.anchors[1].price, 100.0);
        assert_eq!(meta.anchors[2].price, 90.5);
        assert_eq!(meta.classification, PatternClassification::StandardPattern);
    }

    #[test]
    fn double_bottom_rejects_wide_valley_variance() {
        // 90.0 vs 92.0 is ~2.2% apart, beyond the 1.5% gate
        let pivots = vec![
            pivot(0, 90.0, PivotKind::Valley),
            pivot(10, 100.0, PivotKind::Peak),
            pivot(21, 92.0, PivotKind::Valley),
        ];
        let bars = flat_bars(25, 99.0);
        assert!(detect_double_bottom(&bars, &pivots).is_none());
    }

    #[test]
    fn double_bottom_rejects_narrow_width() {
        let pivots = vec![
            pivot(0, 90.0, PivotKind::Valley),
            pivot(3, 100.0, PivotKind::Peak),
            pivot(6, 90.5, PivotKind::Valley),
        ];
        let bars = flat_bars(10, 99.0);
        assert!(detect_double_bottom(&bars, &pivots).is_none());
    }

    #[test]
    fn double_bottom_rejects_shallow_neckline() {
        // Peak only 2% above the bottoms, under the 3% requirement
        let pivots = vec![
            pivot(0, 90.0, PivotKind::Valley),
            pivot(10, 91.8, PivotKind::Peak),
            pivot(21, 90.5, PivotKind::Valley),
        ];
        let bars = flat_bars(25, 99.0);
        assert!(detect_double_bottom(&bars, &pivots).is_none());
    }

    #[test]
    fn macro_classification_kicks_in_past_90_days() {
        let pivots = vec![
            pivot(0, 90.0, PivotKind::Valley),
            pivot(50, 100.0, PivotKind::Peak),
            pivot(95, 90.5, PivotKind::Valley),
        ];
        let bars = flat_bars(100, 99.0);

        let meta = detect_double_bottom(&bars, &pivots).expect("double bottom");
        assert_eq!(meta.classification, PatternClassification::MacroPattern);
    }

    #[test]
    fn inverse_hs_requires_head_prominence_and_symmetry() {
        // Shoulders ~95, head 90 (5.3% below), neckline peaks 102/101
        let pivots = vec![
            pivot(0, 95.0, PivotKind::Valley),
            pivot(5, 102.0, PivotKind::Peak),
            pivot(10, 90.0, PivotKind::Valley),
            pivot(15, 101.0, PivotKind::Peak),
            pivot(20, 95.5, PivotKind::Valley),
        ];
        let bars = flat_bars(25, 103.0); // close above neckline 101

        let meta = detect_inverse_head_shoulders(&bars, &pivots).expect("inverse H&S");
        assert_eq!(meta.anchors.len(), 5);
        assert_eq!(meta.anchors[2].price, 90.0);

        // Below-neckline close: no breakout, no pattern
        let bars = flat_bars(25, 100.0);
        assert!(detect_inverse_head_shoulders(&bars, &pivots).is_none());
    }

    #[test]
    fn inverse_hs_rejects_time_asymmetry() {
        // V1->V2 = 4 bars, V2->V3 = 16 bars => ratio 0.25, outside [0.6, 1.4]
        let pivots = vec![
            pivot(0, 95.0, PivotKind::Valley),
            pivot(2, 102.0, PivotKind::Peak),
            pivot(4, 90.0, PivotKind::Valley),
            pivot(12, 101.0, PivotKind::Peak),
            pivot(20, 95.5, PivotKind::Valley),
        ];
        let bars = flat_bars(25, 103.0);
        assert!(detect_inverse_head_shoulders(&bars, &pivots).is_none());
    }

    #[test]
    fn bull_flag_detects_pole_and_tight_flag() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut bars: Vec<Bar> = Vec::new();
        // Pole: 100 -> 125 over 6 bars on heavy volume
        for i in 0..6 {
            let px = 100.0 + i as f64 * 5.0;
            bars.push(Bar {
                timestamp: start + Duration::days(i as i64),
                open: px,
                high: px + 5.0,
                low: px - 1.0,
                close: px + 4.0,
                volume: 10_000.0,
            });
        }
        // Flag: drift between 120-126 on light volume
        for i in 6..14 {
            bars.push(Bar {
                timestamp: start + Duration::days(i as i64),
                open: 124.0,
                high: 126.0,
                low: 120.0,
                close: 125.0,
                volume: 2_000.0,
            });
        }

        let pivots = vec![
            pivot(0, 100.0, PivotKind::Valley),
            pivot(5, 130.0, PivotKind::Peak),
        ];

        let meta = detect_bull_flag(&bars, &pivots).expect("bull flag");
        assert!(meta.anchors.len() >= 2);
        assert_eq!(meta.anchors[0].price, 100.0);
    }

    #[test]
    fn ascending_triangle_needs_flat_resistance_and_rising_support() {
        let pivots = vec![
            pivot(0, 95.0, PivotKind::Valley),
            pivot(3, 100.0, PivotKind::Peak),
            pivot(6, 96.5, PivotKind::Valley),
            pivot(9, 100.5, PivotKind::Peak),
            pivot(12, 98.0, PivotKind::Valley),
            pivot(15, 100.2, PivotKind::Peak),
        ];
        let bars = flat_bars(18, 100.0);
        assert!(detect_ascending_triangle(&bars, &pivots).is_some());

        // Falling valleys break the support requirement
        let pivots = vec![
            pivot(0, 98.0, PivotKind::Valley),
            pivot(3, 100.0, PivotKind::Peak),
            pivot(6, 96.5, PivotKind::Valley),
            pivot(9, 100.5, PivotKind::Peak),
            pivot(12, 95.0, PivotKind::Valley),
            pivot(15, 100.2, PivotKind::Peak),
        ];
        assert!(detect_ascending_triangle(&bars, &pivots).is_none());
    }

    #[test]
    fn falling_wedge_requires_convergence_and_breakout() {
        // Highs fall slowly (100 -> 98), lows fall faster (90 -> 84)
        let pivots = vec![
            pivot(0, 100.0, PivotKind::Peak),
            pivot(3, 90.0, PivotKind::Valley),
            pivot(6, 99.0, PivotKind::Peak),
            pivot(9, 87.0, PivotKind::Valley),
            pivot(12, 98.0, PivotKind::Peak),
            pivot(15, 84.0, PivotKind::Valley),
        ];

        let bars = flat_bars(18, 99.0); // close above most recent peak 98
        assert!(detect_falling_wedge(&bars, &pivots).is_some());

        let bars = flat_bars(18, 97.0); // no breakout
        assert!(detect_falling_wedge(&bars, &pivots).is_none());
    }
}
