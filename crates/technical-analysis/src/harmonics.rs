use signal_core::{Pivot, PivotKind};
use std::collections::BTreeMap;

// Fibonacci ratios used in harmonic patterns
pub const FIB_382: f64 = 0.382;
pub const FIB_500: f64 = 0.500;
pub const FIB_618: f64 = 0.618;
pub const FIB_786: f64 = 0.786;
pub const FIB_886: f64 = 0.886;
pub const FIB_127: f64 = 1.270;
pub const FIB_162: f64 = 1.618;

/// Precision gate: ±0.1% tolerance for ratio matching
pub const PRECISION_TOLERANCE: f64 = 0.001;

/// X-to-D spans beyond this classify as MACRO_HARMONIC
pub const MACRO_THRESHOLD_DAYS: i64 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarmonicKind {
    Abcd,
    Gartley,
    Bat,
    Butterfly,
    Crab,
    ElliottWave135,
}

impl HarmonicKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HarmonicKind::Abcd => "ABCD",
            HarmonicKind::Gartley => "GARTLEY",
            HarmonicKind::Bat => "BAT",
            HarmonicKind::Butterfly => "BUTTERFLY",
            HarmonicKind::Crab => "CRAB",
            HarmonicKind::ElliottWave135 => "ELLIOTT_WAVE_135",
        }
    }
}

/// A detected harmonic pattern with its validated Fibonacci ratios
#[derive(Debug, Clone)]
pub struct HarmonicPattern {
    pub kind: HarmonicKind,
    pub pivots: Vec<Pivot>,
    pub ratios: BTreeMap<String, f64>,
    pub is_macro: bool,
}

/// Scans recent pivots for harmonic patterns under strict Fibonacci gates.
/// Only the most recent 15 pivots are considered.
pub struct HarmonicAnalyzer {
    pivots: Vec<Pivot>,
}

impl HarmonicAnalyzer {
    pub fn new(pivots: &[Pivot]) -> Self {
        let start = pivots.len().saturating_sub(15);
        Self {
            pivots: pivots[start..].to_vec(),
        }
    }

    /// Ratio of the p2->p3 move relative to the p1->p2 move
    pub fn calculate_ratio(p1: &Pivot, p2: &Pivot, p3: &Pivot) -> f64 {
        let reference_move = (p2.price - p1.price).abs();
        if reference_move == 0.0 {
            return 0.0;
        }
        (p3.price - p2.price).abs() / reference_move
    }

    fn matches_ratio(actual: f64, target: f64) -> bool {
        let lower = target * (1.0 - PRECISION_TOLERANCE);
        let upper = target * (1.0 + PRECISION_TOLERANCE);
        (lower..=upper).contains(&actual)
    }

    fn matches_range(actual: f64, min_ratio: f64, max_ratio: f64) -> bool {
        let lower = min_ratio * (1.0 - PRECISION_TOLERANCE);
        let upper = max_ratio * (1.0 + PRECISION_TOLERANCE);
        (lower..=upper).contains(&actual)
    }

    fn span_days(start: &Pivot, end: &Pivot) -> i64 {
        (end.timestamp - start.timestamp).num_days()
    }

    /// ABCD measured move: |AB| ≈ |CD| and Δt(AB) ≈ Δt(CD), both at 1.000
    pub fn detect_abcd(&self) -> Option<HarmonicPattern> {
        if self.pivots.len() < 4 {
            return None;
        }

        for w in self.pivots.windows(4) {
            let (a, b, c, d) = (&w[0], &w[1], &w[2], &w[3]);

            let ab_move = (b.price - a.price).abs();
            let cd_move = (d.price - c.price).abs();
            let price_ratio = if ab_move > 0.0 { cd_move / ab_move } else { 0.0 };

            let ab_time = (b.index - a.index) as f64;
            let cd_time = (d.index - c.index) as f64;
            let time_ratio = if ab_time > 0.0 { cd_time / ab_time } else { 0.0 };

            if Self::matches_ratio(price_ratio, 1.0) && Self::matches_ratio(time_ratio, 1.0) {
                let mut ratios = BTreeMap::new();
                ratios.insert("AB_CD_price_ratio".to_string(), price_ratio);
                ratios.insert("AB_CD_time_ratio".to_string(), time_ratio);

                return Some(HarmonicPattern {
                    kind: HarmonicKind::Abcd,
                    pivots: w.to_vec(),
                    ratios,
                    is_macro: Self::span_days(a, d) > MACRO_THRESHOLD_DAYS,
                });
            }
        }

        None
    }

    fn detect_xabcd(
        &self,
        kind: HarmonicKind,
        b_check: impl Fn(f64) -> bool,
        d_target: f64,
    ) -> Option<HarmonicPattern> {
        if self.pivots.len() < 5 {
            return None;
        }

        for w in self.pivots.windows(5) {
            let (x, a, d) = (&w[0], &w[1], &w[4]);
            let b = &w[2];

            let b_ratio = Self::calculate_ratio(x, a, b);
            let d_ratio = Self::calculate_ratio(x, a, d);

            if b_check(b_ratio) && Self::matches_ratio(d_ratio, d_target) {
                let mut ratios = BTreeMap::new();
                ratios.insert("B_ratio".to_string(), b_ratio);
                ratios.insert("D_ratio".to_string(), d_ratio);

                return Some(HarmonicPattern {
                    kind,
                    pivots: w.to_vec(),
                    ratios,
                    is_macro: Self::span_days(x, d) > MACRO_THRESHOLD_DAYS,
                });
            }
        }

        None
    }

    /// Gartley: B at 0.618 of XA, D at 0.786 of XA
    pub fn detect_gartley(&self) -> Option<HarmonicPattern> {
        self.detect_xabcd(
            HarmonicKind::Gartley,
            |b| Self::matches_ratio(b, FIB_618),
            FIB_786,
        )
    }

    /// Bat: B in [0.382, 0.50] of XA, D at 0.886 of XA
    pub fn detect_bat(&self) -> Option<HarmonicPattern> {
        self.detect_xabcd(
            HarmonicKind::Bat,
            |b| Self::matches_range(b, FIB_382, FIB_500),
            FIB_886,
        )
    }

    /// Butterfly: B at 0.786 of XA, D at 1.27 of XA
    pub fn detect_butterfly(&self) -> Option<HarmonicPattern> {
        self.detect_xabcd(
            HarmonicKind::Butterfly,
            |b| Self::matches_ratio(b, FIB_786),
            FIB_127,
        )
    }

    /// Crab: B in [0.382, 0.618] of XA, D at 1.618 of XA
    pub fn detect_crab(&self) -> Option<HarmonicPattern> {
        self.detect_xabcd(
            HarmonicKind::Crab,
            |b| Self::matches_range(b, FIB_382, FIB_618),
            FIB_162,
        )
    }

    /// Elliott impulse (waves 1-3-5): alternating pivots, wave 3 longer than
    /// wave 1, wave 4 staying out of wave 1 price territory.
    pub fn detect_elliott_wave_135(&self) -> Option<HarmonicPattern> {
        if self.pivots.len() < 5 {
            return None;
        }

        for w in self.pivots.windows(5) {
            let alternating = w.windows(2).all(|p| p[0].kind != p[1].kind);
            if !alternating {
                continue;
            }

            let (p0, p1, p2, p3, p4) = (&w[0], &w[1], &w[2], &w[3], &w[4]);

            let (wave1_len, wave3_len) = match p0.kind {
                PivotKind::Valley => {
                    let wave1 = (p1.price - p0.price).abs();
                    let wave3 = (p3.price - p2.price).abs();
                    if wave3 <= wave1 || p4.price <= p1.price {
                        continue;
                    }
                    (wave1, wave3)
                }
                PivotKind::Peak => {
                    let wave1 = (p0.price - p1.price).abs();
                    let wave3 = (p2.price - p3.price).abs();
                    if wave3 <= wave1 || p4.price >= p1.price {
                        continue;
                    }
                    (wave1, wave3)
                }
            };

            let mut ratios = BTreeMap::new();
            ratios.insert(
                "wave3_to_wave1_ratio".to_string(),
                if wave1_len > 0.0 {
                    wave3_len / wave1_len
                } else {
                    0.0
                },
            );

            return Some(HarmonicPattern {
                kind: HarmonicKind::ElliottWave135,
                pivots: w.to_vec(),
                ratios,
                is_macro: Self::span_days(p0, p4) > MACRO_THRESHOLD_DAYS,
            });
        }

        None
    }

    pub fn scan_all_patterns(&self) -> Vec<HarmonicPattern> {
        [
            self.detect_abcd(),
            self.detect_gartley(),
            self.detect_bat(),
            self.detect_butterfly(),
            self.detect_crab(),
            self.detect_elliott_wave_135(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
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

    #[test]
    fn bat_detects_reference_ratios() {
        // XA = 50 -> 150; B retraces to 105 (0.45 of XA, inside [0.382, 0.50]);
        // D retraces to 61.4 (0.886 of XA)
        let pivots = vec![
            pivot(0, 50.0, PivotKind::Valley),
            pivot(10, 150.0, PivotKind::Peak),
            pivot(20, 105.0, PivotKind::Valley),
            pivot(30, 130.0, PivotKind::Peak),
            pivot(40, 61.4, PivotKind::Valley),
        ];

        let pattern = HarmonicAnalyzer::new(&pivots).detect_bat().expect("bat");
        assert!(!pattern.is_macro);
        assert!((pattern.ratios["B_ratio"] - 0.45).abs() < 1e-9);
        assert!((pattern.ratios["D_ratio"] - 0.886).abs() < 1e-9);
    }

    #[test]
    fn bat_rejects_d_outside_precision_gate() {
        // D at 0.89 of XA is 0.45% off the 0.886 target, beyond ±0.1%
        let pivots = vec![
            pivot(0, 50.0, PivotKind::Valley),
            pivot(10, 150.0, PivotKind::Peak),
            pivot(20, 105.0, PivotKind::Valley),
            pivot(30, 130.0, PivotKind::Peak),
            pivot(40, 61.0, PivotKind::Valley),
        ];
        assert!(HarmonicAnalyzer::new(&pivots).detect_bat().is_none());
    }

    #[test]
    fn gartley_requires_exact_b_and_d() {
        // XA = 100 -> 200; B at 0.618 -> 138.2; D at 0.786 -> 121.4
        let pivots = vec![
            pivot(0, 100.0, PivotKind::Valley),
            pivot(10, 200.0, PivotKind::Peak),
            pivot(20, 138.2, PivotKind::Valley),
            pivot(30, 170.0, PivotKind::Peak),
            pivot(40, 121.4, PivotKind::Valley),
        ];

        let pattern = HarmonicAnalyzer::new(&pivots)
            .detect_gartley()
            .expect("gartley");
        assert!((pattern.ratios["B_ratio"] - FIB_618).abs() < 0.001);
        assert!((pattern.ratios["D_ratio"] - FIB_786).abs() < 0.001);
    }

    #[test]
    fn abcd_requires_price_and_time_symmetry() {
        // AB = 100 -> 150 over 10 bars; CD = 120 -> 170 over 10 bars
        let pivots = vec![
            pivot(0, 100.0, PivotKind::Valley),
            pivot(10, 150.0, PivotKind::Peak),
            pivot(20, 120.0, PivotKind::Valley),
            pivot(30, 170.0, PivotKind::Peak),
        ];
        let pattern = HarmonicAnalyzer::new(&pivots).detect_abcd().expect("abcd");
        assert!((pattern.ratios["AB_CD_price_ratio"] - 1.0).abs() <= PRECISION_TOLERANCE);

        // Time asymmetry kills it
        let pivots = vec![
            pivot(0, 100.0, PivotKind::Valley),
            pivot(10, 150.0, PivotKind::Peak),
            pivot(20, 120.0, PivotKind::Valley),
            pivot(35, 170.0, PivotKind::Peak),
        ];
        assert!(HarmonicAnalyzer::new(&pivots).detect_abcd().is_none());
    }

    #[test]
    fn elliott_rejects_wave4_retracing_into_wave1() {
        // Bullish impulse but p4 dips below p1 (wave 1 peak)
        let pivots = vec![
            pivot(0, 100.0, PivotKind::Valley),
            pivot(10, 120.0, PivotKind::Peak),
            pivot(20, 110.0, PivotKind::Valley),
            pivot(30, 150.0, PivotKind::Peak),
            pivot(40, 118.0, PivotKind::Valley),
        ];
        assert!(HarmonicAnalyzer::new(&pivots)
            .detect_elliott_wave_135()
            .is_none());

        // Valid: wave 3 (110->150) longer than wave 1 (100->120), p4 above p1
        let pivots = vec![
            pivot(0, 100.0, PivotKind::Valley),
            pivot(10, 120.0, PivotKind::Peak),
            pivot(20, 110.0, PivotKind::Valley),
            pivot(30, 150.0, PivotKind::Peak),
            pivot(40, 125.0, PivotKind::Valley),
        ];
        let pattern = HarmonicAnalyzer::new(&pivots)
            .detect_elliott_wave_135()
            .expect("elliott");
        assert!(pattern.ratios["wave3_to_wave1_ratio"] > 1.0);
    }

    #[test]
    fn macro_flag_set_past_90_days() {
        let pivots = vec![
            pivot(0, 50.0, PivotKind::Valley),
            pivot(30, 150.0, PivotKind::Peak),
            pivot(60, 105.0, PivotKind::Valley),
            pivot(80, 130.0, PivotKind::Peak),
            pivot(100, 61.4, PivotKind::Valley),
        ];
        let pattern = HarmonicAnalyzer::new(&pivots).detect_bat().expect("bat");
        assert!(pattern.is_macro);
    }

    #[test]
    fn analyzer_keeps_only_recent_pivots() {
        let mut pivots: Vec<Pivot> = (0..30)
            .map(|i| {
                pivot(
                    i,
                    100.0 + i as f64,
                    if i % 2 == 0 {
                        PivotKind::Valley
                    } else {
                        PivotKind::Peak
                    },
                )
            })
            .collect();
        pivots.push(pivot(30, 1.0, PivotKind::Valley));

        let analyzer = HarmonicAnalyzer::new(&pivots);
        assert_eq!(analyzer.pivots.len(), 15);
    }
}
