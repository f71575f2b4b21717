use crate::harmonics::{HarmonicAnalyzer, HarmonicPattern};
use crate::indicators::IndicatorFrame;
use crate::patterns::{self, CandleColumns};
use crate::pivots::find_pivots;
use crate::structural::{PatternMeta, StructuralSet};
use chrono::{DateTime, Utc};
use signal_core::{Bar, Pivot};
use std::collections::BTreeMap;

/// 5% threshold for ZigZag pivot detection
pub const PIVOT_PCT_THRESHOLD: f64 = 0.05;
/// Volume expansion factor over the 20-bar volume SMA
pub const VOLUME_FACTOR: f64 = 1.5;
/// MFI oversold level for next-bar inverted-hammer confirmation
pub const MFI_OVERSOLD: f64 = 20.0;

/// Fully-gated pattern and context readings for the latest completed bar.
///
/// Pattern flags are true only when the raw shape AND its confluence context
/// both hold. Context flags fall back to "bypassed" when the underlying
/// indicator column is missing.
#[derive(Debug, Clone, Default)]
pub struct BarAnalysis {
    pub timestamp: Option<DateTime<Utc>>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,

    pub ema_50: Option<f64>,
    pub rsi_14: Option<f64>,
    pub atr_14: Option<f64>,
    pub adx_14: Option<f64>,
    pub adx_prev: Option<f64>,
    pub chandelier_exit_long: Option<f64>,

    pub trend_bullish: bool,
    pub rsi_bullish_divergence: bool,
    pub volatility_contraction: bool,
    pub volume_expansion: bool,

    pub bullish_hammer: bool,
    pub bullish_engulfing: bool,
    pub bearish_engulfing: bool,
    pub morning_star: bool,
    pub morning_star_strength: f64,
    pub is_abandoned_baby: bool,
    pub piercing_line: bool,
    pub inverted_hammer: bool,
    pub bullish_marubozu: bool,
    pub three_white_soldiers: bool,
    pub dragonfly_doji: bool,
    pub bullish_belt_hold: bool,
    pub bullish_harami: bool,
    pub bullish_kicker: bool,
    pub is_true_gap_kicker: bool,
    pub three_inside_up: bool,
    pub rising_three_methods: bool,
    pub tweezer_bottoms: bool,

    pub bull_flag: bool,
    pub double_bottom: bool,
    pub ascending_triangle: bool,
    pub cup_and_handle: bool,
    pub falling_wedge: bool,
    pub inverse_head_shoulders: bool,

    pub bull_flag_meta: Option<PatternMeta>,
    pub double_bottom_meta: Option<PatternMeta>,
    pub asc_triangle_meta: Option<PatternMeta>,
    pub cup_handle_meta: Option<PatternMeta>,
    pub falling_wedge_meta: Option<PatternMeta>,
    pub inv_hs_meta: Option<PatternMeta>,
}

impl BarAnalysis {
    /// Named numeric readings captured at emission time
    pub fn confluence_snapshot(&self) -> BTreeMap<String, f64> {
        let mut snapshot = BTreeMap::new();
        snapshot.insert("close".to_string(), self.close);
        snapshot.insert("volume".to_string(), self.volume);
        if let Some(v) = self.ema_50 {
            snapshot.insert("ema_50".to_string(), v);
        }
        if let Some(v) = self.rsi_14 {
            snapshot.insert("rsi_14".to_string(), v);
        }
        if let Some(v) = self.atr_14 {
            snapshot.insert("atr_14".to_string(), v);
        }
        if let Some(v) = self.adx_14 {
            snapshot.insert("adx_14".to_string(), v);
        }
        if let Some(v) = self.chandelier_exit_long {
            snapshot.insert("chandelier_exit_long".to_string(), v);
        }
        snapshot
    }

    /// Confluence whitelist booleans that currently hold
    pub fn active_confluence_factors(&self) -> Vec<String> {
        let mut factors = Vec::new();
        for (name, active) in [
            ("rsi_bullish_divergence", self.rsi_bullish_divergence),
            ("volatility_contraction", self.volatility_contraction),
            ("volume_expansion", self.volume_expansion),
            ("trend_bullish", self.trend_bullish),
        ] {
            if active {
                factors.push(name.to_string());
            }
        }
        factors
    }
}

/// Engine for detecting technical patterns with confluence confirmation.
///
/// Structural pivot detection drives geometric pattern recognition, so
/// formations are recognised regardless of their length in bars.
pub struct PatternAnalyzer {
    bars: Vec<Bar>,
    pub frame: IndicatorFrame,
    pub pivots: Vec<Pivot>,
}

impl PatternAnalyzer {
    pub fn new(bars: &[Bar]) -> Self {
        Self::with_threshold(bars, PIVOT_PCT_THRESHOLD)
    }

    pub fn with_threshold(bars: &[Bar], pct_threshold: f64) -> Self {
        let frame = IndicatorFrame::compute(bars);
        let pivots = find_pivots(bars, pct_threshold);
        Self {
            bars: bars.to_vec(),
            frame,
            pivots,
        }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Harmonic scan over the recent pivots
    pub fn scan_harmonics(&self) -> Vec<HarmonicPattern> {
        HarmonicAnalyzer::new(&self.pivots).scan_all_patterns()
    }

    fn opt(col: &[Option<f64>], i: usize) -> Option<f64> {
        col.get(i).copied().flatten()
    }

    /// Trend filter: close above the 50-bar EMA. False when EMA missing.
    fn trend_bullish_at(&self, i: usize) -> bool {
        match Self::opt(&self.frame.ema_50, i) {
            Some(ema) => self.bars[i].close > ema,
            None => false,
        }
    }

    /// Bullish RSI divergence: today's low is the 14-bar low but RSI is not
    fn rsi_divergence_at(&self, i: usize) -> bool {
        const WINDOW: usize = 14;
        if i + 1 < WINDOW {
            return false;
        }

        let start = i + 1 - WINDOW;
        let low_min = self.bars[start..=i]
            .iter()
            .map(|b| b.low)
            .fold(f64::INFINITY, f64::min);
        let is_new_low = self.bars[i].low <= low_min + low_min * 0.001;

        let Some(rsi_now) = Self::opt(&self.frame.rsi_14, i) else {
            return false;
        };
        let rsi_min = (start..=i)
            .filter_map(|k| Self::opt(&self.frame.rsi_14, k))
            .fold(f64::INFINITY, f64::min);
        if !rsi_min.is_finite() {
            return false;
        }

        is_new_low && rsi_now > rsi_min + 1.0
    }

    /// ATR below its own 20-bar SMA. Bypassed (true) when data missing.
    fn volatility_contraction_at(&self, i: usize) -> bool {
        match (
            Self::opt(&self.frame.atr_14, i),
            Self::opt(&self.frame.atr_sma_20, i),
        ) {
            (Some(atr), Some(atr_sma)) => atr < atr_sma,
            _ => true,
        }
    }

    /// Volume above 1.5x its 20-bar SMA. Bypassed (true) when data missing.
    fn volume_expansion_at(&self, i: usize) -> bool {
        match Self::opt(&self.frame.vol_sma_20, i) {
            Some(vol_sma) => self.bars[i].volume > VOLUME_FACTOR * vol_sma,
            None => true,
        }
    }

    /// Analyze the latest completed bar, applying per-pattern confluence.
    pub fn analyze_latest(&self) -> Option<BarAnalysis> {
        if self.bars.is_empty() {
            return None;
        }
        let i = self.bars.len() - 1;
        let bar = &self.bars[i];
        let cols = CandleColumns::compute(&self.bars);

        let trend_bullish = self.trend_bullish_at(i);
        let rsi_bullish_divergence = self.rsi_divergence_at(i);
        let volatility_contraction = self.volatility_contraction_at(i);
        let volume_expansion = self.volume_expansion_at(i);

        // Reversal patterns waive the EMA(50) trend gate when RSI diverges
        let reversal_context = trend_bullish || rsi_bullish_divergence;

        let hammer = patterns::hammer_shape(&cols);
        let engulfing = patterns::bullish_engulfing_shape(&self.bars, &cols);
        let bearish_engulfing = patterns::bearish_engulfing_shape(&self.bars, &cols);
        let morning_star = patterns::morning_star_shape(
            &self.bars,
            &cols,
            &self.frame.atr_14,
            &self.frame.rsi_14,
        );
        let piercing = patterns::piercing_line_shape(&self.bars, &cols);
        let inv_hammer = patterns::inverted_hammer_shape(&cols);
        let marubozu = patterns::marubozu_shape(&cols, &self.frame.atr_14);
        let soldiers = patterns::three_white_soldiers_shape(&self.bars, &cols);
        let dragonfly = patterns::dragonfly_doji_shape(&cols);
        let belt_hold = patterns::belt_hold_shape(&self.bars, &cols);
        let harami = patterns::harami_shape(&self.bars, &cols);
        let kicker = patterns::kicker_shape(&self.bars, &cols, &self.frame.atr_14);
        let three_inside = patterns::three_inside_up_shape(&self.bars, &cols);
        let rising_three = patterns::rising_three_methods_shape(&self.bars, &cols);
        let tweezer = patterns::tweezer_bottoms_shape(&self.bars, &cols);

        let structural = StructuralSet::detect(&self.bars, &self.pivots);

        // Bollinger interaction: low tags the band, close snaps back above it
        let bb_interaction = match Self::opt(&self.frame.bb_lower, i) {
            Some(bbl) => bar.low <= bbl && bar.close > bbl,
            None => false,
        };
        let at_bb_lower = match Self::opt(&self.frame.bb_lower, i) {
            Some(bbl) => bar.low <= bbl,
            None => true,
        };

        // Keltner breakout for the marubozu gate
        let keltner_breakout = match Self::opt(&self.frame.keltner_upper, i) {
            Some(upper) => bar.close > upper,
            None => false,
        };

        // Inverted hammer confirms on the NEXT bar: shape and MFI<20 at t-1,
        // today's close above the hammer body high
        let inverted_hammer_confirmed = i >= 1 && {
            let shape_prev = inv_hammer[i - 1];
            let mfi_prev = Self::opt(&self.frame.mfi_14, i - 1)
                .map(|m| m < MFI_OVERSOLD)
                .unwrap_or(false);
            let body_high_prev = self.bars[i - 1].open.max(self.bars[i - 1].close);
            shape_prev && mfi_prev && bar.close > body_high_prev
        };

        // Volume step function across three bars
        let vol_step_up = i >= 2
            && bar.volume > self.bars[i - 1].volume
            && self.bars[i - 1].volume > self.bars[i - 2].volume;

        // Aggregate three-bar body dominance over ATR
        let has_dominant_range = match Self::opt(&self.frame.atr_14, i) {
            Some(atr) if i >= 2 => {
                cols.body[i] + cols.body[i - 1] + cols.body[i - 2] > 2.0 * atr
            }
            _ => true,
        };

        // MFI context for harami
        let mfi_under_30 = Self::opt(&self.frame.mfi_14, i)
            .map(|m| m < 30.0)
            .unwrap_or(true);

        // Extreme volume for kicker (2x yesterday)
        let vol_extreme = i >= 1 && bar.volume > self.bars[i - 1].volume * 2.0;

        // Tweezer context: oversold RSI and price below the short EMA
        let tweezer_context = {
            let rsi_oversold = Self::opt(&self.frame.rsi_14, i)
                .map(|r| r < 35.0)
                .unwrap_or(false);
            let below_ema = match Self::opt(&self.frame.ema_20, i)
                .or_else(|| Self::opt(&self.frame.ema_50, i))
            {
                Some(ema) => bar.close < ema,
                None => true,
            };
            rsi_oversold && below_ema
        };

        Some(BarAnalysis {
            timestamp: Some(bar.timestamp),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,

            ema_50: Self::opt(&self.frame.ema_50, i),
            rsi_14: Self::opt(&self.frame.rsi_14, i),
            atr_14: Self::opt(&self.frame.atr_14, i),
            adx_14: Self::opt(&self.frame.adx_14, i),
            adx_prev: if i >= 1 {
                Self::opt(&self.frame.adx_14, i - 1)
            } else {
                None
            },
            chandelier_exit_long: Self::opt(&self.frame.chandelier_exit_long, i),

            trend_bullish,
            rsi_bullish_divergence,
            volatility_contraction,
            volume_expansion,

            bullish_hammer: hammer[i]
                && reversal_context
                && volume_expansion
                && volatility_contraction,
            bullish_engulfing: engulfing[i]
                && reversal_context
                && volume_expansion
                && volatility_contraction,
            bearish_engulfing: bearish_engulfing[i],
            // Morning star strictly requires the RSI divergence
            morning_star: morning_star.morning_star[i]
                && rsi_bullish_divergence
                && volume_expansion
                && volatility_contraction,
            morning_star_strength: morning_star.strength[i],
            is_abandoned_baby: morning_star.abandoned_baby[i],
            piercing_line: piercing[i]
                && bb_interaction
                && volume_expansion
                && volatility_contraction,
            inverted_hammer: inverted_hammer_confirmed
                && volume_expansion
                && volatility_contraction,
            bullish_marubozu: marubozu[i]
                && trend_bullish
                && volume_expansion
                && keltner_breakout
                && volatility_contraction,
            three_white_soldiers: soldiers[i]
                && trend_bullish
                && vol_step_up
                && has_dominant_range
                && volume_expansion
                && volatility_contraction,
            dragonfly_doji: dragonfly[i] && reversal_context && volume_expansion && at_bb_lower,
            bullish_belt_hold: belt_hold[i] && reversal_context && volume_expansion,
            bullish_harami: harami[i] && reversal_context && mfi_under_30,
            bullish_kicker: kicker.kicker[i] && vol_extreme,
            is_true_gap_kicker: kicker.true_gap[i],
            three_inside_up: three_inside[i] && reversal_context && vol_step_up,
            rising_three_methods: rising_three[i] && trend_bullish && volume_expansion,
            tweezer_bottoms: tweezer[i]
                && (reversal_context || tweezer_context)
                && volume_expansion,

            bull_flag: structural.bull_flag.is_some()
                && trend_bullish
                && volume_expansion
                && volatility_contraction,
            double_bottom: structural.double_bottom.is_some()
                && reversal_context
                && volume_expansion
                && volatility_contraction,
            ascending_triangle: structural.ascending_triangle.is_some()
                && trend_bullish
                && volume_expansion
                && volatility_contraction,
            cup_and_handle: structural.cup_and_handle.is_some()
                && trend_bullish
                && volume_expansion
                && volatility_contraction,
            falling_wedge: structural.falling_wedge.is_some()
                && volume_expansion
                && volatility_contraction,
            inverse_head_shoulders: structural.inverse_head_shoulders.is_some()
                && volume_expansion,

            bull_flag_meta: structural.bull_flag,
            double_bottom_meta: structural.double_bottom,
            asc_triangle_meta: structural.ascending_triangle,
            cup_handle_meta: structural.cup_and_handle,
            falling_wedge_meta: structural.falling_wedge,
            inv_hs_meta: structural.inverse_head_shoulders,
        })
    }
}
