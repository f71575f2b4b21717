use chrono::{DateTime, Duration, Utc};
use signal_core::{
    deterministic_signal_id, AssetClass, OrderSide, PatternClassification, Pivot, PivotSnapshot,
    Signal, SignalStatus,
};
use technical_analysis::{BarAnalysis, HarmonicPattern, PatternMeta};

/// Strategy id used for harmonic-confluence signals
pub const HARMONIC_STRATEGY_ID: &str = "strategies/S002-HARMONIC-PATTERN";

/// Factory for calculating signal parameters.
pub struct SignalParameterFactory {
    /// delete_at horizon
    pub ttl_days: i64,
}

impl SignalParameterFactory {
    // Safe hydration constants for shadow validation. 1e-8 accommodates
    // micro-cap tokens while staying strictly positive. Never fed to live
    // orders.
    pub const SAFE_STOP_VAL: f64 = 0.00000001;
    pub const SAFE_TP1_VAL: f64 = 0.00000001;
    pub const SAFE_TP2_VAL: f64 = 0.00000002;
    pub const SAFE_TP3_VAL: f64 = 0.00000003;

    pub fn new(ttl_days: i64) -> Self {
        Self { ttl_days }
    }

    fn structural_meta<'a>(analysis: &'a BarAnalysis, pattern_name: &str) -> Option<&'a PatternMeta> {
        match pattern_name {
            "DOUBLE_BOTTOM" => analysis.double_bottom_meta.as_ref(),
            "INVERSE_HEAD_SHOULDERS" => analysis.inv_hs_meta.as_ref(),
            "BULL_FLAG" => analysis.bull_flag_meta.as_ref(),
            "CUP_AND_HANDLE" => analysis.cup_handle_meta.as_ref(),
            "FALLING_WEDGE" => analysis.falling_wedge_meta.as_ref(),
            "ASCENDING_TRIANGLE" => analysis.asc_triangle_meta.as_ref(),
            _ => None,
        }
    }

    /// Build a fully-populated signal for a detected pattern on the latest
    /// bar. Entry is always the close of the signal candle.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        pattern_name: &str,
        analysis: &BarAnalysis,
        pivots: &[Pivot],
        harmonic: Option<&HarmonicPattern>,
        now: DateTime<Utc>,
    ) -> Signal {
        let close = analysis.close;
        let low = analysis.low;
        let open = analysis.open;
        let high = analysis.high;
        let atr = analysis.atr_14.unwrap_or(0.0);
        let entry = close;

        let mut suggested_stop = low * 0.99;
        let mut invalidation_price = None;
        let mut take_profit_1 = None;
        let mut take_profit_2 = None;
        let mut take_profit_3 = None;

        match pattern_name {
            "BULLISH_HAMMER" | "MORNING_STAR" => {
                invalidation_price = Some(low);
                suggested_stop = (low * 0.99).max(Self::SAFE_STOP_VAL);
            }
            "BULLISH_ENGULFING" => {
                invalidation_price = Some(open);
                suggested_stop = open * 0.99;
            }
            "BULLISH_MARUBOZU" => {
                let midpoint = (open + close) / 2.0;
                invalidation_price = Some(midpoint);
                suggested_stop = midpoint * 0.99;
            }
            "BULL_FLAG" => {
                let flagpole_height = if atr > 0.0 {
                    (atr * 3.0).max(high - low)
                } else {
                    high - low
                };
                take_profit_1 = Some(close + 0.5 * flagpole_height);
                take_profit_2 = Some(close + 1.0 * flagpole_height);
                take_profit_3 = Some(close + 1.5 * flagpole_height);
                invalidation_price = Some(low);
                suggested_stop = low * 0.99;
            }
            name if name.contains("ELLIOTT") => {
                // Micro-cap safeguard: a wide ATR stop must never go <= 0
                suggested_stop = if atr > 0.0 {
                    (low - 0.5 * atr).max(Self::SAFE_STOP_VAL)
                } else {
                    low * 0.99
                };
                invalidation_price = Some(low);
            }
            _ => {}
        }

        // ATR-based take profits unless the pattern already set them
        if take_profit_1.is_none() {
            take_profit_1 = Some(if atr > 0.0 { entry + 2.0 * atr } else { entry * 1.03 });
        }
        if take_profit_2.is_none() {
            take_profit_2 = Some(if atr > 0.0 { entry + 4.0 * atr } else { entry * 1.06 });
        }
        if take_profit_3.is_none() {
            take_profit_3 = Some(if atr > 0.0 { entry + 6.0 * atr } else { entry * 1.10 });
        }

        // Structural metadata from the matching detector
        let meta = Self::structural_meta(analysis, pattern_name);
        let mut pattern_duration_days = meta.map(|m| m.duration_days);
        let mut pattern_classification = meta.map(|m| m.classification);

        // Anchors: last up to five pivots ordered by index
        let start = pivots.len().saturating_sub(5);
        let mut recent: Vec<&Pivot> = pivots[start..].iter().collect();
        recent.sort_by_key(|p| p.index);
        let structural_anchors: Vec<PivotSnapshot> =
            recent.iter().map(|p| PivotSnapshot::from(*p)).collect();

        let pattern_span_days = if structural_anchors.len() >= 2 {
            let min = structural_anchors.iter().map(|a| a.index).min().unwrap_or(0);
            let max = structural_anchors.iter().map(|a| a.index).max().unwrap_or(0);
            Some(max - min)
        } else {
            None
        };

        if let Some(span) = pattern_span_days {
            pattern_classification = Some(if span > 90 {
                PatternClassification::MacroPattern
            } else {
                PatternClassification::StandardPattern
            });
            if pattern_duration_days.is_none() {
                pattern_duration_days = Some(span);
            }
        }

        // Confluence factors: whitelisted true booleans plus the harmonic
        // pattern name when one confirms the setup
        let mut confluence_factors = analysis.active_confluence_factors();

        let mut strategy_id = pattern_name.to_string();
        let mut harmonic_metadata = None;
        if let Some(h) = harmonic {
            strategy_id = HARMONIC_STRATEGY_ID.to_string();
            pattern_classification = Some(if h.is_macro {
                PatternClassification::MacroHarmonic
            } else {
                PatternClassification::HarmonicPattern
            });
            harmonic_metadata = Some(h.ratios.clone());
            confluence_factors.push(h.kind.as_str().to_string());
        }

        let candle_ts = analysis.timestamp.unwrap_or(now);
        let ds = candle_ts.date_naive();

        let valid_hours = if pattern_classification.map(|c| c.is_macro()).unwrap_or(false) {
            120
        } else {
            48
        };

        let signal_id = deterministic_signal_id(ds, &strategy_id, symbol, pattern_name, candle_ts);

        Signal {
            signal_id,
            strategy_id,
            symbol: symbol.to_string(),
            ds,
            asset_class,
            side: OrderSide::Buy,
            pattern_name: pattern_name.to_string(),
            status: SignalStatus::Waiting,
            entry_price: entry,
            suggested_stop,
            invalidation_price,
            take_profit_1,
            take_profit_2,
            take_profit_3,
            pattern_duration_days,
            pattern_span_days,
            pattern_classification,
            structural_anchors,
            harmonic_metadata,
            confluence_factors,
            confluence_snapshot: analysis.confluence_snapshot(),
            exit_reason: None,
            created_at: now,
            valid_until: candle_ts + Duration::hours(valid_hours),
            delete_at: Some(now + Duration::days(self.ttl_days)),
            discord_thread_id: None,
            tp3_last_notified: None,
        }
    }

    /// Replace non-positive stop/TP levels with strictly positive sentinels.
    /// Exists solely so rejected shadow signals pass schema validation; the
    /// executor never sees hydrated values.
    pub fn hydrate_safe_values(&self, signal: &Signal) -> Signal {
        let mut safe = signal.clone();
        if safe.suggested_stop <= 0.0 {
            safe.suggested_stop = Self::SAFE_STOP_VAL;
        }
        if safe.take_profit_1.unwrap_or(0.0) <= 0.0 {
            safe.take_profit_1 = Some(Self::SAFE_TP1_VAL);
        }
        if safe.take_profit_2.unwrap_or(0.0) <= 0.0 {
            safe.take_profit_2 = Some(Self::SAFE_TP2_VAL);
        }
        if safe.take_profit_3.unwrap_or(0.0) <= 0.0 {
            safe.take_profit_3 = Some(Self::SAFE_TP3_VAL);
        }
        safe
    }
}
