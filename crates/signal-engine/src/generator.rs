use crate::parameters::SignalParameterFactory;
use chrono::{DateTime, Duration, Utc};
use signal_core::{AssetClass, Bar, Signal};
use technical_analysis::{BarAnalysis, PatternAnalyzer};

/// Priority order when several patterns fire on the same bar: continuation
/// beats reversal beats single-bar shapes.
const PATTERN_PRIORITY: &[(&str, fn(&BarAnalysis) -> bool)] = &[
    ("BULL_FLAG", |a| a.bull_flag),
    ("THREE_WHITE_SOLDIERS", |a| a.three_white_soldiers),
    ("BULLISH_MARUBOZU", |a| a.bullish_marubozu),
    ("MORNING_STAR", |a| a.morning_star),
    ("PIERCING_LINE", |a| a.piercing_line),
    ("BULLISH_ENGULFING", |a| a.bullish_engulfing),
    ("BULLISH_HAMMER", |a| a.bullish_hammer),
    ("INVERTED_HAMMER", |a| a.inverted_hammer),
    ("DOUBLE_BOTTOM", |a| a.double_bottom),
];

/// Highest-priority confluence-confirmed pattern on the analyzed bar
pub fn select_primary_pattern(analysis: &BarAnalysis) -> Option<&'static str> {
    PATTERN_PRIORITY
        .iter()
        .find(|(_, flag)| flag(analysis))
        .map(|(name, _)| *name)
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub ttl_days: i64,
    /// New signals for a symbol are suppressed this long after its most
    /// recent terminal exit.
    pub cooldown_hours: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            cooldown_hours: 24,
        }
    }
}

/// Orchestrates bars -> indicators -> patterns -> signal.
pub struct SignalGenerator {
    factory: SignalParameterFactory,
    cooldown: Duration,
}

impl SignalGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self {
            factory: SignalParameterFactory::new(config.ttl_days),
            cooldown: Duration::hours(config.cooldown_hours),
        }
    }

    /// Generate a signal for the latest bar if a pattern confluences.
    ///
    /// `most_recent_exit` is the timestamp of the symbol's last terminal
    /// signal; generation is suppressed inside the cooldown window so a
    /// fresh setup isn't taken straight after an exit.
    pub fn generate_signal(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        bars: &[Bar],
        most_recent_exit: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Option<Signal> {
        if bars.is_empty() {
            return None;
        }

        if let Some(exit_ts) = most_recent_exit {
            if now - exit_ts < self.cooldown {
                tracing::debug!(
                    "Cooldown active for {} (last exit {})",
                    symbol,
                    exit_ts.to_rfc3339()
                );
                return None;
            }
        }

        let analyzer = PatternAnalyzer::new(bars);
        let analysis = analyzer.analyze_latest()?;

        let pattern_name = select_primary_pattern(&analysis)?;

        // Harmonics confirm rather than replace the primary pattern
        let harmonics = analyzer.scan_harmonics();
        let harmonic = harmonics.first();

        let signal = self.factory.build(
            symbol,
            asset_class,
            pattern_name,
            &analysis,
            &analyzer.pivots,
            harmonic,
            now,
        );

        tracing::info!(
            symbol = symbol,
            pattern = pattern_name,
            signal_id = %signal.signal_id,
            stop_loss = signal.suggested_stop,
            "Signal found"
        );

        Some(signal)
    }
}
