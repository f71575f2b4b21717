use chrono::{Duration, NaiveDate};
use signal_core::{ExitReason, LifecycleEvent, LifecycleUpdate, OrderSide, Signal, SignalStatus};
use technical_analysis::BarAnalysis;

const RSI_OVERBOUGHT: f64 = 80.0;
const RSI_OVERSOLD: f64 = 20.0;
const ADX_PEAK_LEVEL: f64 = 50.0;

/// Advance active signals against the latest analyzed bar.
///
/// Evaluation order per signal: invalidation, then the take-profit ladder,
/// then a trailing update, then expiration. At most one event is emitted per
/// signal per tick, and a WAITING signal can never reach TP3 directly; the
/// chandelier runner exit only applies after at least TP1.
pub fn check_exits(
    active_signals: &[Signal],
    analysis: &BarAnalysis,
    today: NaiveDate,
) -> Vec<LifecycleUpdate> {
    let mut updates = Vec::new();

    for signal in active_signals {
        if !signal.status.is_active() {
            continue;
        }

        if let Some(update) = advance_signal(signal, analysis, today) {
            updates.push(update);
        }
    }

    updates
}

fn advance_signal(
    signal: &Signal,
    analysis: &BarAnalysis,
    today: NaiveDate,
) -> Option<LifecycleUpdate> {
    // 1. Invalidation takes precedence over everything else
    if let Some(reason) = invalidation_reason(signal, analysis) {
        let mut updated = signal.clone();
        updated.status = SignalStatus::Invalidated;
        updated.exit_reason = Some(reason);
        return Some(LifecycleUpdate {
            signal: updated,
            event: LifecycleEvent::StatusChanged,
        });
    }

    // 2. Take-profit ladder, one level per tick
    let is_long = signal.side == OrderSide::Buy;
    let tp_reached = |level: Option<f64>| -> bool {
        match level {
            Some(tp) if is_long => analysis.high >= tp,
            Some(tp) => analysis.low <= tp,
            None => false,
        }
    };
    let chandelier_crossed = match analysis.chandelier_exit_long {
        Some(chandelier) if is_long => analysis.close <= chandelier,
        Some(chandelier) => analysis.close >= chandelier,
        None => false,
    };

    match signal.status {
        SignalStatus::Waiting => {
            if tp_reached(signal.take_profit_1) {
                let mut updated = signal.clone();
                updated.status = SignalStatus::Tp1Hit;
                updated.exit_reason = Some(ExitReason::Tp1);
                // Protect the remainder at breakeven
                updated.suggested_stop = signal.entry_price;
                return Some(LifecycleUpdate {
                    signal: updated,
                    event: LifecycleEvent::StatusChanged,
                });
            }
            // The runner exit never applies from WAITING, even when the
            // close already sits past the chandelier value.
        }
        SignalStatus::Tp1Hit => {
            if tp_reached(signal.take_profit_2) {
                let mut updated = signal.clone();
                updated.status = SignalStatus::Tp2Hit;
                updated.exit_reason = Some(ExitReason::Tp2);
                return Some(LifecycleUpdate {
                    signal: updated,
                    event: LifecycleEvent::StatusChanged,
                });
            }
            if chandelier_crossed {
                let mut updated = signal.clone();
                updated.status = SignalStatus::Tp3Hit;
                updated.exit_reason = Some(ExitReason::TpHit);
                return Some(LifecycleUpdate {
                    signal: updated,
                    event: LifecycleEvent::StatusChanged,
                });
            }
        }
        SignalStatus::Tp2Hit => {
            if chandelier_crossed {
                let mut updated = signal.clone();
                updated.status = SignalStatus::Tp3Hit;
                updated.exit_reason = Some(ExitReason::TpHit);
                return Some(LifecycleUpdate {
                    signal: updated,
                    event: LifecycleEvent::StatusChanged,
                });
            }
        }
        _ => return None,
    }

    // 3. Trailing update while the runner is live: ratchet TP3 to the
    // chandelier when it has moved favorably past it. No status change.
    if matches!(signal.status, SignalStatus::Tp1Hit | SignalStatus::Tp2Hit) {
        if let (Some(chandelier), Some(tp3)) = (analysis.chandelier_exit_long, signal.take_profit_3)
        {
            let favorable = if is_long {
                chandelier > tp3
            } else {
                chandelier < tp3
            };
            if favorable {
                let mut updated = signal.clone();
                updated.take_profit_3 = Some(chandelier);
                return Some(LifecycleUpdate {
                    signal: updated,
                    event: LifecycleEvent::TrailUpdated { previous_tp3: tp3 },
                });
            }
        }
    }

    // 4. Expiration: only WAITING signals age out
    if signal.status == SignalStatus::Waiting {
        let cutoff = signal.ds + Duration::days(1);
        if today > cutoff {
            let mut updated = signal.clone();
            updated.status = SignalStatus::Expired;
            updated.exit_reason = Some(ExitReason::Expired);
            return Some(LifecycleUpdate {
                signal: updated,
                event: LifecycleEvent::StatusChanged,
            });
        }
    }

    None
}

fn invalidation_reason(signal: &Signal, analysis: &BarAnalysis) -> Option<ExitReason> {
    let is_long = signal.side == OrderSide::Buy;

    // Structural: close through the invalidation level
    if let Some(invalidation) = signal.invalidation_price {
        let breached = if is_long {
            analysis.close < invalidation
        } else {
            analysis.close > invalidation
        };
        if breached {
            return Some(ExitReason::StructuralInvalidation);
        }
    }

    // Color flip against the position
    let color_flip = if is_long {
        analysis.bearish_engulfing
    } else {
        analysis.bullish_engulfing
    };
    if color_flip {
        return Some(ExitReason::BearishEngulfing);
    }

    // Momentum exhaustion
    if let Some(rsi) = analysis.rsi_14 {
        let exhausted = if is_long {
            rsi > RSI_OVERBOUGHT
        } else {
            rsi < RSI_OVERSOLD
        };
        if exhausted {
            return Some(ExitReason::RsiOverbought);
        }
    }

    // Trend-strength peak: ADX above 50 and turning down (one-bar rule)
    if let (Some(adx), Some(adx_prev)) = (analysis.adx_14, analysis.adx_prev) {
        if adx > ADX_PEAK_LEVEL && adx < adx_prev {
            return Some(ExitReason::AdxPeak);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use signal_core::AssetClass;

    fn waiting_signal() -> Signal {
        Signal {
            signal_id: "sig-1".into(),
            strategy_id: "BULLISH_ENGULFING".into(),
            symbol: "BTC/USD".into(),
            ds: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            asset_class: AssetClass::Crypto,
            side: OrderSide::Buy,
            pattern_name: "BULLISH_ENGULFING".into(),
            status: SignalStatus::Waiting,
            entry_price: 100.0,
            suggested_stop: 95.0,
            invalidation_price: Some(96.0),
            take_profit_1: Some(150.0),
            take_profit_2: Some(200.0),
            take_profit_3: Some(108.0),
            pattern_duration_days: None,
            pattern_span_days: None,
            pattern_classification: None,
            structural_anchors: vec![],
            harmonic_metadata: None,
            confluence_factors: vec![],
            confluence_snapshot: Default::default(),
            exit_reason: None,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            valid_until: Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap(),
            delete_at: None,
            discord_thread_id: None,
            tp3_last_notified: None,
        }
    }

    fn analysis(high: f64, low: f64, close: f64) -> BarAnalysis {
        BarAnalysis {
            high,
            low,
            close,
            open: close,
            ..Default::default()
        }
    }

    #[test]
    fn waiting_never_jumps_to_tp3() {
        // Close sits below the chandelier but TP1 was never reached
        let signal = waiting_signal();
        let mut bar = analysis(110.0, 105.0, 108.0);
        bar.chandelier_exit_long = Some(112.0);

        let updates = check_exits(&[signal.clone()], &bar, signal.ds);
        assert!(updates.is_empty());
    }

    #[test]
    fn tp1_advances_and_moves_stop_to_breakeven() {
        let signal = waiting_signal();
        let bar = analysis(151.0, 140.0, 149.0);

        let updates = check_exits(&[signal.clone()], &bar, signal.ds);
        assert_eq!(updates.len(), 1);
        let updated = &updates[0].signal;
        assert_eq!(updated.status, SignalStatus::Tp1Hit);
        assert_eq!(updated.exit_reason, Some(ExitReason::Tp1));
        assert_eq!(updated.suggested_stop, 100.0);
        assert_eq!(updates[0].event, LifecycleEvent::StatusChanged);
    }

    #[test]
    fn tp2_beats_runner_exit_when_both_trigger() {
        let mut signal = waiting_signal();
        signal.status = SignalStatus::Tp1Hit;
        let mut bar = analysis(201.0, 150.0, 155.0);
        bar.chandelier_exit_long = Some(160.0); // close below chandelier too

        let updates = check_exits(&[signal], &bar, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert_eq!(updates[0].signal.status, SignalStatus::Tp2Hit);
    }

    #[test]
    fn runner_exits_through_chandelier_after_tp1() {
        let mut signal = waiting_signal();
        signal.status = SignalStatus::Tp1Hit;
        let mut bar = analysis(160.0, 150.0, 155.0);
        bar.chandelier_exit_long = Some(158.0);

        let updates = check_exits(&[signal], &bar, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert_eq!(updates[0].signal.status, SignalStatus::Tp3Hit);
        assert_eq!(updates[0].signal.exit_reason, Some(ExitReason::TpHit));
    }

    #[test]
    fn structural_invalidation_takes_precedence() {
        let mut signal = waiting_signal();
        signal.status = SignalStatus::Tp1Hit;
        // Close below invalidation AND past TP2: invalidation wins
        let mut bar = analysis(210.0, 90.0, 95.0);
        bar.chandelier_exit_long = Some(90.0);

        let updates = check_exits(&[signal], &bar, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert_eq!(updates[0].signal.status, SignalStatus::Invalidated);
        assert_eq!(
            updates[0].signal.exit_reason,
            Some(ExitReason::StructuralInvalidation)
        );
    }

    #[test]
    fn bearish_engulfing_invalidates_longs() {
        let signal = waiting_signal();
        let mut bar = analysis(110.0, 97.0, 100.0);
        bar.bearish_engulfing = true;

        let updates = check_exits(&[signal.clone()], &bar, signal.ds);
        assert_eq!(updates[0].signal.exit_reason, Some(ExitReason::BearishEngulfing));
    }

    #[test]
    fn rsi_and_adx_exhaustion_invalidate() {
        let signal = waiting_signal();
        let mut bar = analysis(110.0, 97.0, 100.0);
        bar.rsi_14 = Some(85.0);
        let updates = check_exits(&[signal.clone()], &bar, signal.ds);
        assert_eq!(updates[0].signal.exit_reason, Some(ExitReason::RsiOverbought));

        let mut bar = analysis(110.0, 97.0, 100.0);
        bar.adx_14 = Some(55.0);
        bar.adx_prev = Some(60.0);
        let updates = check_exits(&[signal.clone()], &bar, signal.ds);
        assert_eq!(updates[0].signal.exit_reason, Some(ExitReason::AdxPeak));

        // ADX above 50 but still rising is not a peak
        let mut bar = analysis(110.0, 97.0, 100.0);
        bar.adx_14 = Some(55.0);
        bar.adx_prev = Some(50.0);
        assert!(check_exits(&[signal.clone()], &bar, signal.ds).is_empty());
    }

    #[test]
    fn trail_ratchets_tp3_with_previous_value() {
        let mut signal = waiting_signal();
        signal.status = SignalStatus::Tp1Hit;
        signal.take_profit_3 = Some(96_000.0);

        let mut bar = analysis(100_000.0, 98_000.0, 99_500.0);
        bar.chandelier_exit_long = Some(99_000.0);

        let updates = check_exits(&[signal], &bar, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].signal.take_profit_3, Some(99_000.0));
        assert_eq!(
            updates[0].event,
            LifecycleEvent::TrailUpdated {
                previous_tp3: 96_000.0
            }
        );
    }

    #[test]
    fn trail_never_moves_tp3_backwards() {
        let mut signal = waiting_signal();
        signal.status = SignalStatus::Tp1Hit;
        signal.take_profit_3 = Some(99_000.0);

        let mut bar = analysis(100_000.0, 98_000.0, 99_500.0);
        bar.chandelier_exit_long = Some(98_500.0); // unfavorable... but close above

        // Close (99_500) above chandelier (98_500): no runner exit; the
        // chandelier below TP3 means no trail either.
        let updates = check_exits(&[signal], &bar, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert!(updates.is_empty());
    }

    #[test]
    fn waiting_expires_one_day_after_trigger() {
        let signal = waiting_signal(); // ds = 2025-06-01
        let quiet_bar = analysis(100.0, 97.0, 99.0);

        // Cutoff day itself does not expire
        let updates = check_exits(
            &[signal.clone()],
            &quiet_bar,
            NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
        );
        assert!(updates.is_empty());

        let updates = check_exits(
            &[signal.clone()],
            &quiet_bar,
            NaiveDate::from_ymd_opt(2025, 6, 3).unwrap(),
        );
        assert_eq!(updates[0].signal.status, SignalStatus::Expired);
        assert_eq!(updates[0].signal.exit_reason, Some(ExitReason::Expired));
    }

    #[test]
    fn signals_past_tp1_never_expire() {
        let mut signal = waiting_signal();
        signal.status = SignalStatus::Tp1Hit;
        let quiet_bar = analysis(100.0, 97.0, 99.0);

        let updates = check_exits(
            &[signal],
            &quiet_bar,
            NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        );
        assert!(updates.is_empty());
    }

    #[test]
    fn terminal_signals_are_ignored() {
        let mut signal = waiting_signal();
        signal.status = SignalStatus::Invalidated;
        let bar = analysis(500.0, 400.0, 450.0);

        assert!(check_exits(&[signal], &bar, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()).is_empty());
    }

    #[test]
    fn one_bad_signal_does_not_block_siblings() {
        let good = waiting_signal();
        let mut terminal = waiting_signal();
        terminal.signal_id = "sig-2".into();
        terminal.status = SignalStatus::Expired;

        let bar = analysis(151.0, 140.0, 149.0);
        let updates = check_exits(
            &[terminal, good],
            &bar,
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].signal.signal_id, "sig-1");
    }
}
