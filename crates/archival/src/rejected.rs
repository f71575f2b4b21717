use crate::base::{AnalyticsStore, ArchivalPipeline};
use anyhow::Result;
use async_trait::async_trait;
use execution_engine::estimate_crypto_fee;
use market_data::MarketData;
use serde_json::{json, Value};
use signal_core::{AssetClass, Bar, RejectedSignal};
use signal_store::SignalRepository;
use std::sync::Arc;

const EXTRACT_BATCH: i64 = 500;
const SIMULATION_LOOKBACK_DAYS: i64 = 30;

const COLUMNS: &[&str] = &[
    "signal_id",
    "ds",
    "symbol",
    "asset_class",
    "pattern_name",
    "rejection_reason",
    "entry_price",
    "suggested_stop",
    "take_profit_1",
    "outcome",
    "theoretical_pnl_usd",
    "theoretical_pnl_pct",
    "rejected_at",
];

/// Theoretical outcome of a signal the risk gates turned away
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadowOutcome {
    StopHit,
    Tp1Hit,
    StillOpen,
    NoData,
}

impl ShadowOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            ShadowOutcome::StopHit => "STOP_HIT",
            ShadowOutcome::Tp1Hit => "TP1_HIT",
            ShadowOutcome::StillOpen => "STILL_OPEN",
            ShadowOutcome::NoData => "NO_DATA",
        }
    }
}

/// Archives rejected/shadow signals with a simulated TP1/stop ladder over
/// the 30 days after emission. The result feeds filter tuning: how much did
/// the gates cost or save?
pub struct RejectedSignalArchivalPipeline {
    store: AnalyticsStore,
    repo: Arc<SignalRepository>,
    market: Option<Arc<dyn MarketData>>,
    /// Dollar risk used to size the hypothetical trade
    risk_per_trade: f64,
}

impl RejectedSignalArchivalPipeline {
    pub fn new(
        store: AnalyticsStore,
        repo: Arc<SignalRepository>,
        market: Option<Arc<dyn MarketData>>,
        risk_per_trade: f64,
    ) -> Self {
        Self {
            store,
            repo,
            market,
            risk_per_trade,
        }
    }

    /// Walk forward through bars after the trigger date: the stop is checked
    /// before the target within each bar (pessimistic ordering), otherwise
    /// the position marks to the final close.
    pub fn simulate(
        rejected: &RejectedSignal,
        bars: &[Bar],
        risk_per_trade: f64,
    ) -> (ShadowOutcome, f64, f64) {
        let signal = &rejected.signal;
        let entry = signal.entry_price;
        let stop = signal.suggested_stop;
        let Some(tp1) = signal.take_profit_1 else {
            return (ShadowOutcome::NoData, 0.0, 0.0);
        };

        let risk_per_share = (entry - stop).abs();
        if risk_per_share <= 0.0 || entry <= 0.0 {
            return (ShadowOutcome::NoData, 0.0, 0.0);
        }
        let qty = risk_per_trade / risk_per_share;

        let window: Vec<&Bar> = bars
            .iter()
            .filter(|b| b.timestamp.date_naive() > signal.ds)
            .collect();
        if window.is_empty() {
            return (ShadowOutcome::NoData, 0.0, 0.0);
        }

        let mut outcome = ShadowOutcome::StillOpen;
        let mut exit_price = window.last().map(|b| b.close).unwrap_or(entry);

        for bar in &window {
            if bar.low <= stop {
                outcome = ShadowOutcome::StopHit;
                exit_price = stop;
                break;
            }
            if bar.high >= tp1 {
                outcome = ShadowOutcome::Tp1Hit;
                exit_price = tp1;
                break;
            }
        }

        let gross = (exit_price - entry) * qty;
        let fees = if signal.asset_class == AssetClass::Crypto {
            estimate_crypto_fee(entry * qty, None) + estimate_crypto_fee(exit_price * qty, None)
        } else {
            0.0
        };
        let pnl_usd = gross - fees;
        let pnl_pct = pnl_usd / (entry * qty) * 100.0;

        (
            outcome,
            (pnl_usd * 100.0).round() / 100.0,
            (pnl_pct * 1e4).round() / 1e4,
        )
    }
}

#[async_trait]
impl ArchivalPipeline for RejectedSignalArchivalPipeline {
    fn job_name(&self) -> &str {
        "rejected_signal_archival"
    }

    fn staging_table(&self) -> String {
        "stg_rejected_signals_import".to_string()
    }

    fn fact_table(&self) -> String {
        "fact_rejected_signals".to_string()
    }

    fn id_column(&self) -> &str {
        "signal_id"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn store(&self) -> &AnalyticsStore {
        &self.store
    }

    fn create_table_sql(&self) -> Vec<String> {
        let body = "signal_id TEXT NOT NULL,
            ds TEXT NOT NULL,
            symbol TEXT,
            asset_class TEXT,
            pattern_name TEXT,
            rejection_reason TEXT,
            entry_price REAL,
            suggested_stop REAL,
            take_profit_1 REAL,
            outcome TEXT,
            theoretical_pnl_usd REAL,
            theoretical_pnl_pct REAL,
            rejected_at TEXT";
        vec![
            format!("CREATE TABLE IF NOT EXISTS stg_rejected_signals_import ({body})"),
            format!(
                "CREATE TABLE IF NOT EXISTS fact_rejected_signals ({body}, PRIMARY KEY (signal_id, ds))"
            ),
        ]
    }

    async fn extract(&self) -> Result<Vec<Value>> {
        let rejected = self.repo.get_rejected_signals(EXTRACT_BATCH).await?;
        Ok(rejected
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn transform(&self, raw: Vec<Value>) -> Result<Vec<Value>> {
        let mut rows = Vec::with_capacity(raw.len());

        for value in raw {
            let rejected: RejectedSignal = serde_json::from_value(value)?;
            let signal = &rejected.signal;

            let bars = match &self.market {
                Some(market) => market
                    .get_daily_bars(
                        &signal.symbol,
                        signal.asset_class,
                        SIMULATION_LOOKBACK_DAYS,
                    )
                    .await
                    .unwrap_or_default(),
                None => vec![],
            };

            let (outcome, pnl_usd, pnl_pct) =
                Self::simulate(&rejected, &bars, self.risk_per_trade);

            rows.push(json!({
                "signal_id": signal.signal_id,
                "ds": signal.ds.format("%Y-%m-%d").to_string(),
                "symbol": signal.symbol,
                "asset_class": signal.asset_class.as_str(),
                "pattern_name": signal.pattern_name,
                "rejection_reason": rejected.rejection_reason,
                "entry_price": signal.entry_price,
                "suggested_stop": signal.suggested_stop,
                "take_profit_1": signal.take_profit_1,
                "outcome": outcome.as_str(),
                "theoretical_pnl_usd": pnl_usd,
                "theoretical_pnl_pct": pnl_pct,
                "rejected_at": rejected.rejected_at.to_rfc3339(),
            }));
        }

        Ok(rows)
    }

    async fn cleanup(&self, raw: &[Value]) -> Result<()> {
        let ids: Vec<String> = raw
            .iter()
            .filter_map(|v| v.pointer("/signal/signal_id"))
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect();
        let deleted = self.repo.delete_rejected_signals(&ids).await?;
        tracing::info!(
            "[{}] Deleted {} archived shadow signals",
            self.job_name(),
            deleted
        );
        Ok(())
    }
}
