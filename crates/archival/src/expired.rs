use crate::base::{AnalyticsStore, ArchivalPipeline};
use anyhow::Result;
use async_trait::async_trait;
use market_data::MarketData;
use serde_json::{json, Value};
use signal_core::{Bar, Signal, SignalStatus};
use signal_store::SignalRepository;
use std::sync::Arc;

const EXTRACT_BATCH: i64 = 500;

const COLUMNS: &[&str] = &[
    "signal_id",
    "ds",
    "symbol",
    "asset_class",
    "pattern_name",
    "pattern_classification",
    "entry_price",
    "take_profit_1",
    "mfe_pct",
    "distance_to_tp1_pct",
    "valid_until",
    "created_at",
];

/// Archives EXPIRED signals with how far price ran in their favor during the
/// validity window (maximum favorable excursion) and how close it came to
/// the first target. Feeds expiry-window tuning.
pub struct ExpiredSignalArchivalPipeline {
    store: AnalyticsStore,
    repo: Arc<SignalRepository>,
    market: Option<Arc<dyn MarketData>>,
}

impl ExpiredSignalArchivalPipeline {
    pub fn new(
        store: AnalyticsStore,
        repo: Arc<SignalRepository>,
        market: Option<Arc<dyn MarketData>>,
    ) -> Self {
        Self {
            store,
            repo,
            market,
        }
    }

    /// (mfe_pct, distance_to_tp1_pct) over bars inside the validity window.
    /// distance_to_tp1 is positive when price never reached the target and
    /// zero or negative when it traded through it.
    pub fn excursion_metrics(signal: &Signal, bars: &[Bar]) -> (Option<f64>, Option<f64>) {
        if signal.entry_price <= 0.0 {
            return (None, None);
        }

        let window: Vec<&Bar> = bars
            .iter()
            .filter(|b| {
                b.timestamp.date_naive() >= signal.ds && b.timestamp <= signal.valid_until
            })
            .collect();
        if window.is_empty() {
            return (None, None);
        }

        let max_high = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let mfe_pct = (max_high - signal.entry_price) / signal.entry_price * 100.0;

        let distance_to_tp1_pct = signal.take_profit_1.map(|tp1| {
            if tp1 > 0.0 {
                (tp1 - max_high) / tp1 * 100.0
            } else {
                0.0
            }
        });

        (
            Some((mfe_pct * 1e4).round() / 1e4),
            distance_to_tp1_pct.map(|d| (d * 1e4).round() / 1e4),
        )
    }
}

#[async_trait]
impl ArchivalPipeline for ExpiredSignalArchivalPipeline {
    fn job_name(&self) -> &str {
        "expired_signal_archival"
    }

    fn staging_table(&self) -> String {
        "stg_expired_signals_import".to_string()
    }

    fn fact_table(&self) -> String {
        "fact_expired_signals".to_string()
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
            pattern_classification TEXT,
            entry_price REAL,
            take_profit_1 REAL,
            mfe_pct REAL,
            distance_to_tp1_pct REAL,
            valid_until TEXT,
            created_at TEXT";
        vec![
            format!("CREATE TABLE IF NOT EXISTS stg_expired_signals_import ({body})"),
            format!(
                "CREATE TABLE IF NOT EXISTS fact_expired_signals ({body}, PRIMARY KEY (signal_id, ds))"
            ),
        ]
    }

    async fn extract(&self) -> Result<Vec<Value>> {
        let expired = self
            .repo
            .get_signals_by_status(SignalStatus::Expired, EXTRACT_BATCH)
            .await?;
        Ok(expired
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn transform(&self, raw: Vec<Value>) -> Result<Vec<Value>> {
        let mut rows = Vec::with_capacity(raw.len());

        for value in raw {
            let signal: Signal = serde_json::from_value(value)?;

            let bars = match &self.market {
                Some(market) => market
                    .get_daily_bars(&signal.symbol, signal.asset_class, 30)
                    .await
                    .unwrap_or_default(),
                None => vec![],
            };
            let (mfe_pct, distance_to_tp1_pct) = Self::excursion_metrics(&signal, &bars);

            rows.push(json!({
                "signal_id": signal.signal_id,
                "ds": signal.ds.format("%Y-%m-%d").to_string(),
                "symbol": signal.symbol,
                "asset_class": signal.asset_class.as_str(),
                "pattern_name": signal.pattern_name,
                "pattern_classification": signal.pattern_classification.map(|c| c.as_str()),
                "entry_price": signal.entry_price,
                "take_profit_1": signal.take_profit_1,
                "mfe_pct": mfe_pct,
                "distance_to_tp1_pct": distance_to_tp1_pct,
                "valid_until": signal.valid_until.to_rfc3339(),
                "created_at": signal.created_at.to_rfc3339(),
            }));
        }

        Ok(rows)
    }

    async fn cleanup(&self, raw: &[Value]) -> Result<()> {
        let ids: Vec<String> = raw
            .iter()
            .filter_map(|v| v.get("signal_id"))
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect();
        let deleted = self.repo.delete_signals(&ids).await?;
        tracing::info!(
            "[{}] Deleted {} archived expired signals",
            self.job_name(),
            deleted
        );
        Ok(())
    }
}
