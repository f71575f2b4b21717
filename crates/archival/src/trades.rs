use crate::base::{AnalyticsStore, ArchivalPipeline};
use anyhow::Result;
use async_trait::async_trait;
use broker_trait::Broker;
use execution_engine::estimate_crypto_fee;
use market_data::MarketData;
use serde_json::{json, Value};
use signal_core::{AssetClass, Bar, Position};
use signal_store::PositionRepository;
use std::sync::Arc;
use std::time::Duration;

const EXTRACT_BATCH: i64 = 500;
/// Pause between broker enrichment queries to respect rate limits
const ENRICH_PAUSE_MS: u64 = 100;

const COLUMNS: &[&str] = &[
    "trade_id",
    "ds",
    "symbol",
    "asset_class",
    "side",
    "trade_type",
    "qty_original",
    "qty_final",
    "entry_fill_price",
    "exit_fill_price",
    "entry_slippage_pct",
    "exit_slippage_pct",
    "exit_reason",
    "scaled_out_qty",
    "commission",
    "estimated_fees",
    "fee_finalized",
    "mfe_pct",
    "trade_duration_seconds",
    "realized_pnl_usd",
    "realized_pnl_pct",
    "created_at",
    "exit_time",
];

/// Moves CLOSED positions from the operational store into the analytical
/// trade fact table, enriched with final fills, direction-aware slippage,
/// maximum favorable excursion and estimated crypto fees. Source rows are
/// deleted only after a successful merge.
pub struct TradeArchivalPipeline {
    store: AnalyticsStore,
    repo: Arc<PositionRepository>,
    broker: Arc<dyn Broker>,
    market: Option<Arc<dyn MarketData>>,
}

impl TradeArchivalPipeline {
    pub fn new(
        store: AnalyticsStore,
        repo: Arc<PositionRepository>,
        broker: Arc<dyn Broker>,
        market: Option<Arc<dyn MarketData>>,
    ) -> Self {
        Self {
            store,
            repo,
            broker,
            market,
        }
    }

    /// Maximum favorable excursion over the trade window, percent from entry
    async fn compute_mfe_pct(&self, position: &Position) -> Option<f64> {
        let market = self.market.as_ref()?;
        let entry = position.entry_fill_price?;
        if entry <= 0.0 {
            return None;
        }

        let bars = market
            .get_daily_bars(&position.symbol, position.asset_class, 60)
            .await
            .ok()?;
        let start = position.filled_at?;
        let end = position.exit_time?;

        let window: Vec<&Bar> = bars
            .iter()
            .filter(|b| b.timestamp >= start && b.timestamp <= end)
            .collect();
        if window.is_empty() {
            return None;
        }

        let best = if position.side == signal_core::OrderSide::Buy {
            window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max)
        } else {
            // For shorts the favorable direction is down
            let low = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
            return Some(((entry - low) / entry * 100.0 * 1e4).round() / 1e4);
        };

        Some(((best - entry) / entry * 100.0 * 1e4).round() / 1e4)
    }

    async fn position_row(&self, position: &Position, crypto_tier: Option<i32>) -> Value {
        let entry = position
            .entry_fill_price
            .unwrap_or(position.target_entry_price);
        let total_qty = position.total_qty();

        let estimated_fees = if position.asset_class == AssetClass::Crypto {
            // Entry plus exit notionals at the current taker tier
            let entry_fee = estimate_crypto_fee(entry * total_qty, crypto_tier);
            let exit_fee = position
                .exit_fill_price
                .map(|p| estimate_crypto_fee(p * total_qty, crypto_tier))
                .unwrap_or(0.0);
            entry_fee + exit_fee
        } else {
            0.0
        };

        let mfe_pct = self.compute_mfe_pct(position).await;

        json!({
            "trade_id": position.position_id,
            "ds": position.ds.format("%Y-%m-%d").to_string(),
            "symbol": position.symbol,
            "asset_class": position.asset_class.as_str(),
            "side": position.side.as_str(),
            "trade_type": position.trade_type.as_str(),
            "qty_original": total_qty,
            "qty_final": position.qty,
            "entry_fill_price": position.entry_fill_price,
            "exit_fill_price": position.exit_fill_price,
            "entry_slippage_pct": position.entry_slippage_pct,
            "exit_slippage_pct": position.exit_slippage_pct,
            "exit_reason": position.exit_reason.map(|r| r.as_str()),
            "scaled_out_qty": position.scaled_out_qty,
            "commission": position.commission,
            "estimated_fees": estimated_fees,
            "fee_finalized": false,
            "mfe_pct": mfe_pct,
            "trade_duration_seconds": position.trade_duration_seconds,
            "realized_pnl_usd": position.realized_pnl_usd,
            "realized_pnl_pct": position.realized_pnl_pct,
            "created_at": position.created_at.to_rfc3339(),
            "exit_time": position.exit_time.map(|t| t.to_rfc3339()),
        })
    }
}

#[async_trait]
impl ArchivalPipeline for TradeArchivalPipeline {
    fn job_name(&self) -> &str {
        "trade_archival"
    }

    fn staging_table(&self) -> String {
        "stg_trades_import".to_string()
    }

    fn fact_table(&self) -> String {
        "fact_trades".to_string()
    }

    fn id_column(&self) -> &str {
        "trade_id"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn store(&self) -> &AnalyticsStore {
        &self.store
    }

    fn create_table_sql(&self) -> Vec<String> {
        let body = "trade_id TEXT NOT NULL,
            ds TEXT NOT NULL,
            symbol TEXT,
            asset_class TEXT,
            side TEXT,
            trade_type TEXT,
            qty_original REAL,
            qty_final REAL,
            entry_fill_price REAL,
            exit_fill_price REAL,
            entry_slippage_pct REAL,
            exit_slippage_pct REAL,
            exit_reason TEXT,
            scaled_out_qty REAL,
            commission REAL,
            estimated_fees REAL,
            fee_finalized INTEGER,
            mfe_pct REAL,
            trade_duration_seconds INTEGER,
            realized_pnl_usd REAL,
            realized_pnl_pct REAL,
            created_at TEXT,
            exit_time TEXT";
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS stg_trades_import ({body})"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS fact_trades ({body}, PRIMARY KEY (trade_id, ds))"
            ),
        ]
    }

    async fn extract(&self) -> Result<Vec<Value>> {
        let closed = self.repo.get_closed_positions(EXTRACT_BATCH).await?;
        Ok(closed
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn transform(&self, raw: Vec<Value>) -> Result<Vec<Value>> {
        let crypto_tier = self
            .broker
            .get_account()
            .await
            .ok()
            .and_then(|a| a.crypto_tier);

        let mut rows = Vec::with_capacity(raw.len());
        for (i, value) in raw.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(ENRICH_PAUSE_MS)).await;
            }
            let mut position: Position = serde_json::from_value(value.clone())?;

            // Deferred exit capture: a backfill-pending close resolves here
            // once the broker reports the fill
            if position.awaiting_backfill {
                if let Some(exit_order_id) = position.exit_order_id.clone() {
                    if let Ok(Some(order)) = self.broker.get_order_by_id(&exit_order_id).await {
                        if let Some(fill) = order.filled_avg_price_f64() {
                            position.exit_fill_price = Some(fill);
                            position.exit_time = order.filled_at.or(position.exit_time);
                            position.awaiting_backfill = false;
                        }
                    }
                }
            }

            rows.push(self.position_row(&position, crypto_tier).await);
        }
        Ok(rows)
    }

    async fn cleanup(&self, raw: &[Value]) -> Result<()> {
        let ids: Vec<String> = raw
            .iter()
            .filter_map(|v| v.get("position_id"))
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect();
        let deleted = self.repo.delete_positions(&ids).await?;
        tracing::info!(
            "[{}] Deleted {} archived positions from the operational store",
            self.job_name(),
            deleted
        );
        Ok(())
    }
}
