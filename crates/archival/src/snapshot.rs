use crate::base::{AnalyticsStore, ArchivalPipeline};
use anyhow::Result;
use async_trait::async_trait;
use broker_trait::Broker;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

const COLUMNS: &[&str] = &[
    "account_id",
    "ds",
    "equity",
    "cash",
    "calmar_ratio",
    "drawdown_pct",
];

/// Minimum equity-curve length before Calmar is considered stable
const MIN_HISTORY_DAYS: usize = 30;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Current drawdown against the curve's peak (including current equity), in
/// percent. Zero when the peak is non-positive.
pub fn drawdown_pct(equity_curve: &[f64], current_equity: f64) -> f64 {
    let peak = equity_curve
        .iter()
        .copied()
        .chain(std::iter::once(current_equity))
        .fold(f64::NEG_INFINITY, f64::max);

    if peak > 0.0 {
        (peak - current_equity) / peak * 100.0
    } else {
        0.0
    }
}

/// Calmar ratio (annualized return / max drawdown) with explicit guardrails:
/// history shorter than 30 days -> 0, start equity <= 0 -> 0, zero max
/// drawdown -> 0.
pub fn calmar_ratio(equity_curve: &[f64], current_equity: f64) -> f64 {
    if equity_curve.len() < MIN_HISTORY_DAYS {
        return 0.0;
    }

    let start_equity = equity_curve[0];
    if start_equity <= 0.0 {
        return 0.0;
    }

    let days = equity_curve.len() as f64;
    let annualized_return =
        (current_equity / start_equity).powf(TRADING_DAYS_PER_YEAR / days) - 1.0;

    // Max drawdown across the whole period, then against the current reading
    let mut running_peak = 0.0f64;
    let mut max_dd = 0.0f64;
    for &eq in equity_curve {
        if eq > running_peak {
            running_peak = eq;
        }
        if running_peak > 0.0 {
            let dd = (running_peak - eq) / running_peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    let peak = equity_curve
        .iter()
        .copied()
        .chain(std::iter::once(current_equity))
        .fold(f64::NEG_INFINITY, f64::max);
    if peak > 0.0 {
        let current_dd = (peak - current_equity) / peak;
        if current_dd > max_dd {
            max_dd = current_dd;
        }
    }

    if max_dd > 0.0 {
        annualized_return / max_dd
    } else {
        0.0
    }
}

/// Daily account snapshot: equity, cash, drawdown and Calmar pushed into the
/// analytical store. Read-only against the broker; never removes source
/// data.
pub struct AccountSnapshotPipeline {
    store: AnalyticsStore,
    broker: Arc<dyn Broker>,
}

impl AccountSnapshotPipeline {
    pub fn new(store: AnalyticsStore, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }
}

#[async_trait]
impl ArchivalPipeline for AccountSnapshotPipeline {
    fn job_name(&self) -> &str {
        "account_snapshot"
    }

    fn staging_table(&self) -> String {
        "stg_accounts_import".to_string()
    }

    fn fact_table(&self) -> String {
        "snapshot_accounts".to_string()
    }

    fn id_column(&self) -> &str {
        "account_id"
    }

    fn columns(&self) -> &'static [&'static str] {
        COLUMNS
    }

    fn store(&self) -> &AnalyticsStore {
        &self.store
    }

    fn create_table_sql(&self) -> Vec<String> {
        let body = "account_id TEXT NOT NULL,
            ds TEXT NOT NULL,
            equity REAL,
            cash REAL,
            calmar_ratio REAL,
            drawdown_pct REAL";
        vec![
            format!("CREATE TABLE IF NOT EXISTS stg_accounts_import ({body})"),
            format!(
                "CREATE TABLE IF NOT EXISTS snapshot_accounts ({body}, PRIMARY KEY (account_id, ds))"
            ),
        ]
    }

    async fn extract(&self) -> Result<Vec<Value>> {
        let account = self.broker.get_account().await?;
        let history = self.broker.get_portfolio_history("1A", "1D").await?;

        Ok(vec![json!({
            "account_id": account.id,
            "equity": account.equity_f64(),
            "cash": account.cash_f64(),
            "history": history.equity,
        })])
    }

    async fn transform(&self, raw: Vec<Value>) -> Result<Vec<Value>> {
        let mut rows = Vec::with_capacity(raw.len());

        for item in raw {
            let account_id = item["account_id"].as_str().unwrap_or("unknown").to_string();
            let equity = item["equity"].as_f64().unwrap_or(0.0);
            let cash = item["cash"].as_f64().unwrap_or(0.0);
            let curve: Vec<f64> = item["history"]
                .as_array()
                .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect())
                .unwrap_or_default();

            let drawdown = drawdown_pct(&curve, equity);
            let calmar = calmar_ratio(&curve, equity);

            rows.push(json!({
                "account_id": account_id,
                "ds": Utc::now().date_naive().format("%Y-%m-%d").to_string(),
                "equity": (equity * 100.0).round() / 100.0,
                "cash": (cash * 100.0).round() / 100.0,
                "calmar_ratio": (calmar * 100.0).round() / 100.0,
                "drawdown_pct": (drawdown * 1e4).round() / 1e4,
            }));
        }

        Ok(rows)
    }

    /// Read-only snapshot: there is no source data to remove.
    async fn cleanup(&self, _raw: &[Value]) -> Result<()> {
        Ok(())
    }
}
