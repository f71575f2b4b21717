use crate::base::AnalyticsStore;
use anyhow::Result;
use broker_trait::{ActivityFilter, Broker};
use chrono::{Duration, NaiveDate, Utc};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// Pause between broker activity queries to respect rate limits
const ACTIVITY_PAUSE_MS: u64 = 100;

/// Reconciles estimated crypto fees on already-archived trades against the
/// broker's CFEE activity records. CFEE activities become visible at T+1, so
/// only trades whose exit is at least a day old are patched. Missing
/// activities fall back to zero fees; either way `fee_finalized` flips so a
/// trade is patched exactly once.
pub struct FeePatchPipeline {
    store: AnalyticsStore,
    broker: Arc<dyn Broker>,
}

struct PendingTrade {
    trade_id: String,
    ds: String,
    symbol: String,
    exit_date: NaiveDate,
}

impl FeePatchPipeline {
    pub fn new(store: AnalyticsStore, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    pub fn job_name(&self) -> &str {
        "fee_patch"
    }

    async fn pending_trades(&self, cutoff: NaiveDate) -> Result<Vec<PendingTrade>> {
        let rows = sqlx::query(
            "SELECT trade_id, ds, symbol, exit_time FROM fact_trades
             WHERE fee_finalized = 0 AND asset_class = 'CRYPTO' AND exit_time IS NOT NULL",
        )
        .fetch_all(self.store.pool())
        .await?;

        let mut pending = Vec::new();
        for row in rows {
            let exit_time: Option<String> = row.try_get("exit_time")?;
            let Some(exit_time) = exit_time else { continue };
            let Ok(exit_ts) = chrono::DateTime::parse_from_rfc3339(&exit_time) else {
                continue;
            };
            let exit_date = exit_ts.date_naive();
            if exit_date > cutoff {
                // CFEE not visible yet
                continue;
            }
            pending.push(PendingTrade {
                trade_id: row.try_get("trade_id")?,
                ds: row.try_get("ds")?,
                symbol: row.try_get("symbol")?,
                exit_date,
            });
        }
        Ok(pending)
    }

    /// Sum CFEE amounts matching a symbol on a date. Activities are raw JSON
    /// as the broker reports them.
    fn matching_fee_total(
        activities: &[serde_json::Value],
        symbol: &str,
        exit_date: NaiveDate,
    ) -> f64 {
        let normalized = symbol.replace('/', "");
        activities
            .iter()
            .filter(|a| {
                a.get("symbol")
                    .and_then(|s| s.as_str())
                    .map(|s| s.replace('/', "") == normalized)
                    .unwrap_or(false)
            })
            .filter(|a| {
                a.get("date")
                    .and_then(|d| d.as_str())
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                    .map(|d| d == exit_date)
                    .unwrap_or(true)
            })
            .filter_map(|a| {
                a.get("net_amount")
                    .or_else(|| a.get("qty"))
                    .and_then(|v| match v {
                        serde_json::Value::String(s) => s.parse::<f64>().ok(),
                        serde_json::Value::Number(n) => n.as_f64(),
                        _ => None,
                    })
            })
            .map(f64::abs)
            .sum()
    }

    pub async fn run(&self) -> Result<()> {
        tracing::info!("[{}] Starting pipeline execution...", self.job_name());

        let cutoff = Utc::now().date_naive() - Duration::days(1);
        let pending = self.pending_trades(cutoff).await?;
        if pending.is_empty() {
            tracing::info!("[{}] No trades awaiting fee reconciliation.", self.job_name());
            return Ok(());
        }

        let mut patched = 0usize;
        for (i, trade) in pending.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(StdDuration::from_millis(ACTIVITY_PAUSE_MS)).await;
            }

            let activities = self
                .broker
                .get_activities(ActivityFilter {
                    activity_type: Some("CFEE".to_string()),
                    after: Some(trade.exit_date),
                    until: Some(trade.exit_date + Duration::days(1)),
                })
                .await
                .unwrap_or_default();

            // Missing activities -> zero-fee fallback; the flag still flips
            let actual_fee = Self::matching_fee_total(&activities, &trade.symbol, trade.exit_date);

            sqlx::query(
                "UPDATE fact_trades SET commission = ?, fee_finalized = 1
                 WHERE trade_id = ? AND ds = ?",
            )
            .bind(actual_fee)
            .bind(&trade.trade_id)
            .bind(&trade.ds)
            .execute(self.store.pool())
            .await?;
            patched += 1;
        }

        tracing::info!("[{}] Finalized fees on {} trades.", self.job_name(), patched);
        Ok(())
    }
}
