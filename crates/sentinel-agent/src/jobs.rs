use crate::config::AgentConfig;
use anyhow::Result;
use archival::{
    AccountSnapshotPipeline, AnalyticsStore, ArchivalPipeline, ExpiredSignalArchivalPipeline,
    FeePatchPipeline, RejectedSignalArchivalPipeline, StrategyDefinition, StrategySyncPipeline,
    TradeArchivalPipeline,
};
use broker_trait::Broker;
use execution_engine::StateReconciler;
use market_data::MarketData;
use signal_store::{JobLockRepository, PositionRepository, SignalRepository};
use std::sync::Arc;

/// Lease TTL for maintenance jobs; generous enough to cover a slow broker
const JOB_LOCK_TTL_SECS: i64 = 900;

const RECONCILER_MIN_AGE_MINUTES: i64 = 5;

fn builtin_strategies() -> Vec<StrategyDefinition> {
    vec![
        StrategyDefinition {
            strategy_id: "strategies/S001-PATTERN-ENGINE".into(),
            name: "Chartist pattern engine".into(),
            config_json: serde_json::json!({
                "priority": [
                    "BULL_FLAG", "THREE_WHITE_SOLDIERS", "BULLISH_MARUBOZU",
                    "MORNING_STAR", "PIERCING_LINE", "BULLISH_ENGULFING",
                    "BULLISH_HAMMER", "INVERTED_HAMMER", "DOUBLE_BOTTOM"
                ],
                "pivot_pct_threshold": 0.05,
                "minimum_pattern_width": 10
            })
            .to_string(),
        },
        StrategyDefinition {
            strategy_id: "strategies/S002-HARMONIC-PATTERN".into(),
            name: "Harmonic confluence".into(),
            config_json: serde_json::json!({
                "patterns": ["ABCD", "GARTLEY", "BAT", "BUTTERFLY", "CRAB", "ELLIOTT_WAVE_135"],
                "precision_tolerance": 0.001,
                "macro_threshold_days": 90
            })
            .to_string(),
        },
    ]
}

async fn with_lock<F, Fut>(locks: &JobLockRepository, job_name: &str, job: F)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    match locks.acquire_lock(job_name, JOB_LOCK_TTL_SECS).await {
        Ok(true) => {
            if let Err(e) = job().await {
                tracing::error!("[{}] Job failed: {:#}", job_name, e);
            }
            if let Err(e) = locks.release_lock(job_name).await {
                tracing::warn!("[{}] Failed to release lock: {}", job_name, e);
            }
        }
        Ok(false) => {
            tracing::info!("[{}] Lock held elsewhere; skipping.", job_name);
        }
        Err(e) => {
            tracing::error!("[{}] Lock acquisition failed: {}", job_name, e);
        }
    }
}

/// Periodic maintenance: state reconciliation plus the archival pipelines,
/// each under job-lock mutual exclusion. A failing job is logged and the
/// next one still runs.
#[allow(clippy::too_many_arguments)]
pub async fn run_maintenance(
    config: &AgentConfig,
    broker: Arc<dyn Broker>,
    market: Arc<dyn MarketData>,
    signals: Arc<SignalRepository>,
    positions: Arc<PositionRepository>,
    locks: &JobLockRepository,
    analytics_pool: sqlx::AnyPool,
    reconciler: Arc<StateReconciler>,
) {
    tracing::info!("Running maintenance jobs...");

    with_lock(locks, "reconciler", || async {
        // PROD gating happens inside the reconciler itself
        let report = reconciler.reconcile(RECONCILER_MIN_AGE_MINUTES).await;
        if !report.critical_issues.is_empty() {
            tracing::warn!(
                issues = report.critical_issues.len(),
                "Reconciliation finished with critical issues"
            );
        }
        Ok(())
    })
    .await;

    with_lock(locks, "trade_archival", || async {
        TradeArchivalPipeline::new(
            AnalyticsStore::new(analytics_pool.clone()),
            positions.clone(),
            broker.clone(),
            Some(market.clone()),
        )
        .run()
        .await
    })
    .await;

    if config.is_prod() {
        with_lock(locks, "fee_patch", || async {
            FeePatchPipeline::new(AnalyticsStore::new(analytics_pool.clone()), broker.clone())
                .run()
                .await
        })
        .await;
    } else {
        tracing::debug!("Fee reconciliation skipped outside PROD");
    }

    with_lock(locks, "rejected_signal_archival", || async {
        RejectedSignalArchivalPipeline::new(
            AnalyticsStore::new(analytics_pool.clone()),
            signals.clone(),
            Some(market.clone()),
            config.risk_per_trade,
        )
        .run()
        .await
    })
    .await;

    with_lock(locks, "expired_signal_archival", || async {
        ExpiredSignalArchivalPipeline::new(
            AnalyticsStore::new(analytics_pool.clone()),
            signals.clone(),
            Some(market.clone()),
        )
        .run()
        .await
    })
    .await;

    with_lock(locks, "account_snapshot", || async {
        AccountSnapshotPipeline::new(AnalyticsStore::new(analytics_pool.clone()), broker.clone())
            .run()
            .await
    })
    .await;

    with_lock(locks, "strategy_sync", || async {
        StrategySyncPipeline::new(
            AnalyticsStore::new(analytics_pool.clone()),
            builtin_strategies(),
        )
        .run()
        .await
    })
    .await;

    tracing::info!("Maintenance jobs complete.");
}
