use crate::base::AnalyticsStore;
use anyhow::Result;
use chrono::Utc;
use signal_core::content_hash;
use sqlx::Row;

/// A strategy's declarative definition as shipped with the engine
#[derive(Debug, Clone)]
pub struct StrategyDefinition {
    pub strategy_id: String,
    pub name: String,
    pub config_json: String,
}

impl StrategyDefinition {
    fn hash(&self) -> String {
        content_hash(&format!(
            "{}|{}|{}",
            self.strategy_id, self.name, self.config_json
        ))
    }
}

/// SCD Type 2 sync of strategy definitions into the analytical dimension
/// table: a content-hash change closes the prior current row and inserts a
/// new current one; unchanged definitions are left untouched.
pub struct StrategySyncPipeline {
    store: AnalyticsStore,
    strategies: Vec<StrategyDefinition>,
}

impl StrategySyncPipeline {
    pub fn new(store: AnalyticsStore, strategies: Vec<StrategyDefinition>) -> Self {
        Self { store, strategies }
    }

    pub fn job_name(&self) -> &str {
        "strategy_sync"
    }

    async fn ensure_table(&self) -> Result<()> {
        self.store
            .ensure_table(
                "CREATE TABLE IF NOT EXISTS dim_strategies (
                    strategy_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    config_json TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    valid_from TEXT NOT NULL,
                    valid_to TEXT,
                    is_current INTEGER NOT NULL DEFAULT 1,
                    PRIMARY KEY (strategy_id, valid_from)
                )",
            )
            .await
    }

    async fn current_hash(&self, strategy_id: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT content_hash FROM dim_strategies
             WHERE strategy_id = ? AND is_current = 1
             ORDER BY valid_from DESC LIMIT 1",
        )
        .bind(strategy_id)
        .fetch_optional(self.store.pool())
        .await?;

        Ok(match row {
            Some(r) => Some(r.try_get("content_hash")?),
            None => None,
        })
    }

    pub async fn run(&self) -> Result<()> {
        tracing::info!("[{}] Starting pipeline execution...", self.job_name());
        self.ensure_table().await?;

        let now = Utc::now().to_rfc3339();
        let mut inserted = 0usize;
        let mut versioned = 0usize;

        for strategy in &self.strategies {
            let new_hash = strategy.hash();
            match self.current_hash(&strategy.strategy_id).await? {
                Some(existing) if existing == new_hash => continue,
                Some(_) => {
                    // Close the prior current row
                    sqlx::query(
                        "UPDATE dim_strategies SET valid_to = ?, is_current = 0
                         WHERE strategy_id = ? AND is_current = 1",
                    )
                    .bind(&now)
                    .bind(&strategy.strategy_id)
                    .execute(self.store.pool())
                    .await?;
                    versioned += 1;
                }
                None => {}
            }

            sqlx::query(
                "INSERT INTO dim_strategies
                 (strategy_id, name, config_json, content_hash, valid_from, valid_to, is_current)
                 VALUES (?, ?, ?, ?, ?, NULL, 1)",
            )
            .bind(&strategy.strategy_id)
            .bind(&strategy.name)
            .bind(&strategy.config_json)
            .bind(&new_hash)
            .bind(&now)
            .execute(self.store.pool())
            .await?;
            inserted += 1;
        }

        tracing::info!(
            "[{}] Synced strategies: {} inserted, {} versioned.",
            self.job_name(),
            inserted,
            versioned
        );
        Ok(())
    }
}
