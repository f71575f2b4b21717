use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Relational warehouse access for the archival pipelines. Rows travel as
/// JSON objects; the store maps them onto the declared column list.
pub struct AnalyticsStore {
    pool: sqlx::AnyPool,
}

impl AnalyticsStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::AnyPool {
        &self.pool
    }

    pub async fn ensure_table(&self, create_sql: &str) -> Result<()> {
        sqlx::query(create_sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn truncate(&self, table: &str) -> Result<()> {
        // DELETE instead of TRUNCATE keeps SQLite in play for tests
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn bind_json_value<'q>(
        query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
        value: &Value,
    ) -> Result<sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>> {
        Ok(match value {
            Value::Null => query.bind(Option::<String>::None),
            Value::Bool(b) => query.bind(*b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else {
                    query.bind(n.as_f64().unwrap_or(0.0))
                }
            }
            Value::String(s) => query.bind(s.clone()),
            other => return Err(anyhow!("unsupported column value: {other}")),
        })
    }

    /// Insert JSON rows into a table using the declared column order.
    pub async fn insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Value],
    ) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        for row in rows {
            let object = row
                .as_object()
                .ok_or_else(|| anyhow!("row is not a JSON object"))?;
            let mut query = sqlx::query(&sql);
            for column in columns {
                let value = object.get(*column).unwrap_or(&Value::Null);
                query = Self::bind_json_value(query, value)?;
            }
            query.execute(&self.pool).await?;
        }

        Ok(rows.len())
    }

    /// Upsert staging into fact keyed by (id_column, partition_column).
    /// Re-running the same batch merges the same rows with no duplication.
    pub async fn merge(
        &self,
        staging_table: &str,
        fact_table: &str,
        columns: &[&str],
        id_column: &str,
        partition_column: &str,
    ) -> Result<()> {
        let update_clause = columns
            .iter()
            .filter(|c| **c != id_column && **c != partition_column)
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let column_list = columns.join(", ");

        let sql = format!(
            "INSERT INTO {fact_table} ({column_list})
             SELECT {column_list} FROM {staging_table} WHERE true
             ON CONFLICT ({id_column}, {partition_column}) DO UPDATE SET {update_clause}"
        );

        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

/// Truncate -> stage -> merge pipeline contract.
///
/// `run` orchestrates extract -> transform -> truncate staging -> load ->
/// merge -> cleanup. Any failure short-circuits BEFORE cleanup and
/// propagates, so source records are only deleted after a successful merge.
#[async_trait]
pub trait ArchivalPipeline: Send + Sync {
    fn job_name(&self) -> &str;
    fn staging_table(&self) -> String;
    fn fact_table(&self) -> String;
    fn id_column(&self) -> &str;
    fn partition_column(&self) -> &str {
        "ds"
    }
    fn columns(&self) -> &'static [&'static str];

    fn store(&self) -> &AnalyticsStore;

    /// DDL for the staging and fact tables
    fn create_table_sql(&self) -> Vec<String>;

    /// Read terminal source records from the operational store
    async fn extract(&self) -> Result<Vec<Value>>;

    /// Enrich raw records into rows matching the analytical schema
    async fn transform(&self, raw: Vec<Value>) -> Result<Vec<Value>>;

    /// Delete processed records from the operational store. Only invoked
    /// after a successful merge.
    async fn cleanup(&self, raw: &[Value]) -> Result<()>;

    async fn run(&self) -> Result<()> {
        let job = self.job_name().to_string();
        tracing::info!("[{}] Starting pipeline execution...", job);
        // Flow below: any error returns before cleanup, so source rows are
        // never deleted for a batch that did not reach the fact table.

        for sql in self.create_table_sql() {
            self.store().ensure_table(&sql).await?;
        }

        let raw = self.extract().await?;
        if raw.is_empty() {
            tracing::info!("[{}] No data found. Exiting.", job);
            return Ok(());
        }

        tracing::info!("[{}] Transforming {} records...", job, raw.len());
        let rows = self.transform(raw.clone()).await?;

        let staging = self.staging_table();
        self.store().truncate(&staging).await?;

        tracing::info!("[{}] Loading {} rows to {}...", job, rows.len(), staging);
        self.store()
            .insert_rows(&staging, self.columns(), &rows)
            .await?;

        tracing::info!("[{}] Executing merge...", job);
        self.store()
            .merge(
                &staging,
                &self.fact_table(),
                self.columns(),
                self.id_column(),
                self.partition_column(),
            )
            .await?;

        self.cleanup(&raw).await?;

        tracing::info!("[{}] Pipeline finished successfully.", job);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Minimal pipeline over an in-memory "source" list, used to exercise
    /// the shared run() contract.
    struct TestPipeline {
        store: AnalyticsStore,
        source: Mutex<Vec<Value>>,
        fail_transform: AtomicBool,
        cleanup_calls: AtomicUsize,
    }

    const TEST_COLUMNS: &[&str] = &["record_id", "ds", "amount"];

    #[async_trait]
    impl ArchivalPipeline for TestPipeline {
        fn job_name(&self) -> &str {
            "test_pipeline"
        }
        fn staging_table(&self) -> String {
            "stg_test_import".into()
        }
        fn fact_table(&self) -> String {
            "fact_test".into()
        }
        fn id_column(&self) -> &str {
            "record_id"
        }
        fn columns(&self) -> &'static [&'static str] {
            TEST_COLUMNS
        }
        fn store(&self) -> &AnalyticsStore {
            &self.store
        }

        fn create_table_sql(&self) -> Vec<String> {
            vec![
                "CREATE TABLE IF NOT EXISTS stg_test_import (
                    record_id TEXT NOT NULL, ds TEXT NOT NULL, amount REAL)"
                    .into(),
                "CREATE TABLE IF NOT EXISTS fact_test (
                    record_id TEXT NOT NULL, ds TEXT NOT NULL, amount REAL,
                    PRIMARY KEY (record_id, ds))"
                    .into(),
            ]
        }

        async fn extract(&self) -> Result<Vec<Value>> {
            Ok(self.source.lock().unwrap().clone())
        }

        async fn transform(&self, raw: Vec<Value>) -> Result<Vec<Value>> {
            if self.fail_transform.load(Ordering::SeqCst) {
                return Err(anyhow!("enrichment failed"));
            }
            Ok(raw)
        }

        async fn cleanup(&self, raw: &[Value]) -> Result<()> {
            self.cleanup_calls.fetch_add(1, Ordering::SeqCst);
            let mut source = self.source.lock().unwrap();
            for value in raw {
                let id = value["record_id"].as_str().unwrap_or_default().to_string();
                source.retain(|v| v["record_id"].as_str() != Some(id.as_str()));
            }
            Ok(())
        }
    }

    async fn pipeline_with(rows: Vec<Value>) -> TestPipeline {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite");
        TestPipeline {
            store: AnalyticsStore::new(pool),
            source: Mutex::new(rows),
            fail_transform: AtomicBool::new(false),
            cleanup_calls: AtomicUsize::new(0),
        }
    }

    fn record(id: &str, amount: f64) -> Value {
        serde_json::json!({"record_id": id, "ds": "2025-06-01", "amount": amount})
    }

    async fn fact_count(store: &AnalyticsStore) -> i64 {
        use sqlx::Row;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM fact_test")
            .fetch_one(store.pool())
            .await
            .unwrap();
        row.try_get::<i64, _>("n").unwrap()
    }

    #[tokio::test]
    async fn run_moves_rows_and_cleans_source() {
        let pipeline = pipeline_with(vec![record("r1", 10.0), record("r2", 20.0)]).await;
        pipeline.run().await.unwrap();

        assert_eq!(fact_count(&pipeline.store).await, 2);
        assert!(pipeline.source.lock().unwrap().is_empty());
        assert_eq!(pipeline.cleanup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rerunning_the_same_batch_does_not_duplicate() {
        let pipeline = pipeline_with(vec![record("r1", 10.0)]).await;
        pipeline.run().await.unwrap();

        // Same row reappears in the source (e.g. a retried batch)
        pipeline.source.lock().unwrap().push(record("r1", 99.0));
        pipeline.run().await.unwrap();

        // Merged, not duplicated; latest values win
        assert_eq!(fact_count(&pipeline.store).await, 1);
        use sqlx::Row;
        let row = sqlx::query("SELECT amount FROM fact_test WHERE record_id = 'r1'")
            .fetch_one(pipeline.store.pool())
            .await
            .unwrap();
        assert_eq!(row.try_get::<f64, _>("amount").unwrap(), 99.0);
    }

    #[tokio::test]
    async fn transform_failure_short_circuits_before_cleanup() {
        let pipeline = pipeline_with(vec![record("r1", 10.0)]).await;
        pipeline.fail_transform.store(true, Ordering::SeqCst);

        let result = pipeline.run().await;
        assert!(result.is_err());

        // Source rows survive the failed run and nothing reached the fact
        assert_eq!(pipeline.source.lock().unwrap().len(), 1);
        assert_eq!(pipeline.cleanup_calls.load(Ordering::SeqCst), 0);
        for sql in pipeline.create_table_sql() {
            pipeline.store.ensure_table(&sql).await.unwrap();
        }
        assert_eq!(fact_count(&pipeline.store).await, 0);
    }

    #[tokio::test]
    async fn empty_extract_is_a_clean_noop() {
        let pipeline = pipeline_with(vec![]).await;
        pipeline.run().await.unwrap();
        assert_eq!(pipeline.cleanup_calls.load(Ordering::SeqCst), 0);
    }
}
