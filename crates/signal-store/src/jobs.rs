use anyhow::Result;
use chrono::{Duration, Utc};

/// Process-wide mutual exclusion for scheduled jobs. A lock is a lease with
/// an expiry; stale leases from crashed runs are reaped on acquisition.
pub struct JobLockRepository {
    pool: sqlx::AnyPool,
    prefix: String,
}

impl JobLockRepository {
    pub fn new(pool: sqlx::AnyPool, environment: &str) -> Self {
        Self {
            pool,
            prefix: crate::table_prefix(environment).to_string(),
        }
    }

    fn table(&self) -> String {
        format!("{}job_locks", self.prefix)
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                job_name TEXT PRIMARY KEY,
                locked_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
            self.table()
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns true when this caller now holds the lock.
    pub async fn acquire_lock(&self, job_name: &str, ttl_seconds: i64) -> Result<bool> {
        let now = Utc::now();

        // Reap an expired lease first
        sqlx::query(&format!(
            "DELETE FROM {} WHERE job_name = ? AND expires_at < ?",
            self.table()
        ))
        .bind(job_name)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let expires_at = now + Duration::seconds(ttl_seconds);
        let result = sqlx::query(&format!(
            "INSERT INTO {} (job_name, locked_at, expires_at) VALUES (?, ?, ?)
             ON CONFLICT (job_name) DO NOTHING",
            self.table()
        ))
        .bind(job_name)
        .bind(now.to_rfc3339())
        .bind(expires_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn release_lock(&self, job_name: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE job_name = ?", self.table()))
            .bind(job_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> JobLockRepository {
        let repo = JobLockRepository::new(crate::test_pool().await, "TEST");
        repo.init_tables().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let repo = setup().await;

        assert!(repo.acquire_lock("trade_archival", 300).await.unwrap());
        assert!(!repo.acquire_lock("trade_archival", 300).await.unwrap());

        // A different job name is independent
        assert!(repo.acquire_lock("reconciler", 300).await.unwrap());

        repo.release_lock("trade_archival").await.unwrap();
        assert!(repo.acquire_lock("trade_archival", 300).await.unwrap());
    }

    #[tokio::test]
    async fn expired_lease_is_reaped() {
        let repo = setup().await;

        // TTL in the past: the next acquire should reap and take over
        assert!(repo.acquire_lock("fee_patch", -10).await.unwrap());
        assert!(repo.acquire_lock("fee_patch", 300).await.unwrap());
    }
}
