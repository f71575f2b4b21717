use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use signal_core::{
    AssetClass, ExitReason, OrderSide, PatternClassification, RejectedSignal, Signal, SignalPatch,
    SignalStatus,
};
use sqlx::any::AnyRow;
use sqlx::Row;

/// Idempotent persistence for signals, keyed by `signal_id`.
pub struct SignalRepository {
    pool: sqlx::AnyPool,
    prefix: String,
}

fn exit_reason_from_str(s: &str) -> Option<ExitReason> {
    match s {
        "STRUCTURAL_INVALIDATION" => Some(ExitReason::StructuralInvalidation),
        "BEARISH_ENGULFING" => Some(ExitReason::BearishEngulfing),
        "RSI_OVERBOUGHT" => Some(ExitReason::RsiOverbought),
        "ADX_PEAK" => Some(ExitReason::AdxPeak),
        "TP1" => Some(ExitReason::Tp1),
        "TP2" => Some(ExitReason::Tp2),
        "TP_HIT" => Some(ExitReason::TpHit),
        "STOP_LOSS" => Some(ExitReason::StopLoss),
        "MANUAL_EXIT" => Some(ExitReason::ManualExit),
        "EMERGENCY_CLOSE" => Some(ExitReason::EmergencyClose),
        "EXPIRED" => Some(ExitReason::Expired),
        _ => None,
    }
}

fn classification_from_str(s: &str) -> Option<PatternClassification> {
    match s {
        "STANDARD_PATTERN" => Some(PatternClassification::StandardPattern),
        "MACRO_PATTERN" => Some(PatternClassification::MacroPattern),
        "HARMONIC_PATTERN" => Some(PatternClassification::HarmonicPattern),
        "MACRO_HARMONIC" => Some(PatternClassification::MacroHarmonic),
        _ => None,
    }
}

fn parse_utc(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow!("bad timestamp {s}: {e}"))?
        .with_timezone(&Utc))
}

pub(crate) fn row_to_signal(row: &AnyRow) -> Result<Signal> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    let asset_class: String = row.try_get("asset_class")?;
    let ds: String = row.try_get("ds")?;
    let created_at: String = row.try_get("created_at")?;
    let valid_until: String = row.try_get("valid_until")?;
    let delete_at: Option<String> = row.try_get("delete_at")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    let classification: Option<String> = row.try_get("pattern_classification")?;
    let anchors_json: String = row.try_get("structural_anchors")?;
    let harmonic_json: Option<String> = row.try_get("harmonic_metadata")?;
    let factors_json: String = row.try_get("confluence_factors")?;
    let snapshot_json: String = row.try_get("confluence_snapshot")?;

    Ok(Signal {
        signal_id: row.try_get("signal_id")?,
        strategy_id: row.try_get("strategy_id")?,
        symbol: row.try_get("symbol")?,
        ds: NaiveDate::parse_from_str(&ds, "%Y-%m-%d")?,
        asset_class: if asset_class == "CRYPTO" {
            AssetClass::Crypto
        } else {
            AssetClass::Equity
        },
        side: if side == "SELL" {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        },
        pattern_name: row.try_get("pattern_name")?,
        status: SignalStatus::from_str(&status)
            .ok_or_else(|| anyhow!("unknown signal status {status}"))?,
        entry_price: row.try_get("entry_price")?,
        suggested_stop: row.try_get("suggested_stop")?,
        invalidation_price: row.try_get("invalidation_price")?,
        take_profit_1: row.try_get("take_profit_1")?,
        take_profit_2: row.try_get("take_profit_2")?,
        take_profit_3: row.try_get("take_profit_3")?,
        pattern_duration_days: row.try_get("pattern_duration_days")?,
        pattern_span_days: row.try_get("pattern_span_days")?,
        pattern_classification: classification.as_deref().and_then(classification_from_str),
        structural_anchors: serde_json::from_str(&anchors_json)?,
        harmonic_metadata: harmonic_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        confluence_factors: serde_json::from_str(&factors_json)?,
        confluence_snapshot: serde_json::from_str(&snapshot_json)?,
        exit_reason: exit_reason.as_deref().and_then(exit_reason_from_str),
        created_at: parse_utc(&created_at)?,
        valid_until: parse_utc(&valid_until)?,
        delete_at: delete_at.as_deref().map(parse_utc).transpose()?,
        discord_thread_id: row.try_get("discord_thread_id")?,
        tp3_last_notified: row.try_get("tp3_last_notified")?,
    })
}

impl SignalRepository {
    pub fn new(pool: sqlx::AnyPool, environment: &str) -> Self {
        Self {
            pool,
            prefix: crate::table_prefix(environment).to_string(),
        }
    }

    fn table(&self) -> String {
        format!("{}signals", self.prefix)
    }

    fn rejected_table(&self) -> String {
        format!("{}rejected_signals", self.prefix)
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                signal_id TEXT PRIMARY KEY,
                strategy_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                ds TEXT NOT NULL,
                asset_class TEXT NOT NULL,
                side TEXT NOT NULL,
                pattern_name TEXT NOT NULL,
                status TEXT NOT NULL,
                entry_price REAL NOT NULL,
                suggested_stop REAL NOT NULL,
                invalidation_price REAL,
                take_profit_1 REAL,
                take_profit_2 REAL,
                take_profit_3 REAL,
                pattern_duration_days INTEGER,
                pattern_span_days INTEGER,
                pattern_classification TEXT,
                structural_anchors TEXT NOT NULL DEFAULT '[]',
                harmonic_metadata TEXT,
                confluence_factors TEXT NOT NULL DEFAULT '[]',
                confluence_snapshot TEXT NOT NULL DEFAULT '{{}}',
                exit_reason TEXT,
                created_at TEXT NOT NULL,
                valid_until TEXT NOT NULL,
                delete_at TEXT,
                discord_thread_id TEXT,
                tp3_last_notified REAL,
                closed_at TEXT
            )",
            self.table()
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                signal_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                ds TEXT NOT NULL,
                payload TEXT NOT NULL,
                rejection_reason TEXT NOT NULL,
                rejected_at TEXT NOT NULL
            )",
            self.rejected_table()
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert keyed by signal_id; saving the same signal twice is a no-op.
    pub async fn save(&self, signal: &Signal) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (
                signal_id, strategy_id, symbol, ds, asset_class, side,
                pattern_name, status, entry_price, suggested_stop,
                invalidation_price, take_profit_1, take_profit_2, take_profit_3,
                pattern_duration_days, pattern_span_days, pattern_classification,
                structural_anchors, harmonic_metadata, confluence_factors,
                confluence_snapshot, exit_reason, created_at, valid_until,
                delete_at, discord_thread_id, tp3_last_notified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (signal_id) DO NOTHING",
            self.table()
        );

        sqlx::query(&query)
            .bind(&signal.signal_id)
            .bind(&signal.strategy_id)
            .bind(&signal.symbol)
            .bind(signal.ds.format("%Y-%m-%d").to_string())
            .bind(signal.asset_class.as_str())
            .bind(signal.side.as_str())
            .bind(&signal.pattern_name)
            .bind(signal.status.as_str())
            .bind(signal.entry_price)
            .bind(signal.suggested_stop)
            .bind(signal.invalidation_price)
            .bind(signal.take_profit_1)
            .bind(signal.take_profit_2)
            .bind(signal.take_profit_3)
            .bind(signal.pattern_duration_days)
            .bind(signal.pattern_span_days)
            .bind(signal.pattern_classification.map(|c| c.as_str()))
            .bind(serde_json::to_string(&signal.structural_anchors)?)
            .bind(
                signal
                    .harmonic_metadata
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(serde_json::to_string(&signal.confluence_factors)?)
            .bind(serde_json::to_string(&signal.confluence_snapshot)?)
            .bind(signal.exit_reason.map(|r| r.as_str()))
            .bind(signal.created_at.to_rfc3339())
            .bind(signal.valid_until.to_rfc3339())
            .bind(signal.delete_at.map(|d| d.to_rfc3339()))
            .bind(&signal.discord_thread_id)
            .bind(signal.tp3_last_notified)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Write only the fields set on the patch.
    pub async fn update_signal_atomic(&self, signal_id: &str, patch: &SignalPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut sets: Vec<String> = Vec::new();
        let mut strings: Vec<Option<String>> = Vec::new();
        let mut floats: Vec<f64> = Vec::new();

        // Two passes: string-typed fields first, float-typed after, so bind
        // order matches the generated placeholders.
        if let Some(status) = patch.status {
            sets.push("status = ?".into());
            strings.push(Some(status.as_str().to_string()));
        }
        if let Some(reason) = patch.exit_reason {
            sets.push("exit_reason = ?".into());
            strings.push(Some(reason.as_str().to_string()));
        }
        if let Some(thread_id) = &patch.discord_thread_id {
            sets.push("discord_thread_id = ?".into());
            strings.push(Some(thread_id.clone()));
        }
        if let Some(closed_at) = patch.closed_at {
            sets.push("closed_at = ?".into());
            strings.push(Some(closed_at.to_rfc3339()));
        }
        if let Some(stop) = patch.suggested_stop {
            sets.push("suggested_stop = ?".into());
            floats.push(stop);
        }
        if let Some(tp3) = patch.take_profit_3 {
            sets.push("take_profit_3 = ?".into());
            floats.push(tp3);
        }
        if let Some(notified) = patch.tp3_last_notified {
            sets.push("tp3_last_notified = ?".into());
            floats.push(notified);
        }

        let query = format!(
            "UPDATE {} SET {} WHERE signal_id = ?",
            self.table(),
            sets.join(", ")
        );

        let mut q = sqlx::query(&query);
        for s in strings {
            q = q.bind(s);
        }
        for f in floats {
            q = q.bind(f);
        }
        q = q.bind(signal_id);
        q.execute(&self.pool).await?;

        Ok(())
    }

    pub async fn get_signal(&self, signal_id: &str) -> Result<Option<Signal>> {
        let query = format!("SELECT * FROM {} WHERE signal_id = ?", self.table());
        let row = sqlx::query(&query)
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_signal).transpose()
    }

    /// Signals still advancing through the lifecycle for a symbol
    pub async fn get_active_signals(&self, symbol: &str) -> Result<Vec<Signal>> {
        let query = format!(
            "SELECT * FROM {} WHERE symbol = ? AND status IN ('WAITING', 'TP1_HIT', 'TP2_HIT')
             ORDER BY created_at ASC",
            self.table()
        );
        let rows = sqlx::query(&query)
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_signal).collect()
    }

    pub async fn get_signals_by_status(
        &self,
        status: SignalStatus,
        limit: i64,
    ) -> Result<Vec<Signal>> {
        let query = format!(
            "SELECT * FROM {} WHERE status = ? ORDER BY created_at ASC LIMIT ?",
            self.table()
        );
        let rows = sqlx::query(&query)
            .bind(status.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_signal).collect()
    }

    /// Timestamp of the most recent terminal signal for the symbol; feeds the
    /// per-symbol cooldown.
    pub async fn get_most_recent_exit(&self, symbol: &str) -> Result<Option<DateTime<Utc>>> {
        let query = format!(
            "SELECT closed_at FROM {} WHERE symbol = ? AND closed_at IS NOT NULL
             ORDER BY closed_at DESC LIMIT 1",
            self.table()
        );
        let row = sqlx::query(&query)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let closed_at: Option<String> = r.try_get("closed_at")?;
                closed_at.as_deref().map(parse_utc).transpose()
            }
            None => Ok(None),
        }
    }

    pub async fn delete_signals(&self, signal_ids: &[String]) -> Result<u64> {
        let mut deleted = 0u64;
        for id in signal_ids {
            let query = format!("DELETE FROM {} WHERE signal_id = ?", self.table());
            let result = sqlx::query(&query).bind(id).execute(&self.pool).await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }

    // -- shadow signals -----------------------------------------------------

    pub async fn save_rejected(&self, rejected: &RejectedSignal) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (signal_id, symbol, ds, payload, rejection_reason, rejected_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (signal_id) DO NOTHING",
            self.rejected_table()
        );

        sqlx::query(&query)
            .bind(&rejected.signal.signal_id)
            .bind(&rejected.signal.symbol)
            .bind(rejected.signal.ds.format("%Y-%m-%d").to_string())
            .bind(serde_json::to_string(&rejected.signal)?)
            .bind(&rejected.rejection_reason)
            .bind(rejected.rejected_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_rejected_signals(&self, limit: i64) -> Result<Vec<RejectedSignal>> {
        let query = format!(
            "SELECT payload, rejection_reason, rejected_at FROM {} ORDER BY rejected_at ASC LIMIT ?",
            self.rejected_table()
        );
        let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                let rejection_reason: String = row.try_get("rejection_reason")?;
                let rejected_at: String = row.try_get("rejected_at")?;
                Ok(RejectedSignal {
                    signal: serde_json::from_str(&payload)?,
                    rejection_reason,
                    rejected_at: parse_utc(&rejected_at)?,
                })
            })
            .collect()
    }

    pub async fn delete_rejected_signals(&self, signal_ids: &[String]) -> Result<u64> {
        let mut deleted = 0u64;
        for id in signal_ids {
            let query = format!("DELETE FROM {} WHERE signal_id = ?", self.rejected_table());
            let result = sqlx::query(&query).bind(id).execute(&self.pool).await?;
            deleted += result.rows_affected();
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn sample_signal(id: &str, symbol: &str) -> Signal {
        Signal {
            signal_id: id.to_string(),
            strategy_id: "BULLISH_ENGULFING".into(),
            symbol: symbol.to_string(),
            ds: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            asset_class: AssetClass::Crypto,
            side: OrderSide::Buy,
            pattern_name: "BULLISH_ENGULFING".into(),
            status: SignalStatus::Waiting,
            entry_price: 104.0,
            suggested_stop: 99.0,
            invalidation_price: Some(100.0),
            take_profit_1: Some(108.0),
            take_profit_2: Some(112.0),
            take_profit_3: Some(116.0),
            pattern_duration_days: None,
            pattern_span_days: None,
            pattern_classification: Some(PatternClassification::StandardPattern),
            structural_anchors: vec![],
            harmonic_metadata: None,
            confluence_factors: vec!["volume_expansion".into()],
            confluence_snapshot: BTreeMap::from([("close".to_string(), 104.0)]),
            exit_reason: None,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            valid_until: Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap(),
            delete_at: None,
            discord_thread_id: None,
            tp3_last_notified: None,
        }
    }

    async fn setup() -> SignalRepository {
        let repo = SignalRepository::new(crate::test_pool().await, "TEST");
        repo.init_tables().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn save_round_trips() {
        let repo = setup().await;
        let signal = sample_signal("sig-1", "BTC/USD");
        repo.save(&signal).await.unwrap();

        let loaded = repo.get_signal("sig-1").await.unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTC/USD");
        assert_eq!(loaded.status, SignalStatus::Waiting);
        assert_eq!(loaded.entry_price, 104.0);
        assert_eq!(loaded.invalidation_price, Some(100.0));
        assert_eq!(loaded.confluence_snapshot["close"], 104.0);
    }

    #[tokio::test]
    async fn save_twice_is_a_noop() {
        let repo = setup().await;
        let signal = sample_signal("sig-1", "BTC/USD");
        repo.save(&signal).await.unwrap();

        // A second save with mutated fields must not overwrite the original
        let mut mutated = signal.clone();
        mutated.entry_price = 999.0;
        repo.save(&mutated).await.unwrap();

        let loaded = repo.get_signal("sig-1").await.unwrap().unwrap();
        assert_eq!(loaded.entry_price, 104.0);
    }

    #[tokio::test]
    async fn atomic_patch_writes_only_set_fields() {
        let repo = setup().await;
        repo.save(&sample_signal("sig-1", "BTC/USD")).await.unwrap();

        let patch = SignalPatch {
            status: Some(SignalStatus::Tp1Hit),
            suggested_stop: Some(104.0),
            ..Default::default()
        };
        repo.update_signal_atomic("sig-1", &patch).await.unwrap();

        let loaded = repo.get_signal("sig-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, SignalStatus::Tp1Hit);
        assert_eq!(loaded.suggested_stop, 104.0);
        // Untouched fields survive
        assert_eq!(loaded.take_profit_3, Some(116.0));
        assert_eq!(loaded.entry_price, 104.0);
    }

    #[tokio::test]
    async fn active_signals_exclude_terminal_states() {
        let repo = setup().await;
        repo.save(&sample_signal("sig-1", "BTC/USD")).await.unwrap();

        let mut invalidated = sample_signal("sig-2", "BTC/USD");
        invalidated.status = SignalStatus::Invalidated;
        repo.save(&invalidated).await.unwrap();

        let mut tp1 = sample_signal("sig-3", "BTC/USD");
        tp1.status = SignalStatus::Tp1Hit;
        repo.save(&tp1).await.unwrap();

        let active = repo.get_active_signals("BTC/USD").await.unwrap();
        let ids: Vec<&str> = active.iter().map(|s| s.signal_id.as_str()).collect();
        assert!(ids.contains(&"sig-1"));
        assert!(ids.contains(&"sig-3"));
        assert!(!ids.contains(&"sig-2"));
    }

    #[tokio::test]
    async fn most_recent_exit_tracks_closed_at() {
        let repo = setup().await;
        repo.save(&sample_signal("sig-1", "BTC/USD")).await.unwrap();
        assert!(repo.get_most_recent_exit("BTC/USD").await.unwrap().is_none());

        let closed_at = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let patch = SignalPatch {
            status: Some(SignalStatus::Invalidated),
            closed_at: Some(closed_at),
            ..Default::default()
        };
        repo.update_signal_atomic("sig-1", &patch).await.unwrap();

        let exit = repo.get_most_recent_exit("BTC/USD").await.unwrap().unwrap();
        assert_eq!(exit, closed_at);
    }

    #[tokio::test]
    async fn rejected_signals_round_trip() {
        let repo = setup().await;
        let rejected = RejectedSignal {
            signal: sample_signal("sig-shadow", "ETH/USD"),
            rejection_reason: "sector_cap".into(),
            rejected_at: Utc.with_ymd_and_hms(2025, 6, 1, 1, 0, 0).unwrap(),
        };
        repo.save_rejected(&rejected).await.unwrap();

        let loaded = repo.get_rejected_signals(10).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].rejection_reason, "sector_cap");
        assert_eq!(loaded[0].signal.symbol, "ETH/USD");

        let deleted = repo
            .delete_rejected_signals(&["sig-shadow".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get_rejected_signals(10).await.unwrap().is_empty());
    }
}
