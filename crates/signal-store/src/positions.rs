use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use signal_core::{AssetClass, ExitReason, OrderSide, Position, TradeStatus, TradeType};
use sqlx::any::AnyRow;
use sqlx::Row;

/// Persistence for broker positions, keyed by `position_id` (= signal_id).
/// Saves are upserts so a retried submission never duplicates a position.
pub struct PositionRepository {
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

fn parse_utc(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow!("bad timestamp {s}: {e}"))?
        .with_timezone(&Utc))
}

fn row_to_position(row: &AnyRow) -> Result<Position> {
    let ds: String = row.try_get("ds")?;
    let asset_class: String = row.try_get("asset_class")?;
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    let trade_type: String = row.try_get("trade_type")?;
    let filled_at: Option<String> = row.try_get("filled_at")?;
    let exit_time: Option<String> = row.try_get("exit_time")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    let scale_outs_json: String = row.try_get("scaled_out_prices")?;
    let breakeven: i64 = row.try_get("breakeven_applied")?;
    let backfill: i64 = row.try_get("awaiting_backfill")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Position {
        position_id: row.try_get("position_id")?,
        signal_id: row.try_get("signal_id")?,
        ds: NaiveDate::parse_from_str(&ds, "%Y-%m-%d")?,
        symbol: row.try_get("symbol")?,
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
        status: TradeStatus::from_str(&status)
            .ok_or_else(|| anyhow!("unknown trade status {status}"))?,
        trade_type: TradeType::from_str(&trade_type)
            .ok_or_else(|| anyhow!("unknown trade type {trade_type}"))?,
        qty: row.try_get("qty")?,
        original_qty: row.try_get("original_qty")?,
        target_entry_price: row.try_get("target_entry_price")?,
        entry_fill_price: row.try_get("entry_fill_price")?,
        entry_slippage_pct: row.try_get("entry_slippage_pct")?,
        filled_at: filled_at.as_deref().map(parse_utc).transpose()?,
        current_stop_loss: row.try_get("current_stop_loss")?,
        alpaca_order_id: row.try_get("alpaca_order_id")?,
        tp_order_id: row.try_get("tp_order_id")?,
        sl_order_id: row.try_get("sl_order_id")?,
        exit_order_id: row.try_get("exit_order_id")?,
        exit_fill_price: row.try_get("exit_fill_price")?,
        exit_slippage_pct: row.try_get("exit_slippage_pct")?,
        exit_time: exit_time.as_deref().map(parse_utc).transpose()?,
        exit_reason: exit_reason.as_deref().and_then(exit_reason_from_str),
        scaled_out_qty: row.try_get("scaled_out_qty")?,
        scaled_out_prices: serde_json::from_str(&scale_outs_json)?,
        breakeven_applied: breakeven != 0,
        awaiting_backfill: backfill != 0,
        trailing_stop_final: row.try_get("trailing_stop_final")?,
        commission: row.try_get("commission")?,
        trade_duration_seconds: row.try_get("trade_duration_seconds")?,
        realized_pnl_usd: row.try_get("realized_pnl_usd")?,
        realized_pnl_pct: row.try_get("realized_pnl_pct")?,
        rejection_reason: row.try_get("rejection_reason")?,
        failed_reason: row.try_get("failed_reason")?,
        discord_thread_id: row.try_get("discord_thread_id")?,
        created_at: parse_utc(&created_at)?,
    })
}

const POSITION_COLUMNS: &str = "position_id, signal_id, ds, symbol, asset_class, side, status,
    trade_type, qty, original_qty, target_entry_price, entry_fill_price,
    entry_slippage_pct, filled_at, current_stop_loss, alpaca_order_id,
    tp_order_id, sl_order_id, exit_order_id, exit_fill_price,
    exit_slippage_pct, exit_time, exit_reason, scaled_out_qty,
    scaled_out_prices, breakeven_applied, awaiting_backfill,
    trailing_stop_final, commission, trade_duration_seconds,
    realized_pnl_usd, realized_pnl_pct, rejection_reason, failed_reason,
    discord_thread_id, created_at";

impl PositionRepository {
    pub fn new(pool: sqlx::AnyPool, environment: &str) -> Self {
        Self {
            pool,
            prefix: crate::table_prefix(environment).to_string(),
        }
    }

    fn table(&self) -> String {
        format!("{}positions", self.prefix)
    }

    fn theoretical_table(&self) -> String {
        format!("{}theoretical_positions", self.prefix)
    }

    async fn create_position_table(&self, table: &str) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                position_id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL,
                ds TEXT NOT NULL,
                symbol TEXT NOT NULL,
                asset_class TEXT NOT NULL,
                side TEXT NOT NULL,
                status TEXT NOT NULL,
                trade_type TEXT NOT NULL,
                qty REAL NOT NULL,
                original_qty REAL,
                target_entry_price REAL NOT NULL,
                entry_fill_price REAL,
                entry_slippage_pct REAL,
                filled_at TEXT,
                current_stop_loss REAL,
                alpaca_order_id TEXT,
                tp_order_id TEXT,
                sl_order_id TEXT,
                exit_order_id TEXT,
                exit_fill_price REAL,
                exit_slippage_pct REAL,
                exit_time TEXT,
                exit_reason TEXT,
                scaled_out_qty REAL NOT NULL DEFAULT 0,
                scaled_out_prices TEXT NOT NULL DEFAULT '[]',
                breakeven_applied INTEGER NOT NULL DEFAULT 0,
                awaiting_backfill INTEGER NOT NULL DEFAULT 0,
                trailing_stop_final REAL,
                commission REAL,
                trade_duration_seconds INTEGER,
                realized_pnl_usd REAL,
                realized_pnl_pct REAL,
                rejection_reason TEXT,
                failed_reason TEXT,
                discord_thread_id TEXT,
                created_at TEXT NOT NULL
            )",
            table
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn init_tables(&self) -> Result<()> {
        self.create_position_table(&self.table()).await?;
        self.create_position_table(&self.theoretical_table()).await
    }

    async fn upsert_into(&self, table: &str, position: &Position) -> Result<()> {
        let placeholders = vec!["?"; 36].join(", ");
        let query = format!(
            "INSERT INTO {table} ({POSITION_COLUMNS}) VALUES ({placeholders})
             ON CONFLICT (position_id) DO UPDATE SET
                status = excluded.status,
                qty = excluded.qty,
                original_qty = excluded.original_qty,
                entry_fill_price = excluded.entry_fill_price,
                entry_slippage_pct = excluded.entry_slippage_pct,
                filled_at = excluded.filled_at,
                current_stop_loss = excluded.current_stop_loss,
                tp_order_id = excluded.tp_order_id,
                sl_order_id = excluded.sl_order_id,
                exit_order_id = excluded.exit_order_id,
                exit_fill_price = excluded.exit_fill_price,
                exit_slippage_pct = excluded.exit_slippage_pct,
                exit_time = excluded.exit_time,
                exit_reason = excluded.exit_reason,
                scaled_out_qty = excluded.scaled_out_qty,
                scaled_out_prices = excluded.scaled_out_prices,
                breakeven_applied = excluded.breakeven_applied,
                awaiting_backfill = excluded.awaiting_backfill,
                trailing_stop_final = excluded.trailing_stop_final,
                commission = excluded.commission,
                trade_duration_seconds = excluded.trade_duration_seconds,
                realized_pnl_usd = excluded.realized_pnl_usd,
                realized_pnl_pct = excluded.realized_pnl_pct,
                rejection_reason = excluded.rejection_reason,
                failed_reason = excluded.failed_reason,
                discord_thread_id = excluded.discord_thread_id"
        );

        sqlx::query(&query)
            .bind(&position.position_id)
            .bind(&position.signal_id)
            .bind(position.ds.format("%Y-%m-%d").to_string())
            .bind(&position.symbol)
            .bind(position.asset_class.as_str())
            .bind(position.side.as_str())
            .bind(position.status.as_str())
            .bind(position.trade_type.as_str())
            .bind(position.qty)
            .bind(position.original_qty)
            .bind(position.target_entry_price)
            .bind(position.entry_fill_price)
            .bind(position.entry_slippage_pct)
            .bind(position.filled_at.map(|t| t.to_rfc3339()))
            .bind(position.current_stop_loss)
            .bind(&position.alpaca_order_id)
            .bind(&position.tp_order_id)
            .bind(&position.sl_order_id)
            .bind(&position.exit_order_id)
            .bind(position.exit_fill_price)
            .bind(position.exit_slippage_pct)
            .bind(position.exit_time.map(|t| t.to_rfc3339()))
            .bind(position.exit_reason.map(|r| r.as_str()))
            .bind(position.scaled_out_qty)
            .bind(serde_json::to_string(&position.scaled_out_prices)?)
            .bind(position.breakeven_applied as i64)
            .bind(position.awaiting_backfill as i64)
            .bind(position.trailing_stop_final)
            .bind(position.commission)
            .bind(position.trade_duration_seconds)
            .bind(position.realized_pnl_usd)
            .bind(position.realized_pnl_pct)
            .bind(&position.rejection_reason)
            .bind(&position.failed_reason)
            .bind(&position.discord_thread_id)
            .bind(position.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn save(&self, position: &Position) -> Result<()> {
        self.upsert_into(&self.table(), position).await
    }

    /// Simulated trades live in their own collection so broker reconciliation
    /// never sees them.
    pub async fn save_theoretical(&self, position: &Position) -> Result<()> {
        self.upsert_into(&self.theoretical_table(), position).await
    }

    pub async fn update_position(&self, position: &Position) -> Result<()> {
        self.upsert_into(&self.table(), position).await
    }

    pub async fn get_position(&self, position_id: &str) -> Result<Option<Position>> {
        let query = format!("SELECT * FROM {} WHERE position_id = ?", self.table());
        let row = sqlx::query(&query)
            .bind(position_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_position).transpose()
    }

    pub async fn get_open_positions(&self) -> Result<Vec<Position>> {
        let query = format!(
            "SELECT * FROM {} WHERE status = 'OPEN' ORDER BY created_at ASC",
            self.table()
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_position).collect()
    }

    pub async fn get_open_position_by_symbol(&self, symbol: &str) -> Result<Option<Position>> {
        let query = format!(
            "SELECT * FROM {} WHERE symbol = ? AND status = 'OPEN'
             ORDER BY created_at DESC LIMIT 1",
            self.table()
        );
        let row = sqlx::query(&query)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_position).transpose()
    }

    pub async fn get_closed_positions(&self, limit: i64) -> Result<Vec<Position>> {
        let query = format!(
            "SELECT * FROM {} WHERE status = 'CLOSED' ORDER BY exit_time DESC LIMIT ?",
            self.table()
        );
        let rows = sqlx::query(&query).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_position).collect()
    }

    pub async fn delete_positions(&self, position_ids: &[String]) -> Result<u64> {
        let mut deleted = 0u64;
        for id in position_ids {
            let query = format!("DELETE FROM {} WHERE position_id = ?", self.table());
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
    use signal_core::ScaleOut;

    fn sample_position(id: &str, symbol: &str) -> Position {
        Position {
            position_id: id.to_string(),
            signal_id: id.to_string(),
            ds: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            symbol: symbol.to_string(),
            asset_class: AssetClass::Crypto,
            side: OrderSide::Buy,
            status: TradeStatus::Open,
            trade_type: TradeType::Executed,
            qty: 1.5,
            original_qty: None,
            target_entry_price: 100.0,
            entry_fill_price: Some(100.2),
            entry_slippage_pct: Some(0.2),
            filled_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 5, 0).unwrap()),
            current_stop_loss: Some(95.0),
            alpaca_order_id: Some("ord-1".into()),
            tp_order_id: None,
            sl_order_id: None,
            exit_order_id: None,
            exit_fill_price: None,
            exit_slippage_pct: None,
            exit_time: None,
            exit_reason: None,
            scaled_out_qty: 0.0,
            scaled_out_prices: vec![],
            breakeven_applied: false,
            awaiting_backfill: false,
            trailing_stop_final: None,
            commission: None,
            trade_duration_seconds: None,
            realized_pnl_usd: None,
            realized_pnl_pct: None,
            rejection_reason: None,
            failed_reason: None,
            discord_thread_id: None,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        }
    }

    async fn setup() -> PositionRepository {
        let repo = PositionRepository::new(crate::test_pool().await, "TEST");
        repo.init_tables().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn save_round_trips_with_scale_outs() {
        let repo = setup().await;
        let mut position = sample_position("pos-1", "BTC/USD");
        position.original_qty = Some(1.5);
        position.scaled_out_qty = 0.75;
        position.scaled_out_prices = vec![ScaleOut {
            qty: 0.75,
            price: 108.0,
            ts: Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap(),
            order_id: Some("scale-1".into()),
        }];
        repo.save(&position).await.unwrap();

        let loaded = repo.get_position("pos-1").await.unwrap().unwrap();
        assert_eq!(loaded.scaled_out_prices.len(), 1);
        assert_eq!(loaded.scaled_out_prices[0].price, 108.0);
        assert_eq!(loaded.original_qty, Some(1.5));
        assert_eq!(loaded.trade_type, TradeType::Executed);
    }

    #[tokio::test]
    async fn save_is_an_upsert_keyed_by_position_id() {
        let repo = setup().await;
        let mut position = sample_position("pos-1", "BTC/USD");
        repo.save(&position).await.unwrap();

        position.status = TradeStatus::Closed;
        position.exit_fill_price = Some(120.0);
        position.exit_reason = Some(ExitReason::TpHit);
        repo.save(&position).await.unwrap();

        let all_open = repo.get_open_positions().await.unwrap();
        assert!(all_open.is_empty());

        let loaded = repo.get_position("pos-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, TradeStatus::Closed);
        assert_eq!(loaded.exit_fill_price, Some(120.0));
        assert_eq!(loaded.exit_reason, Some(ExitReason::TpHit));
    }

    #[tokio::test]
    async fn theoretical_positions_live_apart() {
        let repo = setup().await;
        let mut theo = sample_position("pos-theo", "ETH/USD");
        theo.trade_type = TradeType::Theoretical;
        repo.save_theoretical(&theo).await.unwrap();

        // Not visible to the operational open-position queries
        assert!(repo.get_open_positions().await.unwrap().is_empty());
        assert!(repo
            .get_open_position_by_symbol("ETH/USD")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn open_lookup_by_symbol() {
        let repo = setup().await;
        repo.save(&sample_position("pos-1", "BTC/USD")).await.unwrap();

        assert!(repo
            .get_open_position_by_symbol("BTC/USD")
            .await
            .unwrap()
            .is_some());
        assert!(repo
            .get_open_position_by_symbol("ETH/USD")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn closed_positions_and_cleanup() {
        let repo = setup().await;
        let mut position = sample_position("pos-1", "BTC/USD");
        position.status = TradeStatus::Closed;
        position.exit_time = Some(Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap());
        repo.save(&position).await.unwrap();

        let closed = repo.get_closed_positions(10).await.unwrap();
        assert_eq!(closed.len(), 1);

        let deleted = repo.delete_positions(&["pos-1".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get_closed_positions(10).await.unwrap().is_empty());
    }
}
