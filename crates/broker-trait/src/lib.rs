use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Unified broker types (broker-agnostic)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerAccount {
    pub id: String,
    pub status: String,
    pub currency: String,
    pub equity: String,
    pub last_equity: String,
    pub cash: String,
    pub buying_power: String,
    pub regt_buying_power: String,
    pub non_marginable_buying_power: String,
    pub pattern_day_trader: bool,
    pub daytrade_count: i32,
    pub multiplier: String,
    pub sma: Option<String>,
    pub crypto_tier: Option<i32>,
}

impl BrokerAccount {
    pub fn equity_f64(&self) -> f64 {
        self.equity.parse().unwrap_or(0.0)
    }
    pub fn last_equity_f64(&self) -> f64 {
        self.last_equity.parse().unwrap_or(0.0)
    }
    pub fn cash_f64(&self) -> f64 {
        self.cash.parse().unwrap_or(0.0)
    }
    pub fn regt_buying_power_f64(&self) -> f64 {
        self.regt_buying_power.parse().unwrap_or(0.0)
    }
    pub fn non_marginable_buying_power_f64(&self) -> f64 {
        self.non_marginable_buying_power.parse().unwrap_or(0.0)
    }
}

/// Equity curve returned by the portfolio-history endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioHistory {
    pub equity: Vec<f64>,
    pub timestamp: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub asset_class: String,
    pub qty: String,
    pub side: String,
    pub avg_entry_price: String,
    pub market_value: String,
    pub unrealized_pl: String,
    pub current_price: String,
}

impl BrokerPosition {
    pub fn qty_f64(&self) -> f64 {
        self.qty.parse().unwrap_or(0.0)
    }
    pub fn avg_entry_price_f64(&self) -> f64 {
        self.avg_entry_price.parse().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerOrderSide {
    Buy,
    Sell,
}

impl BrokerOrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerOrderSide::Buy => "buy",
            BrokerOrderSide::Sell => "sell",
        }
    }
}

/// Take-profit leg of a bracket order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitSpec {
    pub limit_price: f64,
}

/// Stop-loss leg of a bracket order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossSpec {
    pub stop_price: f64,
}

/// Order submission request. A request with both `take_profit` and
/// `stop_loss` set is a bracket (parent market + TP limit + SL stop, GTC);
/// without them it is a simple market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrderRequest {
    pub symbol: String,
    pub qty: f64,
    pub side: BrokerOrderSide,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<TakeProfitSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<StopLossSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

impl BrokerOrderRequest {
    pub fn market(symbol: impl Into<String>, qty: f64, side: BrokerOrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            take_profit: None,
            stop_loss: None,
            client_order_id: None,
        }
    }

    pub fn bracket(
        symbol: impl Into<String>,
        qty: f64,
        side: BrokerOrderSide,
        take_profit: f64,
        stop_loss: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            take_profit: Some(TakeProfitSpec {
                limit_price: take_profit,
            }),
            stop_loss: Some(StopLossSpec {
                stop_price: stop_loss,
            }),
            client_order_id: None,
        }
    }

    pub fn with_client_order_id(mut self, id: impl Into<String>) -> Self {
        self.client_order_id = Some(id.into());
        self
    }

    pub fn is_bracket(&self) -> bool {
        self.take_profit.is_some() && self.stop_loss.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub qty: Option<String>,
    pub filled_qty: Option<String>,
    pub filled_avg_price: Option<String>,
    pub limit_price: Option<String>,
    pub stop_price: Option<String>,
    pub commission: Option<f64>,
    /// TP/SL legs when this is a bracket parent
    #[serde(default)]
    pub legs: Vec<BrokerOrder>,
}

impl BrokerOrder {
    pub fn filled_avg_price_f64(&self) -> Option<f64> {
        self.filled_avg_price.as_ref().and_then(|p| p.parse().ok())
    }
    pub fn filled_qty_f64(&self) -> Option<f64> {
        self.filled_qty.as_ref().and_then(|q| q.parse().ok())
    }
    pub fn is_filled(&self) -> bool {
        self.status.eq_ignore_ascii_case("filled")
    }
}

/// Replacement request for an existing order (stop trailing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceOrderRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// "open" | "closed" | "all"
    pub status: Option<String>,
    pub symbols: Vec<String>,
    pub side: Option<BrokerOrderSide>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityFilter {
    /// Activity type, e.g. "CFEE"
    pub activity_type: Option<String>,
    pub after: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

/// Broker capability set required by the engine.
///
/// 404 responses on position and order lookups are "no such entity", never
/// errors; implementations return `Ok(None)` for those.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_account(&self) -> Result<BrokerAccount>;

    async fn get_portfolio_history(
        &self,
        period: &str,
        timeframe: &str,
    ) -> Result<PortfolioHistory>;

    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>>;

    /// 404 -> Ok(None)
    async fn get_open_position(&self, symbol: &str) -> Result<Option<BrokerPosition>>;

    /// Idempotent when `client_order_id` is set: a retry with the same id
    /// returns the original order instead of creating a duplicate.
    async fn submit_order(&self, request: BrokerOrderRequest) -> Result<BrokerOrder>;

    /// 404 -> Ok(None)
    async fn get_order_by_id(&self, order_id: &str) -> Result<Option<BrokerOrder>>;

    /// 404 -> Ok(None)
    async fn get_order_by_client_order_id(&self, client_order_id: &str)
        -> Result<Option<BrokerOrder>>;

    async fn get_orders(&self, filter: OrderFilter) -> Result<Vec<BrokerOrder>>;

    async fn replace_order_by_id(
        &self,
        order_id: &str,
        request: ReplaceOrderRequest,
    ) -> Result<BrokerOrder>;

    async fn cancel_order_by_id(&self, order_id: &str) -> Result<()>;

    /// Raw activity records (fee reconciliation). Missing activities are an
    /// empty list, not an error.
    async fn get_activities(&self, filter: ActivityFilter) -> Result<Vec<serde_json::Value>>;

    fn is_paper(&self) -> bool;

    fn broker_name(&self) -> &str;
}
