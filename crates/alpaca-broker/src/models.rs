use broker_trait::{BrokerAccount, BrokerOrder, BrokerPosition, PortfolioHistory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub account_number: String,
    pub status: String,
    pub currency: String,
    pub equity: String,
    pub last_equity: String,
    pub cash: String,
    pub buying_power: String,
    #[serde(default)]
    pub regt_buying_power: String,
    #[serde(default)]
    pub non_marginable_buying_power: String,
    pub pattern_day_trader: bool,
    pub trading_blocked: bool,
    pub account_blocked: bool,
    pub daytrade_count: i32,
    #[serde(default)]
    pub multiplier: String,
    #[serde(default)]
    pub sma: Option<String>,
    #[serde(default)]
    pub crypto_tier: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlpacaPortfolioHistory {
    #[serde(default)]
    pub equity: Vec<Option<f64>>,
    #[serde(default)]
    pub timestamp: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    #[serde(rename = "stop_limit")]
    StopLimit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderClass {
    Simple,
    Bracket,
    Oco,
    Oto,
}

#[derive(Debug, Clone, Serialize)]
pub struct TakeProfitRequest {
    pub limit_price: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopLossRequest {
    pub stop_price: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_class: Option<OrderClass>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<TakeProfitRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<StopLossRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaceRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: String,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub symbol: String,
    pub asset_class: String,
    #[serde(rename = "qty")]
    pub quantity: Option<String>,
    #[serde(rename = "filled_qty")]
    pub filled_quantity: Option<String>,
    pub filled_avg_price: Option<String>,
    pub order_type: String,
    pub side: String,
    pub time_in_force: String,
    pub limit_price: Option<String>,
    pub stop_price: Option<String>,
    pub status: String,
    #[serde(default)]
    pub commission: Option<String>,
    #[serde(default)]
    pub legs: Option<Vec<Order>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Position {
    pub symbol: String,
    pub asset_class: String,
    pub avg_entry_price: String,
    pub qty: String,
    pub side: String,
    pub market_value: String,
    pub unrealized_pl: String,
    pub current_price: String,
}

// ---------------------------------------------------------------------------
// Conversion helpers: Alpaca wire types -> unified Broker types
// ---------------------------------------------------------------------------

pub fn account_to_broker(a: Account) -> BrokerAccount {
    BrokerAccount {
        id: a.id,
        status: a.status,
        currency: a.currency,
        equity: a.equity,
        last_equity: a.last_equity,
        cash: a.cash,
        buying_power: a.buying_power,
        regt_buying_power: a.regt_buying_power,
        non_marginable_buying_power: a.non_marginable_buying_power,
        pattern_day_trader: a.pattern_day_trader,
        daytrade_count: a.daytrade_count,
        multiplier: a.multiplier,
        sma: a.sma,
        crypto_tier: a.crypto_tier,
    }
}

pub fn history_to_broker(h: AlpacaPortfolioHistory) -> PortfolioHistory {
    PortfolioHistory {
        equity: h.equity.into_iter().flatten().collect(),
        timestamp: h.timestamp,
    }
}

pub fn position_to_broker(p: Position) -> BrokerPosition {
    BrokerPosition {
        symbol: p.symbol,
        asset_class: p.asset_class,
        qty: p.qty,
        side: p.side,
        avg_entry_price: p.avg_entry_price,
        market_value: p.market_value,
        unrealized_pl: p.unrealized_pl,
        current_price: p.current_price,
    }
}

pub fn order_to_broker(o: Order) -> BrokerOrder {
    BrokerOrder {
        id: o.id,
        client_order_id: o.client_order_id,
        symbol: o.symbol,
        side: o.side,
        order_type: o.order_type,
        status: o.status,
        created_at: o.created_at,
        filled_at: o.filled_at,
        qty: o.quantity,
        filled_qty: o.filled_quantity,
        filled_avg_price: o.filled_avg_price,
        limit_price: o.limit_price,
        stop_price: o.stop_price,
        commission: o.commission.and_then(|c| c.parse().ok()),
        legs: o
            .legs
            .unwrap_or_default()
            .into_iter()
            .map(order_to_broker)
            .collect(),
    }
}
