use anyhow::Result;
use async_trait::async_trait;
use broker_trait::{
    ActivityFilter, Broker, BrokerAccount, BrokerOrder, BrokerOrderRequest, BrokerPosition,
    OrderFilter, PortfolioHistory, ReplaceOrderRequest,
};
use chrono::{NaiveDate, TimeZone, Utc};
use signal_core::{
    AssetClass, Notifier, OrderSide, Position, Signal, SignalStatus, TradeStatus, TradeType,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct MockBroker {
    /// Open positions reported by the broker
    pub positions: Arc<Mutex<Vec<BrokerPosition>>>,
    /// Orders visible to get_orders / get_order_by_id
    pub orders: Arc<Mutex<Vec<BrokerOrder>>>,
    /// Requests captured from submit_order
    pub submitted: Arc<Mutex<Vec<BrokerOrderRequest>>>,
    /// Order ids passed to cancel_order_by_id
    pub canceled: Arc<Mutex<Vec<String>>>,
    /// Fill price reported on submitted orders; None leaves them unfilled
    pub fill_price: Option<f64>,
    pub crypto_tier: Option<i32>,
}

#[async_trait]
impl Broker for MockBroker {
    async fn get_account(&self) -> Result<BrokerAccount> {
        Ok(BrokerAccount {
            id: "acct".into(),
            status: "ACTIVE".into(),
            currency: "USD".into(),
            equity: "100000".into(),
            last_equity: "100000".into(),
            cash: "50000".into(),
            buying_power: "50000".into(),
            regt_buying_power: "50000".into(),
            non_marginable_buying_power: "50000".into(),
            pattern_day_trader: false,
            daytrade_count: 0,
            multiplier: "2".into(),
            sma: None,
            crypto_tier: self.crypto_tier,
        })
    }

    async fn get_portfolio_history(&self, _: &str, _: &str) -> Result<PortfolioHistory> {
        Ok(PortfolioHistory::default())
    }

    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_open_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.symbol == symbol)
            .cloned())
    }

    async fn submit_order(&self, request: BrokerOrderRequest) -> Result<BrokerOrder> {
        let mut submitted = self.submitted.lock().unwrap();
        let id = format!("mock-ord-{}", submitted.len() + 1);
        submitted.push(request.clone());

        Ok(BrokerOrder {
            id,
            client_order_id: request.client_order_id.unwrap_or_default(),
            symbol: request.symbol,
            side: request.side.as_str().to_string(),
            order_type: "market".into(),
            status: if self.fill_price.is_some() {
                "filled".into()
            } else {
                "new".into()
            },
            created_at: Utc::now(),
            filled_at: self.fill_price.map(|_| Utc::now()),
            qty: Some(request.qty.to_string()),
            filled_qty: self.fill_price.map(|_| request.qty.to_string()),
            filled_avg_price: self.fill_price.map(|p| p.to_string()),
            limit_price: None,
            stop_price: None,
            commission: None,
            legs: vec![],
        })
    }

    async fn get_order_by_id(&self, order_id: &str) -> Result<Option<BrokerOrder>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.id == order_id)
            .cloned())
    }

    async fn get_order_by_client_order_id(&self, client_id: &str) -> Result<Option<BrokerOrder>> {
        Ok(self
            .orders
            .lock()
            .unwrap()
            .iter()
            .find(|o| o.client_order_id == client_id)
            .cloned())
    }

    async fn get_orders(&self, filter: OrderFilter) -> Result<Vec<BrokerOrder>> {
        let orders = self.orders.lock().unwrap();
        Ok(orders
            .iter()
            .filter(|o| filter.symbols.is_empty() || filter.symbols.contains(&o.symbol))
            .filter(|o| {
                filter
                    .side
                    .map(|s| o.side.eq_ignore_ascii_case(s.as_str()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn replace_order_by_id(
        &self,
        order_id: &str,
        request: ReplaceOrderRequest,
    ) -> Result<BrokerOrder> {
        let orders = self.orders.lock().unwrap();
        let original = orders
            .iter()
            .find(|o| o.id == order_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("order not found"))?;

        let mut replaced = original;
        replaced.id = format!("{order_id}-replaced");
        replaced.stop_price = request.stop_price.map(|p| p.to_string());
        Ok(replaced)
    }

    async fn cancel_order_by_id(&self, order_id: &str) -> Result<()> {
        self.canceled.lock().unwrap().push(order_id.to_string());
        Ok(())
    }

    async fn get_activities(&self, _: ActivityFilter) -> Result<Vec<serde_json::Value>> {
        Ok(vec![])
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn broker_name(&self) -> &str {
        "mock"
    }
}

#[derive(Default)]
pub struct MockNotifier {
    pub messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_signal(&self, signal: &Signal) -> Result<Option<String>> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("signal:{}", signal.symbol));
        Ok(Some("thread-1".into()))
    }

    async fn send_message(
        &self,
        content: &str,
        _thread_id: Option<&str>,
        _asset_class: Option<AssetClass>,
    ) -> Result<()> {
        self.messages.lock().unwrap().push(content.to_string());
        Ok(())
    }

    async fn send_trail_update(
        &self,
        signal: &Signal,
        old_tp3: f64,
        _asset_class: Option<AssetClass>,
    ) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("trail:{}:{}", signal.symbol, old_tp3));
        Ok(())
    }

    async fn send_signal_update(&self, signal: &Signal) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("update:{}:{}", signal.symbol, signal.status.as_str()));
        Ok(())
    }

    async fn send_trade_close(
        &self,
        signal: &Signal,
        _position: &Position,
        pnl_usd: f64,
        _pnl_pct: f64,
        _duration: &str,
        exit_reason: &str,
    ) -> Result<()> {
        self.messages.lock().unwrap().push(format!(
            "close:{}:{}:{}",
            signal.symbol, exit_reason, pnl_usd
        ));
        Ok(())
    }

    async fn send_shadow_signal(&self, signal: &Signal, rejection_reason: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push(format!("shadow:{}:{}", signal.symbol, rejection_reason));
        Ok(())
    }
}

pub fn sample_signal(symbol: &str, asset_class: AssetClass) -> Signal {
    Signal {
        signal_id: format!("sig-{}", symbol.replace('/', "-")),
        strategy_id: "BULLISH_ENGULFING".into(),
        symbol: symbol.to_string(),
        ds: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        asset_class,
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
        pattern_classification: None,
        structural_anchors: vec![],
        harmonic_metadata: None,
        confluence_factors: vec![],
        confluence_snapshot: Default::default(),
        exit_reason: None,
        created_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        valid_until: Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap(),
        delete_at: None,
        discord_thread_id: None,
        tp3_last_notified: None,
    }
}

pub fn sample_position(id: &str, symbol: &str, asset_class: AssetClass) -> Position {
    Position {
        position_id: id.to_string(),
        signal_id: id.to_string(),
        ds: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        symbol: symbol.to_string(),
        asset_class,
        side: OrderSide::Buy,
        status: TradeStatus::Open,
        trade_type: TradeType::Executed,
        qty: 1.0,
        original_qty: None,
        target_entry_price: 100.0,
        entry_fill_price: Some(100.0),
        entry_slippage_pct: None,
        filled_at: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 5, 0).unwrap()),
        current_stop_loss: Some(95.0),
        alpaca_order_id: None,
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
        created_at: Utc::now(),
    }
}

pub fn broker_position(symbol: &str, asset_class: &str) -> BrokerPosition {
    BrokerPosition {
        symbol: symbol.to_string(),
        asset_class: asset_class.to_string(),
        qty: "1".into(),
        side: "long".into(),
        avg_entry_price: "100".into(),
        market_value: "100".into(),
        unrealized_pl: "0".into(),
        current_price: "100".into(),
    }
}

pub fn closed_order(id: &str, symbol: &str, side: &str, fill_price: f64) -> BrokerOrder {
    BrokerOrder {
        id: id.to_string(),
        client_order_id: format!("client-{id}"),
        symbol: symbol.to_string(),
        side: side.to_string(),
        order_type: "market".into(),
        status: "filled".into(),
        created_at: Utc::now(),
        filled_at: Some(Utc::now()),
        qty: Some("1".into()),
        filled_qty: Some("1".into()),
        filled_avg_price: Some(fill_price.to_string()),
        limit_price: None,
        stop_price: None,
        commission: None,
        legs: vec![],
    }
}
