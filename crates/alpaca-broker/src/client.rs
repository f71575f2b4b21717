use crate::models::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use broker_trait::{
    ActivityFilter, Broker, BrokerAccount, BrokerOrder, BrokerOrderRequest, BrokerOrderSide,
    BrokerPosition, OrderFilter, PortfolioHistory, ReplaceOrderRequest,
};
use reqwest::{header, Client, StatusCode};
use std::time::Duration;

pub struct AlpacaClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl AlpacaClient {
    pub fn new(api_key: String, secret_key: String, base_url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            secret_key,
        })
    }

    /// Create client from environment variables.
    /// Accepts both APCA_API_KEY_ID / APCA_API_SECRET_KEY (standard names)
    /// and ALPACA_API_KEY / ALPACA_SECRET_KEY as fallbacks.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("APCA_API_KEY_ID")
            .or_else(|_| std::env::var("ALPACA_API_KEY"))
            .map_err(|_| anyhow!("APCA_API_KEY_ID (or ALPACA_API_KEY) not set"))?;
        let secret_key = std::env::var("APCA_API_SECRET_KEY")
            .or_else(|_| std::env::var("ALPACA_SECRET_KEY"))
            .map_err(|_| anyhow!("APCA_API_SECRET_KEY (or ALPACA_SECRET_KEY) not set"))?;
        let base_url = std::env::var("ALPACA_BASE_URL")
            .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string());

        Self::new(api_key, secret_key, base_url)
    }

    fn auth_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            header::HeaderValue::from_str(&self.api_key)
                .expect("API key contains invalid header characters"),
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            header::HeaderValue::from_str(&self.secret_key)
                .expect("Secret key contains invalid header characters"),
        );
        headers
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get_account(&self) -> Result<Account> {
        let url = format!("{}/v2/account", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Alpaca API error: {}", error_text));
        }

        Ok(response.json::<Account>().await?)
    }

    pub async fn get_portfolio_history(
        &self,
        period: &str,
        timeframe: &str,
    ) -> Result<AlpacaPortfolioHistory> {
        let url = format!(
            "{}/v2/account/portfolio/history?period={}&timeframe={}",
            self.base_url, period, timeframe
        );

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get portfolio history: {}", error_text));
        }

        Ok(response.json::<AlpacaPortfolioHistory>().await?)
    }

    pub async fn submit_order(&self, order: OrderRequest) -> Result<Order> {
        let url = format!("{}/v2/orders", self.base_url);

        tracing::info!("Submitting order to Alpaca: {:?}", order);

        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .json(&order)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Alpaca order failed: {}", error_text));
        }

        let order_response = response.json::<Order>().await?;
        tracing::info!("Order submitted successfully: {}", order_response.id);
        Ok(order_response)
    }

    /// 404 -> Ok(None)
    pub async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get order: {}", error_text));
        }

        Ok(Some(response.json::<Order>().await?))
    }

    /// 404 -> Ok(None)
    pub async fn get_order_by_client_id(&self, client_order_id: &str) -> Result<Option<Order>> {
        let url = format!(
            "{}/v2/orders:by_client_order_id?client_order_id={}",
            self.base_url, client_order_id
        );

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get order by client id: {}", error_text));
        }

        Ok(Some(response.json::<Order>().await?))
    }

    pub async fn get_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let mut url = format!(
            "{}/v2/orders?status={}",
            self.base_url,
            filter.status.as_deref().unwrap_or("all")
        );
        if !filter.symbols.is_empty() {
            url.push_str(&format!("&symbols={}", filter.symbols.join(",")));
        }
        if let Some(side) = filter.side {
            url.push_str(&format!("&side={}", side.as_str()));
        }
        if let Some(limit) = filter.limit {
            url.push_str(&format!("&limit={}", limit));
        }

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get orders: {}", error_text));
        }

        Ok(response.json::<Vec<Order>>().await?)
    }

    pub async fn replace_order(&self, order_id: &str, request: ReplaceRequest) -> Result<Order> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);

        let response = self
            .client
            .patch(&url)
            .headers(self.auth_headers())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to replace order: {}", error_text));
        }

        Ok(response.json::<Order>().await?)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);

        let response = self
            .client
            .delete(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to cancel order: {}", error_text));
        }

        tracing::info!("Order {} canceled successfully", order_id);
        Ok(())
    }

    pub async fn get_positions(&self) -> Result<Vec<Position>> {
        let url = format!("{}/v2/positions", self.base_url);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get positions: {}", error_text));
        }

        Ok(response.json::<Vec<Position>>().await?)
    }

    /// 404 -> Ok(None)
    pub async fn get_position(&self, symbol: &str) -> Result<Option<Position>> {
        let url = format!("{}/v2/positions/{}", self.base_url, symbol);

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get position: {}", error_text));
        }

        Ok(Some(response.json::<Position>().await?))
    }

    /// Raw account activities, filtered server-side by type and date range
    pub async fn get_account_activities(
        &self,
        filter: &ActivityFilter,
    ) -> Result<Vec<serde_json::Value>> {
        let mut url = match &filter.activity_type {
            Some(t) => format!("{}/v2/account/activities/{}", self.base_url, t),
            None => format!("{}/v2/account/activities", self.base_url),
        };

        let mut sep = '?';
        if let Some(after) = filter.after {
            url.push(sep);
            url.push_str(&format!("after={}", after.format("%Y-%m-%d")));
            sep = '&';
        }
        if let Some(until) = filter.until {
            url.push(sep);
            url.push_str(&format!("until={}", until.format("%Y-%m-%d")));
        }

        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(vec![]);
        }
        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(anyhow!("Failed to get activities: {}", error_text));
        }

        Ok(response.json::<Vec<serde_json::Value>>().await?)
    }

    pub fn is_paper(&self) -> bool {
        self.base_url.contains("paper-api")
    }
}

fn to_wire_request(request: BrokerOrderRequest) -> OrderRequest {
    let side = match request.side {
        BrokerOrderSide::Buy => OrderSide::Buy,
        BrokerOrderSide::Sell => OrderSide::Sell,
    };
    let is_bracket = request.is_bracket();

    OrderRequest {
        symbol: request.symbol,
        qty: request.qty.to_string(),
        side,
        order_type: OrderType::Market,
        time_in_force: TimeInForce::Gtc,
        order_class: if is_bracket {
            Some(OrderClass::Bracket)
        } else {
            None
        },
        take_profit: request.take_profit.map(|tp| TakeProfitRequest {
            limit_price: format!("{:.2}", tp.limit_price),
        }),
        stop_loss: request.stop_loss.map(|sl| StopLossRequest {
            stop_price: format!("{:.2}", sl.stop_price),
        }),
        limit_price: None,
        stop_price: None,
        client_order_id: request.client_order_id,
    }
}

#[async_trait]
impl Broker for AlpacaClient {
    async fn get_account(&self) -> Result<BrokerAccount> {
        self.get_account().await.map(account_to_broker)
    }

    async fn get_portfolio_history(
        &self,
        period: &str,
        timeframe: &str,
    ) -> Result<PortfolioHistory> {
        self.get_portfolio_history(period, timeframe)
            .await
            .map(history_to_broker)
    }

    async fn get_all_positions(&self) -> Result<Vec<BrokerPosition>> {
        self.get_positions()
            .await
            .map(|ps| ps.into_iter().map(position_to_broker).collect())
    }

    async fn get_open_position(&self, symbol: &str) -> Result<Option<BrokerPosition>> {
        self.get_position(symbol)
            .await
            .map(|p| p.map(position_to_broker))
    }

    async fn submit_order(&self, request: BrokerOrderRequest) -> Result<BrokerOrder> {
        self.submit_order(to_wire_request(request))
            .await
            .map(order_to_broker)
    }

    async fn get_order_by_id(&self, order_id: &str) -> Result<Option<BrokerOrder>> {
        self.get_order(order_id)
            .await
            .map(|o| o.map(order_to_broker))
    }

    async fn get_order_by_client_order_id(
        &self,
        client_order_id: &str,
    ) -> Result<Option<BrokerOrder>> {
        self.get_order_by_client_id(client_order_id)
            .await
            .map(|o| o.map(order_to_broker))
    }

    async fn get_orders(&self, filter: OrderFilter) -> Result<Vec<BrokerOrder>> {
        self.get_orders(&filter)
            .await
            .map(|os| os.into_iter().map(order_to_broker).collect())
    }

    async fn replace_order_by_id(
        &self,
        order_id: &str,
        request: ReplaceOrderRequest,
    ) -> Result<BrokerOrder> {
        let wire = ReplaceRequest {
            stop_price: request.stop_price.map(|p| format!("{:.2}", p)),
            limit_price: request.limit_price.map(|p| format!("{:.2}", p)),
        };
        self.replace_order(order_id, wire).await.map(order_to_broker)
    }

    async fn cancel_order_by_id(&self, order_id: &str) -> Result<()> {
        self.cancel_order(order_id).await
    }

    async fn get_activities(&self, filter: ActivityFilter) -> Result<Vec<serde_json::Value>> {
        self.get_account_activities(&filter).await
    }

    fn is_paper(&self) -> bool {
        self.is_paper()
    }

    fn broker_name(&self) -> &str {
        "alpaca"
    }
}
