use crate::cache::{BarCache, CacheKey};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{header, Client};
use serde::Deserialize;
use signal_core::{AssetClass, Bar};
use std::collections::HashMap;

/// Daily-bar retrieval capability. Implementations must be idempotent and
/// safe under concurrent reads.
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Flat series for one symbol, oldest first
    async fn get_daily_bars(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        lookback_days: i64,
    ) -> Result<Vec<Bar>>;

    /// Batched fetch keyed by symbol
    async fn get_daily_bars_multi(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        lookback_days: i64,
    ) -> Result<HashMap<String, Vec<Bar>>>;
}

#[derive(Debug, Deserialize)]
struct WireBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

impl From<WireBar> for Bar {
    fn from(w: WireBar) -> Self {
        Bar {
            timestamp: w.t,
            open: w.o,
            high: w.h,
            low: w.l,
            close: w.c,
            volume: w.v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MultiBarsResponse {
    #[serde(default)]
    bars: HashMap<String, Vec<WireBar>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Alpaca Data API provider for daily equity and crypto bars
pub struct AlpacaMarketData {
    client: Client,
    data_url: String,
    api_key: String,
    secret_key: String,
    cache: Option<BarCache>,
}

impl AlpacaMarketData {
    pub fn new(api_key: String, secret_key: String, enable_cache: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()?;

        Ok(Self {
            client,
            data_url: "https://data.alpaca.markets".to_string(),
            api_key,
            secret_key,
            cache: if enable_cache {
                Some(BarCache::with_disk())
            } else {
                None
            },
        })
    }

    pub fn with_data_url(mut self, url: impl Into<String>) -> Self {
        self.data_url = url.into();
        self
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

    fn bars_endpoint(&self, asset_class: AssetClass) -> String {
        match asset_class {
            AssetClass::Crypto => format!("{}/v1beta3/crypto/us/bars", self.data_url),
            AssetClass::Equity => format!("{}/v2/stocks/bars", self.data_url),
        }
    }

    async fn fetch_bars(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        lookback_days: i64,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        let start = (Utc::now() - Duration::days(lookback_days))
            .format("%Y-%m-%dT%H:%M:%SZ")
            .to_string();
        let endpoint = self.bars_endpoint(asset_class);

        let mut out: HashMap<String, Vec<Bar>> = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}?symbols={}&timeframe=1Day&start={}&limit=10000",
                endpoint,
                symbols.join(","),
                start
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&page_token={}", token));
            }

            let response = self
                .client
                .get(&url)
                .headers(self.auth_headers())
                .send()
                .await?;

            if !response.status().is_success() {
                let error_text = response.text().await?;
                return Err(anyhow!("Bar fetch failed: {}", error_text));
            }

            let page = response.json::<MultiBarsResponse>().await?;
            for (symbol, bars) in page.bars {
                out.entry(symbol)
                    .or_default()
                    .extend(bars.into_iter().map(Bar::from));
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        for bars in out.values_mut() {
            bars.sort_by_key(|b| b.timestamp);
        }

        Ok(out)
    }
}

#[async_trait]
impl MarketData for AlpacaMarketData {
    async fn get_daily_bars(
        &self,
        symbol: &str,
        asset_class: AssetClass,
        lookback_days: i64,
    ) -> Result<Vec<Bar>> {
        if let Some(cache) = &self.cache {
            let key = CacheKey::today(symbol, asset_class, lookback_days);
            if let Some(bars) = cache.get(&key) {
                tracing::debug!("Bar cache hit for {}", symbol);
                return Ok(bars);
            }
        }

        let symbols = vec![symbol.to_string()];
        let mut result = self.fetch_bars(&symbols, asset_class, lookback_days).await?;
        let bars = result.remove(symbol).unwrap_or_default();

        if let Some(cache) = &self.cache {
            cache.put(CacheKey::today(symbol, asset_class, lookback_days), &bars);
        }

        Ok(bars)
    }

    async fn get_daily_bars_multi(
        &self,
        symbols: &[String],
        asset_class: AssetClass,
        lookback_days: i64,
    ) -> Result<HashMap<String, Vec<Bar>>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        self.fetch_bars(symbols, asset_class, lookback_days).await
    }
}
