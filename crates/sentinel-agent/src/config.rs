use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// PROD | DEV | TEST. Gates order submission, reconciliation and fee
    /// reconciliation; selects the operational table prefix.
    pub environment: String,

    // Execution gates
    pub enable_execution: bool,
    /// Hard gate: must be true before any real order leaves the process
    pub alpaca_paper_trading: bool,

    // Risk parameters
    pub risk_per_trade: f64,
    pub max_crypto_positions: usize,
    pub max_equity_positions: usize,
    pub max_daily_drawdown_pct: f64,
    pub min_asset_bp_usd: f64,
    pub min_order_notional_usd: f64,

    // Portfolio
    pub crypto_symbols: Vec<String>,
    pub equity_symbols: Vec<String>,
    pub lookback_days: i64,

    // Signal lifecycle
    pub ttl_days_prod: i64,
    pub ttl_days_dev: i64,
    pub cooldown_hours: i64,

    // Scheduling
    pub rate_limit_delay_secs: f64,
    pub theoretical_slippage_pct: f64,
    pub enable_market_data_cache: bool,

    // Observability & notifier toggles
    pub enable_gcp_logging: bool,
    pub test_mode: bool,
    pub mock_discord: bool,

    // External services
    pub alpaca_api_key: String,
    pub alpaca_secret_key: String,
    pub alpaca_base_url: String,
    pub discord_test_webhook_url: String,
    pub discord_crypto_webhook_url: String,
    pub discord_equity_webhook_url: String,
    pub database_url: String,
    pub analytics_database_url: String,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_or(key, default)
        .parse::<T>()
        .with_context(|| format!("invalid value for {key}"))
}

fn parse_symbols(key: &str, default: &str) -> Vec<String> {
    env_or(key, default)
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            environment: env_or("ENVIRONMENT", "DEV").to_uppercase(),

            enable_execution: parse_env("ENABLE_EXECUTION", "false")?,
            alpaca_paper_trading: parse_env("ALPACA_PAPER_TRADING", "true")?,

            risk_per_trade: parse_env("RISK_PER_TRADE", "100.0")?,
            max_crypto_positions: parse_env("MAX_CRYPTO_POSITIONS", "4")?,
            max_equity_positions: parse_env("MAX_EQUITY_POSITIONS", "4")?,
            max_daily_drawdown_pct: parse_env("MAX_DAILY_DRAWDOWN_PCT", "0.02")?,
            min_asset_bp_usd: parse_env("MIN_ASSET_BP_USD", "500.0")?,
            min_order_notional_usd: parse_env("MIN_ORDER_NOTIONAL_USD", "10.0")?,

            crypto_symbols: parse_symbols("CRYPTO_SYMBOLS", "BTC/USD,ETH/USD,SOL/USD"),
            equity_symbols: parse_symbols("EQUITY_SYMBOLS", ""),
            lookback_days: parse_env("LOOKBACK_DAYS", "365")?,

            ttl_days_prod: parse_env("TTL_DAYS_PROD", "90")?,
            ttl_days_dev: parse_env("TTL_DAYS_DEV", "7")?,
            cooldown_hours: parse_env("COOLDOWN_HOURS", "24")?,

            rate_limit_delay_secs: parse_env("RATE_LIMIT_DELAY", "0.5")?,
            theoretical_slippage_pct: parse_env("THEORETICAL_SLIPPAGE_PCT", "0.001")?,
            enable_market_data_cache: parse_env("ENABLE_MARKET_DATA_CACHE", "false")?,

            enable_gcp_logging: parse_env("ENABLE_GCP_LOGGING", "false")?,
            test_mode: parse_env("TEST_MODE", "true")?,
            mock_discord: parse_env("MOCK_DISCORD", "false")?,

            alpaca_api_key: env::var("APCA_API_KEY_ID")
                .or_else(|_| env::var("ALPACA_API_KEY"))
                .context("APCA_API_KEY_ID (or ALPACA_API_KEY) not set")?,
            alpaca_secret_key: env::var("APCA_API_SECRET_KEY")
                .or_else(|_| env::var("ALPACA_SECRET_KEY"))
                .context("APCA_API_SECRET_KEY (or ALPACA_SECRET_KEY) not set")?,
            alpaca_base_url: env_or("ALPACA_BASE_URL", "https://paper-api.alpaca.markets"),

            discord_test_webhook_url: env_or("DISCORD_TEST_WEBHOOK_URL", ""),
            discord_crypto_webhook_url: env_or("DISCORD_CRYPTO_WEBHOOK_URL", ""),
            discord_equity_webhook_url: env_or("DISCORD_EQUITY_WEBHOOK_URL", ""),

            database_url: env_or("DATABASE_URL", "sqlite:sentinel.db"),
            analytics_database_url: env_or("ANALYTICS_DATABASE_URL", "sqlite:sentinel_analytics.db"),
        };

        Ok(config)
    }

    pub fn is_prod(&self) -> bool {
        self.environment == "PROD"
    }

    /// delete_at horizon for the current environment
    pub fn ttl_days(&self) -> i64 {
        if self.is_prod() {
            self.ttl_days_prod
        } else {
            self.ttl_days_dev
        }
    }

    /// Real orders require PROD, the execution flag AND the paper-trading
    /// hard gate all at once.
    pub fn live_execution(&self) -> bool {
        self.is_prod() && self.enable_execution && self.alpaca_paper_trading
    }

    /// (symbol, asset_class) pairs the scheduler iterates
    pub fn portfolio(&self) -> Vec<(String, signal_core::AssetClass)> {
        let mut items: Vec<(String, signal_core::AssetClass)> = self
            .crypto_symbols
            .iter()
            .map(|s| (s.clone(), signal_core::AssetClass::Crypto))
            .collect();
        items.extend(
            self.equity_symbols
                .iter()
                .map(|s| (s.clone(), signal_core::AssetClass::Equity)),
        );
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_execution_requires_all_three_gates() {
        let mut config = AgentConfig {
            environment: "PROD".into(),
            enable_execution: true,
            alpaca_paper_trading: true,
            risk_per_trade: 100.0,
            max_crypto_positions: 4,
            max_equity_positions: 4,
            max_daily_drawdown_pct: 0.02,
            min_asset_bp_usd: 500.0,
            min_order_notional_usd: 10.0,
            crypto_symbols: vec!["BTC/USD".into()],
            equity_symbols: vec!["AAPL".into()],
            lookback_days: 365,
            ttl_days_prod: 90,
            ttl_days_dev: 7,
            cooldown_hours: 24,
            rate_limit_delay_secs: 0.5,
            theoretical_slippage_pct: 0.001,
            enable_market_data_cache: false,
            enable_gcp_logging: false,
            test_mode: true,
            mock_discord: true,
            alpaca_api_key: "key".into(),
            alpaca_secret_key: "secret".into(),
            alpaca_base_url: "https://paper-api.alpaca.markets".into(),
            discord_test_webhook_url: String::new(),
            discord_crypto_webhook_url: String::new(),
            discord_equity_webhook_url: String::new(),
            database_url: "sqlite::memory:".into(),
            analytics_database_url: "sqlite::memory:".into(),
        };
        assert!(config.live_execution());
        assert_eq!(config.ttl_days(), 90);

        config.environment = "DEV".into();
        assert!(!config.live_execution());
        assert_eq!(config.ttl_days(), 7);

        config.environment = "PROD".into();
        config.alpaca_paper_trading = false;
        assert!(!config.live_execution());

        config.alpaca_paper_trading = true;
        config.enable_execution = false;
        assert!(!config.live_execution());
    }

    #[test]
    fn portfolio_interleaves_classes() {
        let config = AgentConfig {
            environment: "DEV".into(),
            enable_execution: false,
            alpaca_paper_trading: true,
            risk_per_trade: 100.0,
            max_crypto_positions: 4,
            max_equity_positions: 4,
            max_daily_drawdown_pct: 0.02,
            min_asset_bp_usd: 500.0,
            min_order_notional_usd: 10.0,
            crypto_symbols: vec!["BTC/USD".into(), "ETH/USD".into()],
            equity_symbols: vec!["AAPL".into()],
            lookback_days: 365,
            ttl_days_prod: 90,
            ttl_days_dev: 7,
            cooldown_hours: 24,
            rate_limit_delay_secs: 0.5,
            theoretical_slippage_pct: 0.001,
            enable_market_data_cache: false,
            enable_gcp_logging: false,
            test_mode: true,
            mock_discord: true,
            alpaca_api_key: "key".into(),
            alpaca_secret_key: "secret".into(),
            alpaca_base_url: "url".into(),
            discord_test_webhook_url: String::new(),
            discord_crypto_webhook_url: String::new(),
            discord_equity_webhook_url: String::new(),
            database_url: "sqlite::memory:".into(),
            analytics_database_url: "sqlite::memory:".into(),
        };

        let portfolio = config.portfolio();
        assert_eq!(portfolio.len(), 3);
        assert_eq!(portfolio[0].1, signal_core::AssetClass::Crypto);
        assert_eq!(portfolio[2].1, signal_core::AssetClass::Equity);
    }
}
