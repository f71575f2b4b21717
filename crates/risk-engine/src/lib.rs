use anyhow::Result;
use broker_trait::{Broker, BrokerOrderSide, OrderFilter};
use chrono::NaiveDate;
use market_data::MarketData;
use signal_core::{AssetClass, Signal};
use signal_store::PositionRepository;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Correlation above this against any open position blocks the candidate
pub const MAX_CORRELATION: f64 = 0.8;
const CORRELATION_LOOKBACK_DAYS: i64 = 90;

#[derive(Debug, Clone)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub reason: Option<String>,
    /// Name of the gate that produced the verdict
    pub gate: Option<String>,
}

impl RiskCheckResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
            gate: None,
        }
    }

    pub fn block(gate: &str, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            gate: Some(gate.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub max_daily_drawdown_pct: f64,
    pub max_crypto_positions: usize,
    pub max_equity_positions: usize,
    pub min_asset_bp_usd: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_drawdown_pct: 0.02,
            max_crypto_positions: 4,
            max_equity_positions: 4,
            min_asset_bp_usd: 500.0,
        }
    }
}

/// Capital preservation layer: ordered pre-trade gates, cheapest first,
/// fail-fast and fail-closed. Any internal error blocks with the gate name.
pub struct RiskEngine {
    broker: Arc<dyn Broker>,
    repo: Arc<PositionRepository>,
    market: Option<Arc<dyn MarketData>>,
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        repo: Arc<PositionRepository>,
        market: Option<Arc<dyn MarketData>>,
        config: RiskConfig,
    ) -> Self {
        Self {
            broker,
            repo,
            market,
            config,
        }
    }

    /// Run every gate for a candidate signal. Order matters: fail fast on
    /// the cheapest checks first.
    pub async fn validate_signal(&self, signal: &Signal) -> RiskCheckResult {
        let drawdown = self.check_daily_drawdown().await;
        if !drawdown.passed {
            return drawdown;
        }

        let duplicate = self.check_duplicate_symbol(signal).await;
        if !duplicate.passed {
            return duplicate;
        }

        let sector = self.check_sector_limit(signal.asset_class).await;
        if !sector.passed {
            return sector;
        }

        let correlation = self.check_correlation(signal).await;
        if !correlation.passed {
            return correlation;
        }

        let buying_power = self
            .check_buying_power(signal.asset_class, self.config.min_asset_bp_usd)
            .await;
        if !buying_power.passed {
            return buying_power;
        }

        RiskCheckResult::pass()
    }

    /// Gate: daily account drawdown, (equity - last_equity) / last_equity
    pub async fn check_daily_drawdown(&self) -> RiskCheckResult {
        let account = match self.broker.get_account().await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("Risk check failed (drawdown): {}", e);
                return RiskCheckResult::block("drawdown", format!("Error checking drawdown: {e}"));
            }
        };

        let equity = account.equity_f64();
        let last_equity = account.last_equity_f64();
        if last_equity == 0.0 {
            return RiskCheckResult::pass();
        }

        let drawdown_pct = (equity - last_equity) / last_equity;
        let threshold = -self.config.max_daily_drawdown_pct.abs();

        if drawdown_pct < threshold {
            let reason = format!(
                "Daily drawdown limit hit: {:.2}% < {:.2}%",
                drawdown_pct * 100.0,
                threshold * 100.0
            );
            tracing::warn!("{}", reason);
            return RiskCheckResult::block("drawdown", reason);
        }

        RiskCheckResult::pass()
    }

    /// Gate: no pyramiding into a symbol that already has an open position
    pub async fn check_duplicate_symbol(&self, signal: &Signal) -> RiskCheckResult {
        let open_positions = match self.repo.get_open_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Risk check failed (duplicate): {}", e);
                return RiskCheckResult::block("duplicate", format!("Error checking duplicate: {e}"));
            }
        };

        for pos in &open_positions {
            if pos.symbol == signal.symbol {
                let reason = format!(
                    "Duplicate position: {} is already open ({})",
                    signal.symbol, pos.position_id
                );
                tracing::warn!("{}", reason);
                return RiskCheckResult::block("duplicate", reason);
            }
        }

        RiskCheckResult::pass()
    }

    /// Gate: max open positions per asset class. The broker is the source of
    /// truth; pending buy orders count toward exposure so two candidates
    /// can't race past the cap together.
    pub async fn check_sector_limit(&self, asset_class: AssetClass) -> RiskCheckResult {
        let limit = match asset_class {
            AssetClass::Crypto => self.config.max_crypto_positions,
            AssetClass::Equity => self.config.max_equity_positions,
        };
        let target_class = match asset_class {
            AssetClass::Crypto => "crypto",
            AssetClass::Equity => "us_equity",
        };

        let filled_count = match self.broker.get_all_positions().await {
            Ok(positions) => positions
                .iter()
                .filter(|p| p.asset_class.eq_ignore_ascii_case(target_class))
                .count(),
            Err(e) => {
                tracing::error!("Risk check failed (sector cap): {}", e);
                return RiskCheckResult::block(
                    "sector_cap",
                    format!("Error checking sector cap: {e}"),
                );
            }
        };

        let pending_buys = match self
            .broker
            .get_orders(OrderFilter {
                status: Some("open".into()),
                ..Default::default()
            })
            .await
        {
            Ok(orders) => orders
                .iter()
                .filter(|o| o.side.eq_ignore_ascii_case("buy"))
                .filter(|o| {
                    // Orders lack an asset-class field on some brokers; infer
                    // crypto from the quote separator in the symbol.
                    let is_crypto = o.symbol.contains('/');
                    match asset_class {
                        AssetClass::Crypto => is_crypto,
                        AssetClass::Equity => !is_crypto,
                    }
                })
                .count(),
            Err(e) => {
                tracing::error!("Risk check failed (sector cap orders): {}", e);
                return RiskCheckResult::block(
                    "sector_cap",
                    format!("Error checking sector cap: {e}"),
                );
            }
        };

        let total_exposure = filled_count + pending_buys;
        if total_exposure >= limit {
            let reason = format!(
                "Max {} positions reached: {}/{} ({} filled + {} pending)",
                asset_class.as_str(),
                total_exposure,
                limit,
                filled_count,
                pending_buys
            );
            tracing::warn!("{}", reason);
            return RiskCheckResult::block("sector_cap", reason);
        }

        RiskCheckResult::pass()
    }

    /// Gate: reject when the candidate's daily closes correlate above 0.8
    /// with any open position over the last 90 days. Missing data for the
    /// candidate or any open position blocks the trade.
    pub async fn check_correlation(&self, signal: &Signal) -> RiskCheckResult {
        let Some(market) = &self.market else {
            return RiskCheckResult::pass();
        };

        let open_positions = match self.repo.get_open_positions().await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Risk check failed (correlation): {}", e);
                return RiskCheckResult::block(
                    "correlation",
                    format!("Error checking correlation: {e}"),
                );
            }
        };

        let others: Vec<_> = open_positions
            .iter()
            .filter(|p| p.symbol != signal.symbol)
            .collect();
        if others.is_empty() {
            return RiskCheckResult::pass();
        }

        // Batch fetch closes per asset class
        let mut symbols_by_class: HashMap<AssetClass, HashSet<String>> = HashMap::new();
        symbols_by_class
            .entry(signal.asset_class)
            .or_default()
            .insert(signal.symbol.clone());
        for pos in &others {
            symbols_by_class
                .entry(pos.asset_class)
                .or_default()
                .insert(pos.symbol.clone());
        }

        let mut close_series: HashMap<String, HashMap<NaiveDate, f64>> = HashMap::new();
        for (asset_class, symbols) in symbols_by_class {
            let symbol_list: Vec<String> = symbols.into_iter().collect();
            match market
                .get_daily_bars_multi(&symbol_list, asset_class, CORRELATION_LOOKBACK_DAYS)
                .await
            {
                Ok(result) => {
                    for (symbol, bars) in result {
                        let series = bars
                            .iter()
                            .map(|b| (b.timestamp.date_naive(), b.close))
                            .collect();
                        close_series.insert(symbol, series);
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to fetch batch data for correlation: {}", e);
                }
            }
        }

        let Some(candidate) = close_series.get(&signal.symbol) else {
            return RiskCheckResult::block(
                "correlation",
                format!("Market data missing for candidate {}", signal.symbol),
            );
        };

        for pos in &others {
            let Some(series) = close_series.get(&pos.symbol) else {
                tracing::warn!(
                    "Market data for existing position {} is missing. Blocking trade.",
                    pos.symbol
                );
                return RiskCheckResult::block(
                    "correlation",
                    format!(
                        "Could not verify correlation due to missing data for {}",
                        pos.symbol
                    ),
                );
            };

            match pearson_correlation(candidate, series) {
                Some(correlation) if correlation > MAX_CORRELATION => {
                    let reason = format!(
                        "Correlation risk: {} is {:.2} correlated with existing position {}",
                        signal.symbol, correlation, pos.symbol
                    );
                    tracing::warn!("{}", reason);
                    return RiskCheckResult::block("correlation", reason);
                }
                Some(_) => {}
                None => {
                    return RiskCheckResult::block(
                        "correlation",
                        format!("Error calculating correlation with {}", pos.symbol),
                    );
                }
            }
        }

        RiskCheckResult::pass()
    }

    /// Gate: buying power. Crypto spends cash (non-marginable); equity uses
    /// Reg-T for overnight-hold safety.
    pub async fn check_buying_power(
        &self,
        asset_class: AssetClass,
        required_amount: f64,
    ) -> RiskCheckResult {
        let account = match self.broker.get_account().await {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("Risk check failed (buying power): {}", e);
                return RiskCheckResult::block(
                    "buying_power",
                    format!("Error checking buying power: {e}"),
                );
            }
        };

        let (available, bp_type) = match asset_class {
            AssetClass::Crypto => (account.non_marginable_buying_power_f64(), "Cash (Crypto)"),
            AssetClass::Equity => (account.regt_buying_power_f64(), "Reg-T Margin (Equity)"),
        };

        if available < required_amount {
            let reason = format!(
                "Insufficient buying power ({}): ${:.2} < ${:.2} (min req)",
                bp_type, available, required_amount
            );
            tracing::warn!("{}", reason);
            return RiskCheckResult::block("buying_power", reason);
        }

        RiskCheckResult::pass()
    }
}

/// Pearson correlation over the date-aligned intersection of two close
/// series. None when fewer than two shared observations or zero variance.
pub fn pearson_correlation(
    a: &HashMap<NaiveDate, f64>,
    b: &HashMap<NaiveDate, f64>,
) -> Option<f64> {
    let shared: Vec<(f64, f64)> = a
        .iter()
        .filter_map(|(date, &x)| b.get(date).map(|&y| (x, y)))
        .collect();
    if shared.len() < 2 {
        return None;
    }

    let n = shared.len() as f64;
    let mean_x = shared.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = shared.iter().map(|(_, y)| y).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in &shared {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }

    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}
