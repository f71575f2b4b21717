use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alpaca_broker::AlpacaClient;
use anyhow::{Context, Result};
use broker_trait::Broker;
use chrono::Utc;
use execution_engine::{ExecutionConfig, ExecutionEngine, ExecutionMode, StateReconciler};
use market_data::{AlpacaMarketData, MarketData};
use risk_engine::{RiskConfig, RiskEngine};
use signal_core::{
    ExitReason, LifecycleEvent, LifecycleUpdate, Notifier, RejectedSignal, Signal, SignalPatch,
    SignalStatus, TradeStatus, TradeType,
};
use signal_engine::{check_exits, GeneratorConfig, SignalGenerator, SignalParameterFactory};
use signal_store::{JobLockRepository, PositionRepository, SignalRepository};
use technical_analysis::PatternAnalyzer;

mod config;
mod discord;
mod jobs;
mod metrics;

use config::AgentConfig;
use discord::DiscordNotifier;
use metrics::AgentMetrics;

/// Trail notifications only fire once TP3 has moved this far from the last
/// notified value.
const TRAIL_NOTIFY_THRESHOLD_PCT: f64 = 1.0;

struct Services {
    config: AgentConfig,
    broker: Arc<dyn Broker>,
    market: Arc<dyn MarketData>,
    signals: Arc<SignalRepository>,
    positions: Arc<PositionRepository>,
    notifier: Arc<dyn Notifier>,
    generator: SignalGenerator,
    executor: ExecutionEngine,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Cloud log collectors want structured output; either toggle selects it
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
        || std::env::var("ENABLE_GCP_LOGGING")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting Sentinel signal engine");

    // Fatal init (config, secrets, clients) exits 1; a clean run - signals
    // or not - exits 0.
    if let Err(e) = run().await {
        tracing::error!("Fatal error in main application loop: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let app_start = AgentMetrics::start_timer();

    let config = AgentConfig::from_env().context("configuration failed to load")?;
    tracing::info!(
        environment = %config.environment,
        execution = config.enable_execution,
        risk_per_trade = config.risk_per_trade,
        rate_limit_delay = config.rate_limit_delay_secs,
        "Configuration loaded"
    );

    if config.is_prod() && config.enable_execution && !config.alpaca_paper_trading {
        tracing::warn!(
            "ALPACA_PAPER_TRADING is false; order submission stays disabled until it is set"
        );
    }

    // Broker + market data clients
    let alpaca = AlpacaClient::new(
        config.alpaca_api_key.clone(),
        config.alpaca_secret_key.clone(),
        config.alpaca_base_url.clone(),
    )?;
    let broker: Arc<dyn Broker> = Arc::new(alpaca);
    let market: Arc<dyn MarketData> = Arc::new(AlpacaMarketData::new(
        config.alpaca_api_key.clone(),
        config.alpaca_secret_key.clone(),
        config.enable_market_data_cache,
    )?);

    // Operational + analytical stores
    sqlx::any::install_default_drivers();
    let pool = sqlx::AnyPool::connect(&config.database_url)
        .await
        .context("operational store connection failed")?;
    let analytics_pool = sqlx::AnyPool::connect(&config.analytics_database_url)
        .await
        .context("analytical store connection failed")?;

    let signals = Arc::new(SignalRepository::new(pool.clone(), &config.environment));
    signals.init_tables().await?;
    let positions = Arc::new(PositionRepository::new(pool.clone(), &config.environment));
    positions.init_tables().await?;
    let locks = JobLockRepository::new(pool.clone(), &config.environment);
    locks.init_tables().await?;
    tracing::info!("Repositories initialized");

    // Startup connectivity checks
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .context("operational store connectivity check failed")?;
    let account = broker
        .get_account()
        .await
        .context("broker connectivity check failed")?;
    tracing::info!(
        equity = %account.equity,
        cash = %account.cash,
        status = %account.status,
        "Startup check: broker OK"
    );

    let notifier: Arc<dyn Notifier> = Arc::new(DiscordNotifier::new(
        config.discord_test_webhook_url.clone(),
        config.discord_crypto_webhook_url.clone(),
        config.discord_equity_webhook_url.clone(),
        config.test_mode || !config.is_prod(),
        config.mock_discord,
    ));

    let risk = Arc::new(RiskEngine::new(
        broker.clone(),
        positions.clone(),
        Some(market.clone()),
        RiskConfig {
            max_daily_drawdown_pct: config.max_daily_drawdown_pct,
            max_crypto_positions: config.max_crypto_positions,
            max_equity_positions: config.max_equity_positions,
            min_asset_bp_usd: config.min_asset_bp_usd,
        },
    ));

    let all_symbols: Vec<String> = config
        .crypto_symbols
        .iter()
        .chain(config.equity_symbols.iter())
        .cloned()
        .collect();
    let reconciler = Arc::new(StateReconciler::new(
        broker.clone(),
        positions.clone(),
        notifier.clone(),
        config.environment.clone(),
        &all_symbols,
    ));

    let mode = if config.live_execution() {
        tracing::warn!("LIVE execution enabled (paper account)");
        ExecutionMode::Live
    } else {
        tracing::info!("Theoretical execution mode");
        ExecutionMode::Theoretical
    };
    let executor = ExecutionEngine::new(
        broker.clone(),
        Some(risk),
        ExecutionConfig {
            mode,
            risk_per_trade: config.risk_per_trade,
            min_order_notional_usd: config.min_order_notional_usd,
            theoretical_slippage_pct: config.theoretical_slippage_pct,
        },
    )
    .with_reconciler(reconciler.clone());

    let generator = SignalGenerator::new(GeneratorConfig {
        ttl_days: config.ttl_days(),
        cooldown_hours: config.cooldown_hours,
    });

    let services = Services {
        config,
        broker,
        market,
        signals,
        positions,
        notifier,
        generator,
        executor,
    };

    // Graceful shutdown: finish the current symbol, skip the rest
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm =
                    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    {
                        Ok(s) => s,
                        Err(e) => {
                            tracing::error!("Failed to install SIGTERM handler: {}", e);
                            return;
                        }
                    };
                tokio::select! {
                    _ = ctrl_c => tracing::info!("Received SIGINT"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
                tracing::info!("Received SIGINT");
            }
            shutdown.store(true, Ordering::SeqCst);
        });
    }

    let portfolio = services.config.portfolio();
    tracing::info!("Processing {} symbols...", portfolio.len());

    let mut agent_metrics = AgentMetrics::new();
    let rate_limit = Duration::from_secs_f64(services.config.rate_limit_delay_secs);

    for (idx, (symbol, asset_class)) in portfolio.iter().enumerate() {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("Shutdown requested. Stopping processing gracefully...");
            break;
        }

        // Stay under the broker's request budget
        if idx > 0 {
            tokio::time::sleep(rate_limit).await;
        }

        let symbol_start = AgentMetrics::start_timer();
        match process_symbol(&services, symbol, *asset_class, &mut agent_metrics).await {
            Ok(()) => {
                agent_metrics.symbols_processed += 1;
                agent_metrics.record_success("symbol_processing", symbol_start);
            }
            Err(e) => {
                agent_metrics.errors_encountered += 1;
                agent_metrics.record_failure("symbol_processing", symbol_start);
                tracing::error!(
                    symbol = symbol.as_str(),
                    asset_class = asset_class.as_str(),
                    "Error processing symbol: {:#}",
                    e
                );
                // Continue to the next symbol despite the error
            }
        }
    }

    if !shutdown.load(Ordering::SeqCst) {
        jobs::run_maintenance(
            &services.config,
            services.broker.clone(),
            services.market.clone(),
            services.signals.clone(),
            services.positions.clone(),
            &locks,
            analytics_pool,
            reconciler,
        )
        .await;
    }

    agent_metrics.log_summary(app_start.elapsed().as_secs_f64());

    if shutdown.load(Ordering::SeqCst) {
        tracing::info!("Signal generation cycle interrupted by shutdown request.");
    } else {
        tracing::info!("Signal generation cycle complete.");
    }
    Ok(())
}

/// One symbol iteration: generation first, then lifecycle advancement
/// against the same bars, so a freshly emitted signal is never
/// double-advanced within the tick.
async fn process_symbol(
    services: &Services,
    symbol: &str,
    asset_class: signal_core::AssetClass,
    agent_metrics: &mut AgentMetrics,
) -> Result<()> {
    tracing::info!(
        symbol = symbol,
        asset_class = asset_class.as_str(),
        "Analyzing..."
    );

    let bars = services
        .market
        .get_daily_bars(symbol, asset_class, services.config.lookback_days)
        .await
        .with_context(|| format!("failed to fetch bars for {symbol}"))?;
    if bars.is_empty() {
        tracing::warn!("No data for {}", symbol);
        return Ok(());
    }

    // --- Generation -------------------------------------------------------
    let most_recent_exit = services
        .signals
        .get_most_recent_exit(symbol)
        .await
        .unwrap_or(None);

    let generated = services.generator.generate_signal(
        symbol,
        asset_class,
        &bars,
        most_recent_exit,
        Utc::now(),
    );

    if let Some(mut signal) = generated {
        agent_metrics.signals_found += 1;

        // Notify first to capture the thread token for lifecycle updates
        match services.notifier.send_signal(&signal).await {
            Ok(Some(thread_id)) => {
                signal.discord_thread_id = Some(thread_id);
            }
            Ok(None) => {
                tracing::warn!("No notification thread captured for {}", symbol);
            }
            Err(e) => {
                tracing::warn!("Failed to send signal notification for {}: {}", symbol, e);
            }
        }

        let persistence_start = AgentMetrics::start_timer();
        match services.signals.save(&signal).await {
            Ok(()) => {
                agent_metrics.record_success("signal_persistence", persistence_start);
                tracing::info!(
                    signal_id = %signal.signal_id,
                    symbol = symbol,
                    "Signal persisted"
                );
            }
            Err(e) => {
                // Generation succeeded; a persistence failure must not block
                // the rest of the symbol iteration
                agent_metrics.record_failure("signal_persistence", persistence_start);
                tracing::error!(
                    signal_id = %signal.signal_id,
                    "Failed to persist signal: {}",
                    e
                );
            }
        }

        if services.config.enable_execution {
            execute_generated_signal(services, &signal, agent_metrics).await;
        }
    }

    // --- Lifecycle --------------------------------------------------------
    let active = services.signals.get_active_signals(symbol).await?;
    if active.is_empty() {
        return Ok(());
    }
    tracing::info!("Checking {} active signals for {}...", active.len(), symbol);

    let analyzer = PatternAnalyzer::new(&bars);
    let Some(analysis) = analyzer.analyze_latest() else {
        return Ok(());
    };

    let updates = check_exits(&active, &analysis, Utc::now().date_naive());
    for update in updates {
        agent_metrics.lifecycle_updates += 1;
        // One bad signal must not block its siblings
        if let Err(e) = apply_lifecycle_update(services, &update, asset_class).await {
            tracing::error!(
                signal_id = %update.signal.signal_id,
                "Failed to apply lifecycle update: {:#}",
                e
            );
        }
    }

    Ok(())
}

async fn execute_generated_signal(
    services: &Services,
    signal: &Signal,
    agent_metrics: &mut AgentMetrics,
) {
    let execution_start = AgentMetrics::start_timer();
    match services.executor.execute_signal(signal).await {
        Ok(Some(position)) => match position.trade_type {
            TradeType::RiskBlocked => {
                agent_metrics.signals_rejected += 1;
                agent_metrics.record_success("order_execution", execution_start);
                let gate = position
                    .rejection_reason
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());

                // Shadow path: hydrate non-positive levels so the record
                // always validates, persist for filter tuning, never execute
                let factory = SignalParameterFactory::new(services.config.ttl_days());
                let mut shadow = factory.hydrate_safe_values(signal);
                shadow.status = SignalStatus::RejectedByFilter;
                let rejected = RejectedSignal {
                    signal: shadow,
                    rejection_reason: gate.clone(),
                    rejected_at: Utc::now(),
                };
                if let Err(e) = services.signals.save_rejected(&rejected).await {
                    tracing::error!("Failed to persist rejected signal: {}", e);
                }
                if let Err(e) = services.notifier.send_shadow_signal(signal, &gate).await {
                    tracing::warn!("Failed to send shadow notification: {}", e);
                }
            }
            TradeType::Theoretical => {
                agent_metrics.trades_executed += 1;
                agent_metrics.record_success("order_execution", execution_start);
                if let Err(e) = services.positions.save_theoretical(&position).await {
                    tracing::error!("Failed to persist theoretical position: {}", e);
                }
            }
            TradeType::Executed => {
                agent_metrics.trades_executed += 1;
                agent_metrics.record_success("order_execution", execution_start);
                tracing::info!(
                    position_id = %position.position_id,
                    qty = position.qty,
                    "Order executed"
                );
                if let Err(e) = services.positions.save(&position).await {
                    tracing::error!("Failed to persist position: {}", e);
                }
            }
        },
        Ok(None) => {
            tracing::debug!(
                "Execution skipped for {} (validation or notional gate)",
                signal.symbol
            );
        }
        Err(e) => {
            agent_metrics.record_failure("order_execution", execution_start);
            tracing::error!("Failed to execute order for {}: {}", signal.symbol, e);
        }
    }
}

async fn apply_lifecycle_update(
    services: &Services,
    update: &LifecycleUpdate,
    asset_class: signal_core::AssetClass,
) -> Result<()> {
    let signal = &update.signal;

    match &update.event {
        LifecycleEvent::TrailUpdated { previous_tp3 } => {
            let new_tp3 = signal.take_profit_3.unwrap_or(*previous_tp3);
            tracing::info!(
                signal_id = %signal.signal_id,
                old_tp3 = previous_tp3,
                new_tp3 = new_tp3,
                "Trail update"
            );

            // Always persist the trailed value
            let mut patch = SignalPatch {
                take_profit_3: Some(new_tp3),
                ..Default::default()
            };

            // Notify only on movement beyond the threshold, measured against
            // the last value the channel has seen
            let last_notified = signal.tp3_last_notified.unwrap_or(*previous_tp3);
            let movement_pct = if last_notified > 0.0 {
                ((new_tp3 - last_notified) / last_notified * 100.0).abs()
            } else {
                100.0
            };
            if movement_pct > TRAIL_NOTIFY_THRESHOLD_PCT {
                if let Err(e) = services
                    .notifier
                    .send_trail_update(signal, last_notified, Some(asset_class))
                    .await
                {
                    tracing::warn!("Failed to send trail update: {}", e);
                }
                patch.tp3_last_notified = Some(new_tp3);
            }

            services
                .signals
                .update_signal_atomic(&signal.signal_id, &patch)
                .await?;
        }
        LifecycleEvent::StatusChanged => {
            tracing::info!(
                signal_id = %signal.signal_id,
                status = signal.status.as_str(),
                reason = ?signal.exit_reason,
                "Signal update"
            );

            let mut patch = SignalPatch {
                status: Some(signal.status),
                exit_reason: signal.exit_reason,
                ..Default::default()
            };
            if signal.status == SignalStatus::Tp1Hit {
                // Breakeven shift rides along with the status change
                patch.suggested_stop = Some(signal.suggested_stop);
            }
            if signal.status.is_terminal() {
                patch.closed_at = Some(Utc::now());
            }
            services
                .signals
                .update_signal_atomic(&signal.signal_id, &patch)
                .await?;

            if let Err(e) = services.notifier.send_signal_update(signal).await {
                tracing::warn!("Failed to send signal update: {}", e);
            }

            // Follow through on the linked position
            match signal.status {
                SignalStatus::Tp1Hit => {
                    scale_out_and_protect(services, signal).await;
                }
                SignalStatus::Tp3Hit | SignalStatus::Invalidated => {
                    close_linked_position(services, signal, asset_class).await;
                }
                _ => {}
            }
        }
    }

    Ok(())
}

/// TP1 follow-through: scale half out and move the stop to breakeven
async fn scale_out_and_protect(services: &Services, signal: &Signal) {
    let position = match services.positions.get_position(&signal.signal_id).await {
        Ok(Some(p)) if p.status == TradeStatus::Open => p,
        Ok(_) => return,
        Err(e) => {
            tracing::error!("Failed to load position for {}: {}", signal.signal_id, e);
            return;
        }
    };

    let mut position = position;
    if services.executor.scale_out_position(&mut position, 0.5).await {
        services.executor.move_stop_to_breakeven(&mut position).await;
        if let Err(e) = services.positions.update_position(&position).await {
            tracing::error!("Failed to persist scaled position: {}", e);
        }
    }
}

/// Terminal follow-through: emergency-close whatever is left and report the
/// realized result on the signal's thread
async fn close_linked_position(
    services: &Services,
    signal: &Signal,
    _asset_class: signal_core::AssetClass,
) {
    let position = match services.positions.get_position(&signal.signal_id).await {
        Ok(Some(p)) if p.status == TradeStatus::Open => p,
        Ok(_) => return,
        Err(e) => {
            tracing::error!("Failed to load position for {}: {}", signal.signal_id, e);
            return;
        }
    };

    let mut position = position;
    if !services.executor.close_position_emergency(&mut position).await {
        tracing::error!("Emergency close failed for {}", position.position_id);
        return;
    }

    let (pnl_usd, pnl_pct) = services.executor.calculate_realized_pnl(&position);
    position.realized_pnl_usd = Some(pnl_usd);
    position.realized_pnl_pct = Some(pnl_pct);
    if let (Some(filled_at), Some(exit_time)) = (position.filled_at, position.exit_time) {
        position.trade_duration_seconds = Some((exit_time - filled_at).num_seconds());
    }

    if let Err(e) = services.positions.update_position(&position).await {
        tracing::error!("Failed to persist closed position: {}", e);
    }

    let duration = position
        .trade_duration_seconds
        .map(format_duration)
        .unwrap_or_else(|| "n/a".to_string());
    let exit_reason = position
        .exit_reason
        .map(|r| r.as_str())
        .unwrap_or(ExitReason::EmergencyClose.as_str());
    if let Err(e) = services
        .notifier
        .send_trade_close(signal, &position, pnl_usd, pnl_pct, &duration, exit_reason)
        .await
    {
        tracing::warn!("Failed to send trade close notification: {}", e);
    }
}

fn format_duration(total_seconds: i64) -> String {
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3_600;
    let minutes = (total_seconds % 3_600) / 60;
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
