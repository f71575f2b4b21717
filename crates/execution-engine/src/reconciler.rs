use crate::symbols::{normalize_broker_symbol, SymbolMap};
use broker_trait::{Broker, OrderFilter};
use chrono::{Duration, Utc};
use signal_core::{
    ExitReason, Notifier, OrderSide, Position, ReconciliationReport, TradeStatus, TradeType,
};
use signal_store::PositionRepository;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Zombie candidates younger than this are skipped to avoid racing a live
/// submission that hasn't reached the broker's position list yet.
pub const DEFAULT_MIN_AGE_MINUTES: i64 = 5;

const REVERSE_ORPHAN_SAMPLE: i64 = 50;

/// Detects and repairs divergence between broker and database state:
/// zombies (DB open, broker closed), orphans (broker open, DB missing) and
/// reverse orphans (DB closed, broker still open).
pub struct StateReconciler {
    broker: Arc<dyn Broker>,
    repo: Arc<PositionRepository>,
    notifier: Arc<dyn Notifier>,
    environment: String,
    symbol_map: SymbolMap,
}

impl StateReconciler {
    pub fn new(
        broker: Arc<dyn Broker>,
        repo: Arc<PositionRepository>,
        notifier: Arc<dyn Notifier>,
        environment: impl Into<String>,
        configured_symbols: &[String],
    ) -> Self {
        let environment = environment.into();
        tracing::info!(
            environment = %environment,
            mode = if environment == "PROD" { "ENABLED" } else { "DISABLED" },
            "StateReconciler initialized"
        );
        Self {
            broker,
            repo,
            notifier,
            environment,
            symbol_map: SymbolMap::from_symbols(configured_symbols),
        }
    }

    /// Full reconciliation pass. Gated to PROD.
    pub async fn reconcile(&self, min_age_minutes: i64) -> ReconciliationReport {
        let start = Instant::now();

        if self.environment != "PROD" {
            tracing::warn!(
                "Reconciliation skipped: ENVIRONMENT is {}, not PROD",
                self.environment
            );
            return ReconciliationReport {
                critical_issues: vec![format!(
                    "Reconciliation disabled in {}",
                    self.environment
                )],
                ..Default::default()
            };
        }

        let mut critical_issues: Vec<String> = Vec::new();
        let mut reconciled_count = 0usize;
        let mut zombies: Vec<String> = Vec::new();
        let mut orphans: Vec<String> = Vec::new();

        // 1. Fetch state from both sides
        let broker_positions = match self.broker.get_all_positions().await {
            Ok(positions) => positions,
            Err(e) => {
                let msg = format!("Failed to fetch broker positions: {e}");
                tracing::error!("{}", msg);
                critical_issues.push(msg);
                vec![]
            }
        };
        let db_positions = match self.repo.get_open_positions().await {
            Ok(positions) => positions
                .into_iter()
                .filter(|p| p.trade_type != TradeType::Theoretical)
                .collect::<Vec<_>>(),
            Err(e) => {
                let msg = format!("Failed to fetch database positions: {e}");
                tracing::error!("{}", msg);
                critical_issues.push(msg);
                vec![]
            }
        };

        // 2. Detect discrepancies over normalized symbol sets
        let broker_symbols: HashSet<String> = broker_positions
            .iter()
            .map(|p| normalize_broker_symbol(&p.symbol))
            .collect();
        let db_symbols: HashSet<String> = db_positions
            .iter()
            .map(|p| normalize_broker_symbol(&p.symbol))
            .collect();

        let zombie_candidates: Vec<&Position> = db_positions
            .iter()
            .filter(|p| !broker_symbols.contains(&normalize_broker_symbol(&p.symbol)))
            .collect();
        let orphan_candidates: Vec<String> = broker_symbols
            .difference(&db_symbols)
            .cloned()
            .collect();

        tracing::info!(
            zombies_detected = zombie_candidates.len(),
            orphans_detected = orphan_candidates.len(),
            "Reconciliation analysis complete"
        );

        // 3. Heal zombies
        let now = Utc::now();
        for position in zombie_candidates {
            let age = now - position.created_at;
            if age < Duration::minutes(min_age_minutes) {
                tracing::warn!(
                    symbol = %position.symbol,
                    age_seconds = age.num_seconds(),
                    min_age_minutes = min_age_minutes,
                    "Skipping young zombie candidate"
                );
                zombies.push(position.symbol.clone());
                continue;
            }

            match self.handle_manual_exit_verification(position).await {
                Some(updated) => {
                    if let Err(e) = self.repo.update_position(&updated).await {
                        let msg = format!("Failed to persist healed zombie {}: {e}", position.symbol);
                        tracing::error!("{}", msg);
                        critical_issues.push(msg);
                        zombies.push(position.symbol.clone());
                        continue;
                    }
                    reconciled_count += 1;
                    tracing::warn!(
                        symbol = %position.symbol,
                        position_id = %updated.position_id,
                        "Zombie healed"
                    );
                }
                None => {
                    // No matching close order: leave the position OPEN and
                    // escalate; guessing would hide a real exit gap.
                    zombies.push(position.symbol.clone());
                    let msg = format!(
                        "ZOMBIE EXIT GAP: {} open in DB, missing at broker, no closing order found",
                        position.symbol
                    );
                    tracing::error!("{}", msg);
                    critical_issues.push(msg.clone());
                    self.notify_critical(&msg).await;
                }
            }
        }

        // 4. Orphans are alerted, never closed: an unknown broker position
        // is not ours to touch.
        for normalized in orphan_candidates {
            let symbol = self.symbol_map.denormalize(&normalized);
            tracing::error!(
                symbol = %symbol,
                impact = "Position open at broker but missing from DB",
                "ORPHAN POSITION DETECTED"
            );
            let msg = format!("ORPHAN POSITION: {symbol} open at broker but missing from DB");
            critical_issues.push(msg.clone());
            self.notify_critical(&msg).await;
            orphans.push(symbol);
        }

        // 5. Reverse orphans: recently closed in DB but still open at broker
        critical_issues.extend(self.check_reverse_orphans().await);

        let report = ReconciliationReport {
            zombies,
            orphans,
            reconciled_count,
            duration_seconds: start.elapsed().as_secs_f64(),
            critical_issues,
        };

        tracing::info!(
            zombies = report.zombies.len(),
            orphans = report.orphans.len(),
            reconciled = report.reconciled_count,
            duration_seconds = format!("{:.3}", report.duration_seconds),
            critical_issues = report.critical_issues.len(),
            "Reconciliation complete"
        );
        report
    }

    /// Verify whether a position missing from the broker was closed by a
    /// manual order. Searches recent filled orders on the closing side,
    /// excluding the position's own TP/SL/entry order ids AND its client
    /// order id so the entry is never misread as an exit. Returns the healed
    /// position, or None when no closing order exists (exit gap).
    pub async fn handle_manual_exit_verification(&self, position: &Position) -> Option<Position> {
        tracing::warn!(
            "Position {} ({}) not found at broker. Verifying manual exit via order history...",
            position.position_id,
            position.symbol
        );

        let close_side = match position.side {
            OrderSide::Buy => broker_trait::BrokerOrderSide::Sell,
            OrderSide::Sell => broker_trait::BrokerOrderSide::Buy,
        };

        let orders = match self
            .broker
            .get_orders(OrderFilter {
                status: Some("closed".into()),
                symbols: vec![position.symbol.clone()],
                side: Some(close_side),
                limit: Some(500),
            })
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                tracing::error!(
                    "Error during manual exit verification for {}: {}",
                    position.symbol,
                    e
                );
                return None;
            }
        };

        let mut ignored: HashSet<&str> = HashSet::new();
        if let Some(id) = &position.tp_order_id {
            ignored.insert(id);
        }
        if let Some(id) = &position.sl_order_id {
            ignored.insert(id);
        }
        if let Some(id) = &position.alpaca_order_id {
            ignored.insert(id);
        }
        ignored.insert(&position.position_id);

        let closing_order = orders.iter().find(|o| {
            o.is_filled()
                && !ignored.contains(o.id.as_str())
                && !ignored.contains(o.client_order_id.as_str())
        });

        match closing_order {
            Some(order) => {
                let mut updated = position.clone();
                updated.status = TradeStatus::Closed;
                updated.exit_reason = Some(ExitReason::ManualExit);
                updated.exit_fill_price = order.filled_avg_price_f64();
                updated.exit_time = order.filled_at;
                updated.exit_order_id = Some(order.id.clone());

                tracing::info!(
                    symbol = %position.symbol,
                    order_id = %order.id,
                    price = ?updated.exit_fill_price,
                    "Manual exit verified"
                );
                self.notify_critical(&format!(
                    "Manual exit detected for {} via order {}",
                    position.symbol, order.id
                ))
                .await;

                Some(updated)
            }
            None => {
                tracing::error!(
                    "EXIT VERIFICATION FAILED: {} missing from broker but no matching \
                     closing order found. Keeping open in DB to prevent gap.",
                    position.symbol
                );
                None
            }
        }
    }

    async fn check_reverse_orphans(&self) -> Vec<String> {
        tracing::info!("Checking for reverse orphans (CLOSED in DB, OPEN at broker)...");
        let mut errors = Vec::new();

        let closed = match self.repo.get_closed_positions(REVERSE_ORPHAN_SAMPLE).await {
            Ok(positions) => positions,
            Err(e) => {
                tracing::warn!("Reverse orphan detection failed: {}", e);
                return errors;
            }
        };

        for position in closed {
            match self
                .broker
                .get_open_position(&normalize_broker_symbol(&position.symbol))
                .await
            {
                Ok(Some(_)) => {
                    tracing::error!(
                        symbol = %position.symbol,
                        position_id = %position.position_id,
                        impact = "Position closed in DB but STILL OPEN at broker",
                        "REVERSE ORPHAN DETECTED"
                    );
                    let msg = format!(
                        "REVERSE ORPHAN: {} closed in DB but still open at broker",
                        position.symbol
                    );
                    errors.push(msg.clone());
                    self.notify_critical(&msg).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "Error checking closed position {}: {}",
                        position.symbol,
                        e
                    );
                }
            }
        }

        errors
    }

    async fn notify_critical(&self, message: &str) {
        if let Err(e) = self
            .notifier
            .send_message(&format!("CRITICAL: {message}"), None, None)
            .await
        {
            tracing::warn!("Failed to send critical alert: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        broker_position, closed_order, sample_position, MockBroker, MockNotifier,
    };
    use signal_core::AssetClass;

    async fn test_repo() -> Arc<PositionRepository> {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory SQLite");
        let repo = PositionRepository::new(pool, "TEST");
        repo.init_tables().await.unwrap();
        Arc::new(repo)
    }

    fn reconciler(
        broker: MockBroker,
        repo: Arc<PositionRepository>,
        notifier: Arc<MockNotifier>,
        environment: &str,
    ) -> StateReconciler {
        StateReconciler::new(
            Arc::new(broker),
            repo,
            notifier,
            environment,
            &["BTC/USD".to_string(), "ETH/USD".to_string()],
        )
    }

    #[tokio::test]
    async fn non_prod_environments_skip_reconciliation() {
        let repo = test_repo().await;
        let notifier = Arc::new(MockNotifier::default());
        let r = reconciler(MockBroker::default(), repo, notifier, "DEV");

        let report = r.reconcile(5).await;
        assert_eq!(report.reconciled_count, 0);
        assert!(report.critical_issues[0].contains("disabled in DEV"));
    }

    #[tokio::test]
    async fn zombie_with_manual_close_is_healed() {
        let repo = test_repo().await;
        let notifier = Arc::new(MockNotifier::default());

        // DB thinks BTC/USD is open (and old enough to act on)
        let mut position = sample_position("pos-1", "BTC/USD", AssetClass::Crypto);
        position.created_at = Utc::now() - Duration::minutes(30);
        position.tp_order_id = Some("tp-1".into());
        position.sl_order_id = Some("sl-1".into());
        position.alpaca_order_id = Some("entry-1".into());
        repo.save(&position).await.unwrap();

        // Broker has no position, but a recent filled SELL that is neither
        // our TP, SL nor entry
        let broker = MockBroker::default();
        broker
            .orders
            .lock()
            .unwrap()
            .push(closed_order("manual-1", "BTC/USD", "sell", 105.5));

        let r = reconciler(broker, repo.clone(), notifier, "PROD");
        let report = r.reconcile(5).await;

        assert_eq!(report.reconciled_count, 1);
        assert!(report.zombies.is_empty());

        let healed = repo.get_position("pos-1").await.unwrap().unwrap();
        assert_eq!(healed.status, TradeStatus::Closed);
        assert_eq!(healed.exit_reason, Some(ExitReason::ManualExit));
        assert_eq!(healed.exit_fill_price, Some(105.5));
        assert_eq!(healed.exit_order_id.as_deref(), Some("manual-1"));
    }

    #[tokio::test]
    async fn exit_gap_keeps_position_open_and_alerts() {
        let repo = test_repo().await;
        let notifier = Arc::new(MockNotifier::default());

        let mut position = sample_position("pos-1", "BTC/USD", AssetClass::Crypto);
        position.created_at = Utc::now() - Duration::minutes(30);
        repo.save(&position).await.unwrap();

        // No closing order anywhere
        let r = reconciler(MockBroker::default(), repo.clone(), notifier.clone(), "PROD");
        let report = r.reconcile(5).await;

        assert_eq!(report.reconciled_count, 0);
        assert_eq!(report.zombies, vec!["BTC/USD".to_string()]);
        assert!(report
            .critical_issues
            .iter()
            .any(|i| i.contains("EXIT GAP")));

        // Never silently marked closed
        let still_open = repo.get_position("pos-1").await.unwrap().unwrap();
        assert_eq!(still_open.status, TradeStatus::Open);
        assert!(!notifier.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn young_zombies_are_left_alone() {
        let repo = test_repo().await;
        let notifier = Arc::new(MockNotifier::default());

        // Created 30 seconds ago: inside the race-guard window
        let mut position = sample_position("pos-1", "BTC/USD", AssetClass::Crypto);
        position.created_at = Utc::now() - Duration::seconds(30);
        repo.save(&position).await.unwrap();

        let broker = MockBroker::default();
        broker
            .orders
            .lock()
            .unwrap()
            .push(closed_order("manual-1", "BTC/USD", "sell", 105.5));

        let r = reconciler(broker, repo.clone(), notifier, "PROD");
        let report = r.reconcile(5).await;

        // Reported but not acted upon
        assert_eq!(report.reconciled_count, 0);
        assert_eq!(report.zombies, vec!["BTC/USD".to_string()]);
        let untouched = repo.get_position("pos-1").await.unwrap().unwrap();
        assert_eq!(untouched.status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn entry_order_is_never_mistaken_for_an_exit() {
        let repo = test_repo().await;
        let notifier = Arc::new(MockNotifier::default());

        let mut position = sample_position("pos-1", "BTC/USD", AssetClass::Crypto);
        position.created_at = Utc::now() - Duration::minutes(30);
        position.alpaca_order_id = Some("entry-uuid".into());
        repo.save(&position).await.unwrap();

        // The only candidate orders are the entry itself, once by broker id
        // and once by client id
        let broker = MockBroker::default();
        {
            let mut orders = broker.orders.lock().unwrap();
            orders.push(closed_order("entry-uuid", "BTC/USD", "sell", 101.0));
            let mut by_client = closed_order("other-uuid", "BTC/USD", "sell", 101.0);
            by_client.client_order_id = "pos-1".into();
            orders.push(by_client);
        }

        let r = reconciler(broker, repo.clone(), notifier, "PROD");
        let report = r.reconcile(5).await;

        assert_eq!(report.reconciled_count, 0);
        assert!(report.critical_issues.iter().any(|i| i.contains("EXIT GAP")));
        let still_open = repo.get_position("pos-1").await.unwrap().unwrap();
        assert_eq!(still_open.status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn orphans_are_alerted_not_closed() {
        let repo = test_repo().await;
        let notifier = Arc::new(MockNotifier::default());

        // Broker holds ETHUSD; DB knows nothing about it
        let broker = MockBroker::default();
        broker
            .positions
            .lock()
            .unwrap()
            .push(broker_position("ETHUSD", "crypto"));

        let r = reconciler(broker, repo, notifier.clone(), "PROD");
        let report = r.reconcile(5).await;

        // Denormalized back to the configured form
        assert_eq!(report.orphans, vec!["ETH/USD".to_string()]);
        assert!(report.critical_issues.iter().any(|i| i.contains("ORPHAN")));
        assert!(notifier
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains("ORPHAN")));
    }

    #[tokio::test]
    async fn reverse_orphans_detected_from_closed_sample() {
        let repo = test_repo().await;
        let notifier = Arc::new(MockNotifier::default());

        let mut position = sample_position("pos-1", "BTC/USD", AssetClass::Crypto);
        position.status = TradeStatus::Closed;
        position.exit_time = Some(Utc::now());
        repo.save(&position).await.unwrap();

        // Broker still reports the position open
        let broker = MockBroker::default();
        broker
            .positions
            .lock()
            .unwrap()
            .push(broker_position("BTCUSD", "crypto"));

        let r = reconciler(broker, repo, notifier, "PROD");
        let report = r.reconcile(5).await;

        assert!(report
            .critical_issues
            .iter()
            .any(|i| i.contains("REVERSE ORPHAN")));
    }
}
