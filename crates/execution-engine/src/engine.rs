use crate::fees::estimate_crypto_fee;
use crate::reconciler::StateReconciler;
use anyhow::Result;
use broker_trait::{Broker, BrokerOrder, BrokerOrderRequest, BrokerOrderSide, ReplaceOrderRequest};
use chrono::Utc;
use risk_engine::RiskEngine;
use signal_core::{
    AssetClass, ExitReason, OrderSide, Position, ScaleOut, Signal, TradeStatus, TradeType,
};
use std::sync::Arc;
use std::time::Duration;

/// Hard cap on computed quantity; absorbs micro-cap tight-stop pathologies
/// where risk/share approaches zero.
pub const MAX_POSITION_SIZE: f64 = 1_000_000.0;

/// Probes against the broker before deferring fill capture to backfill
const FILL_RETRY_BUDGET: usize = 3;
const FILL_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Orders go to the broker
    Live,
    /// Synthetic fills, no broker calls on the order path
    Theoretical,
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub mode: ExecutionMode,
    /// Dollar risk per trade; the qty denominator
    pub risk_per_trade: f64,
    pub min_order_notional_usd: f64,
    pub theoretical_slippage_pct: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Theoretical,
            risk_per_trade: 100.0,
            min_order_notional_usd: 10.0,
            theoretical_slippage_pct: 0.001,
        }
    }
}

/// Manages the order lifecycle from signal to broker trade: bracket
/// submission, position sync, stop trailing, scale-outs, breakeven shifts
/// and emergency closure. Live vs theoretical behavior is selected at
/// construction; callers see one interface.
pub struct ExecutionEngine {
    broker: Arc<dyn Broker>,
    risk: Option<Arc<RiskEngine>>,
    reconciler: Option<Arc<StateReconciler>>,
    config: ExecutionConfig,
}

impl ExecutionEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        risk: Option<Arc<RiskEngine>>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            broker,
            risk,
            reconciler: None,
            config,
        }
    }

    /// Attach the reconciler used for manual-exit verification during sync
    pub fn with_reconciler(mut self, reconciler: Arc<StateReconciler>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    fn validate_signal(signal: &Signal) -> bool {
        let mut errors: Vec<&str> = Vec::new();
        if signal.take_profit_1.is_none() {
            errors.push("take_profit_1 is required for bracket order");
        }
        if signal.suggested_stop <= 0.0 {
            errors.push("suggested_stop must be positive");
        }
        if signal.entry_price <= 0.0 {
            errors.push("entry_price must be positive");
        }

        if !errors.is_empty() {
            tracing::error!(
                "Signal validation failed for {}: {}",
                signal.symbol,
                errors.join(", ")
            );
            return false;
        }
        true
    }

    /// qty = min(RISK_PER_TRADE / |entry - stop|, MAX_POSITION_SIZE),
    /// rounded to 6 decimals for crypto and 4 for equities.
    pub fn calculate_qty(&self, signal: &Signal) -> f64 {
        let risk_per_share = (signal.entry_price - signal.suggested_stop).abs();
        if risk_per_share <= 0.0 {
            tracing::error!(
                "Invalid risk distance for {}: entry={}, stop={}",
                signal.symbol,
                signal.entry_price,
                signal.suggested_stop
            );
            return 0.0;
        }

        let qty = (self.config.risk_per_trade / risk_per_share).min(MAX_POSITION_SIZE);

        match signal.asset_class {
            AssetClass::Crypto => (qty * 1e6).round() / 1e6,
            AssetClass::Equity => (qty * 1e4).round() / 1e4,
        }
    }

    fn new_position(signal: &Signal, qty: f64, trade_type: TradeType) -> Position {
        Position {
            position_id: signal.signal_id.clone(),
            signal_id: signal.signal_id.clone(),
            ds: signal.ds,
            symbol: signal.symbol.clone(),
            asset_class: signal.asset_class,
            side: signal.side,
            status: TradeStatus::Open,
            trade_type,
            qty,
            original_qty: None,
            target_entry_price: signal.entry_price,
            entry_fill_price: None,
            entry_slippage_pct: None,
            filled_at: None,
            current_stop_loss: Some(signal.suggested_stop),
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
            discord_thread_id: signal.discord_thread_id.clone(),
            created_at: Utc::now(),
        }
    }

    /// Execute a signal. Returns:
    /// - a RISK_BLOCKED position when a gate rejects the candidate,
    /// - a THEORETICAL position with a synthetic fill outside live mode,
    /// - an OPEN position after submission in live mode,
    /// - None when validation fails or the notional is below the minimum.
    pub async fn execute_signal(&self, signal: &Signal) -> Result<Option<Position>> {
        if !Self::validate_signal(signal) {
            return Ok(None);
        }

        let qty = self.calculate_qty(signal);
        if qty <= 0.0 {
            tracing::error!("Invalid quantity calculated for {}: {}", signal.symbol, qty);
            return Ok(None);
        }

        if let Some(risk) = &self.risk {
            let verdict = risk.validate_signal(signal).await;
            if !verdict.passed {
                let gate = verdict.gate.unwrap_or_else(|| "unknown".to_string());
                tracing::warn!(
                    "Risk gate '{}' blocked {}: {}",
                    gate,
                    signal.symbol,
                    verdict.reason.as_deref().unwrap_or("")
                );
                let mut position = Self::new_position(signal, qty, TradeType::RiskBlocked);
                position.status = TradeStatus::Failed;
                position.rejection_reason = Some(gate);
                return Ok(Some(position));
            }
        }

        let notional = qty * signal.entry_price;
        if notional < self.config.min_order_notional_usd {
            tracing::info!(
                "Skipping {}: notional ${:.2} below minimum ${:.2}",
                signal.symbol,
                notional,
                self.config.min_order_notional_usd
            );
            return Ok(None);
        }

        if self.config.mode == ExecutionMode::Theoretical {
            let slip = self.config.theoretical_slippage_pct;
            let fill = match signal.side {
                OrderSide::Buy => signal.entry_price * (1.0 + slip),
                OrderSide::Sell => signal.entry_price * (1.0 - slip),
            };
            let mut position = Self::new_position(signal, qty, TradeType::Theoretical);
            position.entry_fill_price = Some(fill);
            position.filled_at = Some(Utc::now());
            tracing::info!(
                "[THEORETICAL] {} {} x{} @ ${:.4}",
                signal.side.as_str(),
                signal.symbol,
                qty,
                fill
            );
            return Ok(Some(position));
        }

        let side = match signal.side {
            OrderSide::Buy => BrokerOrderSide::Buy,
            OrderSide::Sell => BrokerOrderSide::Sell,
        };

        // Equities get a broker-side bracket; crypto brackets are
        // unsupported, so the stop and targets stay repository-tracked and
        // the lifecycle advancer enforces them.
        let request = match signal.asset_class {
            AssetClass::Equity => BrokerOrderRequest::bracket(
                signal.symbol.clone(),
                qty,
                side,
                signal.take_profit_1.unwrap_or(signal.entry_price),
                signal.suggested_stop,
            ),
            AssetClass::Crypto => BrokerOrderRequest::market(signal.symbol.clone(), qty, side),
        }
        .with_client_order_id(signal.signal_id.clone());

        let order = self.broker.submit_order(request).await?;
        tracing::info!(
            symbol = %signal.symbol,
            order_id = %order.id,
            client_order_id = %order.client_order_id,
            qty = qty,
            status = %order.status,
            "Order submitted"
        );

        let mut position = Self::new_position(signal, qty, TradeType::Executed);
        position.alpaca_order_id = Some(order.id);
        position.entry_fill_price = Some(signal.entry_price);
        Ok(Some(position))
    }

    /// Order lookup with 404-is-None semantics; other failures log and
    /// return None so callers degrade instead of aborting.
    pub async fn get_order_details(&self, order_id: &str) -> Option<BrokerOrder> {
        match self.broker.get_order_by_id(order_id).await {
            Ok(Some(order)) => Some(order),
            Ok(None) => {
                tracing::warn!("Order {} not found at broker", order_id);
                None
            }
            Err(e) => {
                tracing::error!("Failed to retrieve order {}: {}", order_id, e);
                None
            }
        }
    }

    /// Synchronize a position with broker state: entry fill details, TP/SL
    /// leg ids, external closes, exit metrics and realized PnL.
    pub async fn sync_position_status(&self, position: &Position) -> Position {
        let mut position = position.clone();

        if self.config.mode == ExecutionMode::Theoretical {
            return position;
        }

        let Some(parent_order_id) = position.alpaca_order_id.clone() else {
            tracing::warn!(
                "Cannot sync position {}: no broker order id",
                position.position_id
            );
            return position;
        };

        let Some(order) = self.get_order_details(&parent_order_id).await else {
            position.failed_reason = Some("Parent order not found at broker".to_string());
            return position;
        };

        let order_status = order.status.to_lowercase();
        if order_status == "filled" {
            if let Some(filled_at) = order.filled_at {
                position.filled_at = Some(filled_at);
            }
            if let Some(fill) = order.filled_avg_price_f64() {
                position.entry_fill_price = Some(fill);
                if position.target_entry_price > 0.0 {
                    position.entry_slippage_pct = Some(
                        ((fill - position.target_entry_price) / position.target_entry_price
                            * 100.0
                            * 1e4)
                            .round()
                            / 1e4,
                    );
                }
            }
            if let Some(commission) = order.commission {
                position.commission = Some(commission);
            }

            for leg in &order.legs {
                let leg_type = leg.order_type.to_lowercase();
                if leg_type.contains("limit") {
                    position.tp_order_id = Some(leg.id.clone());
                } else if leg_type.contains("stop") {
                    position.sl_order_id = Some(leg.id.clone());
                }
            }
        } else if matches!(order_status.as_str(), "canceled" | "rejected" | "expired") {
            position.failed_reason = Some(format!("Order {}", order_status));
            position.status = TradeStatus::Closed;
        }

        // Probe the TP leg, then the SL leg
        if let Some(tp_id) = position.tp_order_id.clone() {
            if let Some(tp_order) = self.get_order_details(&tp_id).await {
                if tp_order.is_filled() {
                    position.status = TradeStatus::Closed;
                    position.exit_fill_price = tp_order.filled_avg_price_f64();
                    position.exit_time = tp_order.filled_at;
                    position.exit_reason = Some(ExitReason::TpHit);
                    tracing::info!("Position {} closed via TP", position.position_id);
                }
            }
        }
        if position.status != TradeStatus::Closed {
            if let Some(sl_id) = position.sl_order_id.clone() {
                if let Some(sl_order) = self.get_order_details(&sl_id).await {
                    if sl_order.is_filled() {
                        position.status = TradeStatus::Closed;
                        position.exit_fill_price = sl_order.filled_avg_price_f64();
                        position.exit_time = sl_order.filled_at;
                        position.exit_reason = Some(ExitReason::StopLoss);
                        tracing::info!("Position {} closed via SL", position.position_id);
                    }
                }
            }
        }

        if position.status == TradeStatus::Closed {
            self.finalize_exit_metrics(&mut position);
        }

        // Neither leg filled but the broker no longer reports the position:
        // hand off to the reconciler's manual-exit verification. Without a
        // reconciler the position stays OPEN (safety fallback).
        if position.status == TradeStatus::Open {
            match self.broker.get_open_position(&position.symbol).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    if let Some(reconciler) = &self.reconciler {
                        if let Some(healed) =
                            reconciler.handle_manual_exit_verification(&position).await
                        {
                            position = healed;
                            self.finalize_exit_metrics(&mut position);
                        }
                    } else {
                        tracing::warn!(
                            "Position {} missing at broker and no reconciler attached; leaving OPEN",
                            position.position_id
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to check open position for {}: {}",
                        position.symbol,
                        e
                    );
                }
            }
        }

        position
    }

    fn finalize_exit_metrics(&self, position: &mut Position) {
        if let (Some(filled_at), Some(exit_time)) = (position.filled_at, position.exit_time) {
            position.trade_duration_seconds = Some((exit_time - filled_at).num_seconds());
        }

        // Exit slippage is direction-aware against the expected exit level
        if let Some(exit_fill) = position.exit_fill_price {
            let target_exit = match position.exit_reason {
                Some(ExitReason::StopLoss) => position.current_stop_loss,
                _ => Some(exit_fill),
            };
            if let Some(target) = target_exit {
                if target > 0.0 {
                    position.exit_slippage_pct =
                        Some(((exit_fill - target) / target * 100.0 * 1e4).round() / 1e4);
                }
            }
        }

        let (pnl_usd, pnl_pct) = self.calculate_realized_pnl(position);
        position.realized_pnl_usd = Some(pnl_usd);
        position.realized_pnl_pct = Some(pnl_pct);
    }

    /// Aggregate realized PnL across every scale-out plus the final exit,
    /// net of estimated fees.
    pub fn calculate_realized_pnl(&self, position: &Position) -> (f64, f64) {
        let Some(entry) = position.entry_fill_price.filter(|e| *e != 0.0) else {
            return (0.0, 0.0);
        };
        let is_long = position.side == OrderSide::Buy;

        let mut pnl_gross = 0.0;
        for scale in &position.scaled_out_prices {
            if is_long {
                pnl_gross += (scale.price - entry) * scale.qty;
            } else {
                pnl_gross += (entry - scale.price) * scale.qty;
            }
        }

        if let Some(exit_price) = position.exit_fill_price {
            let remaining = position.qty;
            if is_long {
                pnl_gross += (exit_price - entry) * remaining;
            } else {
                pnl_gross += (entry - exit_price) * remaining;
            }
        }

        let fees = position.commission.unwrap_or(0.0);
        let pnl_usd = pnl_gross - fees;

        let total_qty = position.total_qty();
        let pnl_pct = if total_qty > 0.0 {
            pnl_usd / (entry * total_qty) * 100.0
        } else {
            0.0
        };

        (
            (pnl_usd * 100.0).round() / 100.0,
            (pnl_pct * 1e4).round() / 1e4,
        )
    }

    /// Replace the stop-loss order at the broker. The SL must be in a
    /// replaceable state (new or accepted). Returns the updated position on
    /// success.
    pub async fn modify_stop_loss(&self, position: &mut Position, new_stop: f64) -> bool {
        if self.config.mode == ExecutionMode::Theoretical {
            position.current_stop_loss = Some(new_stop);
            return true;
        }

        let Some(sl_order_id) = position.sl_order_id.clone() else {
            tracing::warn!(
                "Cannot modify stop for {}: no stop order id",
                position.position_id
            );
            return false;
        };

        let Some(sl_order) = self.get_order_details(&sl_order_id).await else {
            tracing::warn!("SL order {} not found", sl_order_id);
            return false;
        };

        let sl_status = sl_order.status.to_lowercase();
        if sl_status != "new" && sl_status != "accepted" {
            tracing::warn!("SL order in non-replaceable state: {}", sl_status);
            return false;
        }

        match self
            .broker
            .replace_order_by_id(
                &sl_order_id,
                ReplaceOrderRequest {
                    stop_price: Some(new_stop),
                    limit_price: None,
                },
            )
            .await
        {
            Ok(replaced) => {
                tracing::info!(
                    position_id = %position.position_id,
                    old_stop = ?position.current_stop_loss,
                    new_stop = new_stop,
                    new_order_id = %replaced.id,
                    "Stop loss modified"
                );
                // Replacement creates a new order id
                position.sl_order_id = Some(replaced.id);
                position.current_stop_loss = Some(new_stop);
                true
            }
            Err(e) => {
                tracing::error!("Failed to modify stop for {}: {}", position.position_id, e);
                false
            }
        }
    }

    async fn capture_fill_price(&self, order: &BrokerOrder) -> Option<f64> {
        if let Some(price) = order.filled_avg_price_f64() {
            return Some(price);
        }

        for attempt in 0..FILL_RETRY_BUDGET {
            tokio::time::sleep(Duration::from_millis(FILL_RETRY_DELAY_MS)).await;
            match self.broker.get_order_by_id(&order.id).await {
                Ok(Some(refreshed)) => {
                    if let Some(price) = refreshed.filled_avg_price_f64() {
                        return Some(price);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(
                        "Fill probe {}/{} for {} failed: {}",
                        attempt + 1,
                        FILL_RETRY_BUDGET,
                        order.id,
                        e
                    );
                }
            }
        }
        None
    }

    /// Partial close at market. Tracks every scale-out for weighted-exit PnL
    /// and shrinks the remaining quantity; captures original_qty on first
    /// call. An unfilled scale order marks the position awaiting backfill.
    pub async fn scale_out_position(&self, position: &mut Position, scale_pct: f64) -> bool {
        if position.qty <= 0.0 {
            tracing::warn!("Cannot scale out {}: no quantity", position.position_id);
            return false;
        }

        if position.original_qty.is_none() {
            position.original_qty = Some(position.qty);
        }

        let scale_qty = (position.qty * scale_pct * 1e8).round() / 1e8;
        if scale_qty <= 0.0 {
            tracing::warn!("Scale-out qty too small for {}", position.position_id);
            return false;
        }

        if self.config.mode == ExecutionMode::Theoretical {
            let fill = position.entry_fill_price.unwrap_or(position.target_entry_price);
            Self::apply_scale_out(position, scale_qty, Some(fill), None);
            return true;
        }

        let close_side = match position.side {
            OrderSide::Buy => BrokerOrderSide::Sell,
            OrderSide::Sell => BrokerOrderSide::Buy,
        };
        let request = BrokerOrderRequest::market(position.symbol.clone(), scale_qty, close_side);

        let order = match self.broker.submit_order(request).await {
            Ok(order) => order,
            Err(e) => {
                tracing::error!("Scale-out failed for {}: {}", position.position_id, e);
                position.failed_reason = Some(format!("Scale-out failed: {e}"));
                return false;
            }
        };

        let fill_price = self.capture_fill_price(&order).await;
        Self::apply_scale_out(position, scale_qty, fill_price, Some(order.id.clone()));

        tracing::info!(
            position_id = %position.position_id,
            scale_qty = scale_qty,
            remaining_qty = position.qty,
            fill_price = ?fill_price,
            order_id = %order.id,
            "Scale out"
        );
        true
    }

    fn apply_scale_out(
        position: &mut Position,
        scale_qty: f64,
        fill_price: Option<f64>,
        order_id: Option<String>,
    ) {
        position.scaled_out_qty += scale_qty;
        position.qty = ((position.qty - scale_qty) * 1e8).round() / 1e8;

        match fill_price {
            Some(price) => {
                position.scaled_out_prices.push(ScaleOut {
                    qty: scale_qty,
                    price,
                    ts: Utc::now(),
                    order_id,
                });
                position.exit_fill_price = weighted_exit_price(position);
            }
            None => {
                // Fill not yet visible; the sync path captures it later
                position.awaiting_backfill = true;
            }
        }
    }

    /// Shift the stop to entry plus a 0.1% buffer in the favorable
    /// direction. Applied after the TP1 scale-out to protect the runner.
    pub async fn move_stop_to_breakeven(&self, position: &mut Position) -> bool {
        let Some(entry_fill) = position.entry_fill_price else {
            tracing::warn!(
                "Cannot move to breakeven {}: no entry fill",
                position.position_id
            );
            return false;
        };

        let buffer_pct = 0.001;
        let breakeven = match position.side {
            OrderSide::Buy => entry_fill * (1.0 + buffer_pct),
            OrderSide::Sell => entry_fill * (1.0 - buffer_pct),
        };
        let breakeven = (breakeven * 100.0).round() / 100.0;

        let success = self.modify_stop_loss(position, breakeven).await;
        if success {
            position.breakeven_applied = true;
            tracing::info!(
                position_id = %position.position_id,
                entry = entry_fill,
                breakeven = breakeven,
                "Stop moved to breakeven"
            );
        }
        success
    }

    /// Cancel both bracket legs best-effort, then market-close the remaining
    /// quantity. Cancellation failures are expected when a leg already
    /// filled and do not affect the outcome.
    pub async fn close_position_emergency(&self, position: &mut Position) -> bool {
        if self.config.mode == ExecutionMode::Theoretical {
            position.status = TradeStatus::Closed;
            position.exit_reason = Some(ExitReason::EmergencyClose);
            position.exit_time = Some(Utc::now());
            position.exit_fill_price = position.entry_fill_price;
            return true;
        }

        if let Some(tp_id) = &position.tp_order_id {
            if let Err(e) = self.broker.cancel_order_by_id(tp_id).await {
                tracing::debug!("Could not cancel TP order (may be filled): {}", e);
            }
        }
        if let Some(sl_id) = &position.sl_order_id {
            if let Err(e) = self.broker.cancel_order_by_id(sl_id).await {
                tracing::debug!("Could not cancel SL order (may be filled): {}", e);
            }
        }

        let close_side = match position.side {
            OrderSide::Buy => BrokerOrderSide::Sell,
            OrderSide::Sell => BrokerOrderSide::Buy,
        };
        let request = BrokerOrderRequest::market(position.symbol.clone(), position.qty, close_side);

        let order = match self.broker.submit_order(request).await {
            Ok(order) => order,
            Err(e) => {
                tracing::error!("Emergency close failed for {}: {}", position.position_id, e);
                position.failed_reason = Some(format!("Emergency close failed: {e}"));
                return false;
            }
        };

        position.exit_order_id = Some(order.id.clone());
        position.status = TradeStatus::Closed;
        position.exit_reason = Some(ExitReason::EmergencyClose);

        match self.capture_fill_price(&order).await {
            Some(price) => {
                position.exit_fill_price = weighted_final_exit(position, price);
                position.exit_time = Some(order.filled_at.unwrap_or_else(Utc::now));
            }
            None => {
                position.awaiting_backfill = true;
            }
        }

        tracing::info!(
            position_id = %position.position_id,
            close_order_id = %order.id,
            qty = position.qty,
            "Emergency close submitted"
        );
        true
    }

    /// Estimated fee for a crypto position's full round trip at the
    /// account's current tier
    pub async fn estimate_fees(&self, position: &Position) -> f64 {
        if position.asset_class != AssetClass::Crypto {
            return 0.0;
        }
        let tier = match self.broker.get_account().await {
            Ok(account) => account.crypto_tier,
            Err(_) => None,
        };
        let entry = position.entry_fill_price.unwrap_or(position.target_entry_price);
        estimate_crypto_fee(entry * position.total_qty(), tier)
    }
}

/// Quantity-weighted mean over all recorded scale-out fills
fn weighted_exit_price(position: &Position) -> Option<f64> {
    let total_qty: f64 = position.scaled_out_prices.iter().map(|s| s.qty).sum();
    if total_qty <= 0.0 {
        return None;
    }
    let weighted: f64 = position
        .scaled_out_prices
        .iter()
        .map(|s| s.price * s.qty)
        .sum();
    Some(weighted / total_qty)
}

/// Weighted mean across scale-outs plus a final exit of the remaining qty
fn weighted_final_exit(position: &Position, final_price: f64) -> Option<f64> {
    let scale_qty: f64 = position.scaled_out_prices.iter().map(|s| s.qty).sum();
    let total = scale_qty + position.qty;
    if total <= 0.0 {
        return Some(final_price);
    }
    let weighted: f64 = position
        .scaled_out_prices
        .iter()
        .map(|s| s.price * s.qty)
        .sum::<f64>()
        + final_price * position.qty;
    Some(weighted / total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_signal, MockBroker};
    use signal_core::AssetClass;

    fn engine_with(broker: MockBroker, mode: ExecutionMode) -> ExecutionEngine {
        ExecutionEngine::new(
            Arc::new(broker),
            None,
            ExecutionConfig {
                mode,
                risk_per_trade: 100.0,
                min_order_notional_usd: 10.0,
                theoretical_slippage_pct: 0.001,
            },
        )
    }

    #[test]
    fn qty_formula_caps_at_max_position_size() {
        let engine = engine_with(MockBroker::default(), ExecutionMode::Theoretical);

        // Micro-cap with a hair-thin stop: uncapped qty would be 1e9
        let mut signal = sample_signal("SHIB/USD", AssetClass::Crypto);
        signal.entry_price = 0.0000011;
        signal.suggested_stop = 0.000001;
        let qty = engine.calculate_qty(&signal);
        assert_eq!(qty, MAX_POSITION_SIZE);

        // Normal case: 100 / (104 - 99) = 20
        let mut signal = sample_signal("BTC/USD", AssetClass::Crypto);
        signal.entry_price = 104.0;
        signal.suggested_stop = 99.0;
        assert_eq!(engine.calculate_qty(&signal), 20.0);
    }

    #[test]
    fn stop_equal_to_entry_yields_zero_qty() {
        let engine = engine_with(MockBroker::default(), ExecutionMode::Theoretical);
        let mut signal = sample_signal("BTC/USD", AssetClass::Crypto);
        signal.entry_price = 100.0;
        signal.suggested_stop = 100.0;
        assert_eq!(engine.calculate_qty(&signal), 0.0);
    }

    #[tokio::test]
    async fn theoretical_mode_fills_synthetically() {
        let engine = engine_with(MockBroker::default(), ExecutionMode::Theoretical);
        let signal = sample_signal("BTC/USD", AssetClass::Crypto);

        let position = engine.execute_signal(&signal).await.unwrap().unwrap();
        assert_eq!(position.trade_type, TradeType::Theoretical);
        assert_eq!(position.position_id, signal.signal_id);
        // BUY fill is entry * (1 + slippage)
        let expected = signal.entry_price * 1.001;
        assert!((position.entry_fill_price.unwrap() - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn invalid_signal_is_dropped() {
        let engine = engine_with(MockBroker::default(), ExecutionMode::Theoretical);
        let mut signal = sample_signal("BTC/USD", AssetClass::Crypto);
        signal.suggested_stop = -1.0;
        assert!(engine.execute_signal(&signal).await.unwrap().is_none());

        let mut signal = sample_signal("BTC/USD", AssetClass::Crypto);
        signal.take_profit_1 = None;
        assert!(engine.execute_signal(&signal).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tiny_notional_is_skipped() {
        let broker = MockBroker::default();
        let engine = ExecutionEngine::new(
            Arc::new(broker),
            None,
            ExecutionConfig {
                mode: ExecutionMode::Theoretical,
                risk_per_trade: 0.0001,
                min_order_notional_usd: 10.0,
                theoretical_slippage_pct: 0.001,
            },
        );
        let signal = sample_signal("BTC/USD", AssetClass::Crypto);
        assert!(engine.execute_signal(&signal).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn live_equity_submits_a_bracket_with_client_order_id() {
        let broker = MockBroker::default();
        let submitted = broker.submitted.clone();
        let engine = engine_with(broker, ExecutionMode::Live);

        let signal = sample_signal("AAPL", AssetClass::Equity);
        let position = engine.execute_signal(&signal).await.unwrap().unwrap();

        assert_eq!(position.trade_type, TradeType::Executed);
        let orders = submitted.lock().unwrap();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].is_bracket());
        assert_eq!(orders[0].client_order_id.as_deref(), Some(signal.signal_id.as_str()));
    }

    #[tokio::test]
    async fn live_crypto_uses_simple_market_order() {
        let broker = MockBroker::default();
        let submitted = broker.submitted.clone();
        let engine = engine_with(broker, ExecutionMode::Live);

        let signal = sample_signal("BTC/USD", AssetClass::Crypto);
        engine.execute_signal(&signal).await.unwrap().unwrap();

        let orders = submitted.lock().unwrap();
        assert!(!orders[0].is_bracket());
    }

    #[tokio::test]
    async fn scale_out_tracks_weighted_exit() {
        let mut broker = MockBroker::default();
        broker.fill_price = Some(110.0);
        let engine = engine_with(broker, ExecutionMode::Live);

        let signal = sample_signal("BTC/USD", AssetClass::Crypto);
        let mut position = ExecutionEngine::new_position(&signal, 2.0, TradeType::Executed);
        position.entry_fill_price = Some(100.0);

        assert!(engine.scale_out_position(&mut position, 0.5).await);
        assert_eq!(position.original_qty, Some(2.0));
        assert_eq!(position.qty, 1.0);
        assert_eq!(position.scaled_out_qty, 1.0);
        assert_eq!(position.exit_fill_price, Some(110.0));

        // Second scale-out at a different price: weighted mean moves
        let broker2 = MockBroker {
            fill_price: Some(120.0),
            ..Default::default()
        };
        let engine2 = engine_with(broker2, ExecutionMode::Live);
        assert!(engine2.scale_out_position(&mut position, 0.5).await);
        assert_eq!(position.qty, 0.5);
        assert_eq!(position.scaled_out_qty, 1.5);
        // (110 * 1.0 + 120 * 0.5) / 1.5
        let expected = (110.0 + 60.0) / 1.5;
        assert!((position.exit_fill_price.unwrap() - expected).abs() < 1e-9);

        // Invariant: scale-outs plus remainder equal the original
        assert!(
            (position.scaled_out_qty + position.qty - position.original_qty.unwrap()).abs() < 1e-9
        );
    }

    #[tokio::test]
    async fn unfilled_scale_out_awaits_backfill() {
        let broker = MockBroker {
            fill_price: None,
            ..Default::default()
        };
        let engine = engine_with(broker, ExecutionMode::Live);

        let signal = sample_signal("BTC/USD", AssetClass::Crypto);
        let mut position = ExecutionEngine::new_position(&signal, 2.0, TradeType::Executed);
        position.entry_fill_price = Some(100.0);

        assert!(engine.scale_out_position(&mut position, 0.5).await);
        assert!(position.awaiting_backfill);
        assert!(position.exit_fill_price.is_none());
        assert_eq!(position.qty, 1.0);
    }

    #[tokio::test]
    async fn realized_pnl_spans_scale_outs_and_final_exit() {
        let engine = engine_with(MockBroker::default(), ExecutionMode::Live);

        let signal = sample_signal("BTC/USD", AssetClass::Crypto);
        let mut position = ExecutionEngine::new_position(&signal, 0.5, TradeType::Executed);
        position.entry_fill_price = Some(100.0);
        position.original_qty = Some(2.0);
        position.scaled_out_qty = 1.5;
        position.scaled_out_prices = vec![
            ScaleOut {
                qty: 1.0,
                price: 110.0,
                ts: Utc::now(),
                order_id: None,
            },
            ScaleOut {
                qty: 0.5,
                price: 120.0,
                ts: Utc::now(),
                order_id: None,
            },
        ];
        position.exit_fill_price = Some(130.0);
        position.commission = Some(5.0);

        let (pnl_usd, pnl_pct) = engine.calculate_realized_pnl(&position);
        // (110-100)*1 + (120-100)*0.5 + (130-100)*0.5 - 5 = 10+10+15-5 = 30
        assert_eq!(pnl_usd, 30.0);
        // 30 / (100 * 2) * 100 = 15%
        assert_eq!(pnl_pct, 15.0);
    }

    #[tokio::test]
    async fn breakeven_buffers_in_the_favorable_direction() {
        let engine = engine_with(MockBroker::default(), ExecutionMode::Theoretical);

        let signal = sample_signal("BTC/USD", AssetClass::Crypto);
        let mut long = ExecutionEngine::new_position(&signal, 1.0, TradeType::Executed);
        long.entry_fill_price = Some(100.0);
        assert!(engine.move_stop_to_breakeven(&mut long).await);
        assert!(long.breakeven_applied);
        assert_eq!(long.current_stop_loss, Some(100.1));

        let mut short = ExecutionEngine::new_position(&signal, 1.0, TradeType::Executed);
        short.side = OrderSide::Sell;
        short.entry_fill_price = Some(100.0);
        assert!(engine.move_stop_to_breakeven(&mut short).await);
        assert_eq!(short.current_stop_loss, Some(99.9));
    }

    #[tokio::test]
    async fn emergency_close_cancels_legs_then_markets_out() {
        let broker = MockBroker {
            fill_price: Some(95.0),
            ..Default::default()
        };
        let canceled = broker.canceled.clone();
        let submitted = broker.submitted.clone();
        let engine = engine_with(broker, ExecutionMode::Live);

        let signal = sample_signal("BTC/USD", AssetClass::Crypto);
        let mut position = ExecutionEngine::new_position(&signal, 1.0, TradeType::Executed);
        position.entry_fill_price = Some(100.0);
        position.tp_order_id = Some("tp-1".into());
        position.sl_order_id = Some("sl-1".into());

        assert!(engine.close_position_emergency(&mut position).await);
        assert_eq!(position.status, TradeStatus::Closed);
        assert_eq!(position.exit_reason, Some(ExitReason::EmergencyClose));
        assert_eq!(position.exit_fill_price, Some(95.0));

        let canceled = canceled.lock().unwrap();
        assert!(canceled.contains(&"tp-1".to_string()));
        assert!(canceled.contains(&"sl-1".to_string()));
        assert_eq!(submitted.lock().unwrap().len(), 1);
    }
}
