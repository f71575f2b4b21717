use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// OHLCV bar data (daily granularity, immutable once observed)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PivotKind {
    Peak,
    Valley,
}

/// Structural anchor point (peak or valley) in price data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pivot {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub kind: PivotKind,
    /// Position in the source bar sequence
    pub index: usize,
}

/// Pivot snapshot stored on a signal as a structural anchor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotSnapshot {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub pivot_type: PivotKind,
    pub index: i64,
}

impl From<&Pivot> for PivotSnapshot {
    fn from(p: &Pivot) -> Self {
        Self {
            price: p.price,
            timestamp: p.timestamp,
            pivot_type: p.kind,
            index: p.index as i64,
        }
    }
}

impl From<Pivot> for PivotSnapshot {
    fn from(p: Pivot) -> Self {
        (&p).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetClass {
    Crypto,
    Equity,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Crypto => "CRYPTO",
            AssetClass::Equity => "EQUITY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Waiting,
    Tp1Hit,
    Tp2Hit,
    Tp3Hit,
    Invalidated,
    Expired,
    RejectedByFilter,
}

impl SignalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalStatus::Waiting => "WAITING",
            SignalStatus::Tp1Hit => "TP1_HIT",
            SignalStatus::Tp2Hit => "TP2_HIT",
            SignalStatus::Tp3Hit => "TP3_HIT",
            SignalStatus::Invalidated => "INVALIDATED",
            SignalStatus::Expired => "EXPIRED",
            SignalStatus::RejectedByFilter => "REJECTED_BY_FILTER",
        }
    }

    pub fn from_str(s: &str) -> Option<SignalStatus> {
        match s {
            "WAITING" => Some(SignalStatus::Waiting),
            "TP1_HIT" => Some(SignalStatus::Tp1Hit),
            "TP2_HIT" => Some(SignalStatus::Tp2Hit),
            "TP3_HIT" => Some(SignalStatus::Tp3Hit),
            "INVALIDATED" => Some(SignalStatus::Invalidated),
            "EXPIRED" => Some(SignalStatus::Expired),
            "REJECTED_BY_FILTER" => Some(SignalStatus::RejectedByFilter),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignalStatus::Tp3Hit
                | SignalStatus::Invalidated
                | SignalStatus::Expired
                | SignalStatus::RejectedByFilter
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SignalStatus::Waiting | SignalStatus::Tp1Hit | SignalStatus::Tp2Hit
        )
    }

    /// Transition legality as a pure function over (current, next).
    ///
    /// WAITING -> {TP1_HIT, INVALIDATED, EXPIRED}
    /// TP1_HIT -> {TP2_HIT, TP3_HIT, INVALIDATED}
    /// TP2_HIT -> {TP3_HIT, INVALIDATED}
    /// Terminal states never re-open. WAITING never jumps straight to TP3.
    pub fn may_transition_to(&self, next: SignalStatus) -> bool {
        use SignalStatus::*;
        match self {
            Waiting => matches!(next, Tp1Hit | Invalidated | Expired),
            Tp1Hit => matches!(next, Tp2Hit | Tp3Hit | Invalidated),
            Tp2Hit => matches!(next, Tp3Hit | Invalidated),
            Tp3Hit | Invalidated | Expired | RejectedByFilter => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StructuralInvalidation,
    BearishEngulfing,
    RsiOverbought,
    AdxPeak,
    Tp1,
    Tp2,
    TpHit,
    StopLoss,
    ManualExit,
    EmergencyClose,
    Expired,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StructuralInvalidation => "STRUCTURAL_INVALIDATION",
            ExitReason::BearishEngulfing => "BEARISH_ENGULFING",
            ExitReason::RsiOverbought => "RSI_OVERBOUGHT",
            ExitReason::AdxPeak => "ADX_PEAK",
            ExitReason::Tp1 => "TP1",
            ExitReason::Tp2 => "TP2",
            ExitReason::TpHit => "TP_HIT",
            ExitReason::StopLoss => "STOP_LOSS",
            ExitReason::ManualExit => "MANUAL_EXIT",
            ExitReason::EmergencyClose => "EMERGENCY_CLOSE",
            ExitReason::Expired => "EXPIRED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternClassification {
    StandardPattern,
    MacroPattern,
    HarmonicPattern,
    MacroHarmonic,
}

impl PatternClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternClassification::StandardPattern => "STANDARD_PATTERN",
            PatternClassification::MacroPattern => "MACRO_PATTERN",
            PatternClassification::HarmonicPattern => "HARMONIC_PATTERN",
            PatternClassification::MacroHarmonic => "MACRO_HARMONIC",
        }
    }

    pub fn is_macro(&self) -> bool {
        matches!(
            self,
            PatternClassification::MacroPattern | PatternClassification::MacroHarmonic
        )
    }
}

/// The central entity: a detected pattern with precomputed risk parameters,
/// advanced through its lifecycle by subsequent market data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Deterministic hash of (ds|strategy_id|symbol|pattern_name|bar_ts)
    pub signal_id: String,
    pub strategy_id: String,
    pub symbol: String,
    /// Date of the triggering bar
    pub ds: NaiveDate,
    pub asset_class: AssetClass,
    pub side: OrderSide,
    pub pattern_name: String,
    pub status: SignalStatus,

    pub entry_price: f64,
    pub suggested_stop: f64,
    pub invalidation_price: Option<f64>,
    pub take_profit_1: Option<f64>,
    pub take_profit_2: Option<f64>,
    pub take_profit_3: Option<f64>,

    pub pattern_duration_days: Option<i64>,
    pub pattern_span_days: Option<i64>,
    pub pattern_classification: Option<PatternClassification>,
    /// Ordered (by index) pivot snapshots anchoring the pattern
    pub structural_anchors: Vec<PivotSnapshot>,
    /// Fibonacci ratios for harmonic confluence, by ratio name
    pub harmonic_metadata: Option<BTreeMap<String, f64>>,

    pub confluence_factors: Vec<String>,
    /// Named numeric readings at emission time
    pub confluence_snapshot: BTreeMap<String, f64>,

    pub exit_reason: Option<ExitReason>,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub delete_at: Option<DateTime<Utc>>,
    /// Opaque notifier capability token; never interpreted or constructed here
    pub discord_thread_id: Option<String>,
    /// Last TP3 value a trail notification was emitted for (1% gate)
    pub tp3_last_notified: Option<f64>,
}

impl Signal {
    pub fn is_macro(&self) -> bool {
        self.pattern_classification
            .map(|c| c.is_macro())
            .unwrap_or(false)
    }
}

/// A signal rejected by a risk gate, retained for filter tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedSignal {
    pub signal: Signal,
    /// Name of the gate that rejected the signal
    pub rejection_reason: String,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Closed,
    Failed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<TradeStatus> {
        match s {
            "OPEN" => Some(TradeStatus::Open),
            "CLOSED" => Some(TradeStatus::Closed),
            "FAILED" => Some(TradeStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeType {
    Executed,
    Theoretical,
    RiskBlocked,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Executed => "EXECUTED",
            TradeType::Theoretical => "THEORETICAL",
            TradeType::RiskBlocked => "RISK_BLOCKED",
        }
    }

    pub fn from_str(s: &str) -> Option<TradeType> {
        match s {
            "EXECUTED" => Some(TradeType::Executed),
            "THEORETICAL" => Some(TradeType::Theoretical),
            "RISK_BLOCKED" => Some(TradeType::RiskBlocked),
            _ => None,
        }
    }
}

/// One partial close of a position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleOut {
    pub qty: f64,
    pub price: f64,
    pub ts: DateTime<Utc>,
    pub order_id: Option<String>,
}

/// Broker-side trade originating from a signal.
///
/// `position_id` equals the originating `signal_id` and is used as the broker
/// client-order-id, making submission idempotent end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub signal_id: String,
    pub ds: NaiveDate,
    pub symbol: String,
    pub asset_class: AssetClass,
    pub side: OrderSide,
    pub status: TradeStatus,
    pub trade_type: TradeType,

    /// Remaining quantity after scale-outs
    pub qty: f64,
    /// Quantity at entry, captured before the first scale-out
    pub original_qty: Option<f64>,

    pub target_entry_price: f64,
    pub entry_fill_price: Option<f64>,
    pub entry_slippage_pct: Option<f64>,
    pub filled_at: Option<DateTime<Utc>>,

    pub current_stop_loss: Option<f64>,
    pub alpaca_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub exit_order_id: Option<String>,

    pub exit_fill_price: Option<f64>,
    pub exit_slippage_pct: Option<f64>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,

    pub scaled_out_qty: f64,
    pub scaled_out_prices: Vec<ScaleOut>,
    pub breakeven_applied: bool,
    /// Exit fill could not be captured yet; sync fills it in later
    pub awaiting_backfill: bool,
    pub trailing_stop_final: Option<f64>,

    pub commission: Option<f64>,
    pub trade_duration_seconds: Option<i64>,
    pub realized_pnl_usd: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
    /// Gate name when trade_type is RISK_BLOCKED
    pub rejection_reason: Option<String>,
    pub failed_reason: Option<String>,

    pub discord_thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Position {
    /// Total quantity across scale-outs plus the remaining leg
    pub fn total_qty(&self) -> f64 {
        self.original_qty.unwrap_or(self.qty + self.scaled_out_qty)
    }
}

/// Summary of one reconciliation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub zombies: Vec<String>,
    pub orphans: Vec<String>,
    pub reconciled_count: usize,
    pub duration_seconds: f64,
    pub critical_issues: Vec<String>,
}

/// Lifecycle mutation produced by the exit checker
#[derive(Debug, Clone)]
pub struct LifecycleUpdate {
    pub signal: Signal,
    pub event: LifecycleEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Status moved along the lifecycle DAG
    StatusChanged,
    /// take_profit_3 trailed favorably; no status change
    TrailUpdated { previous_tp3: f64 },
}
