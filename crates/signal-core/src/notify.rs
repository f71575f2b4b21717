use crate::types::{AssetClass, Position, Signal};
use anyhow::Result;
use async_trait::async_trait;

/// Thread-keyed lifecycle messaging contract.
///
/// The thread id is an opaque capability token returned by the channel; it is
/// stored on the signal and replayed on later sends, never interpreted.
/// Implementations route crypto vs equity traffic to class-specific sinks in
/// LIVE mode and collapse everything onto a single test sink in TEST mode.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce a new signal; returns the thread token for lifecycle updates
    async fn send_signal(&self, signal: &Signal) -> Result<Option<String>>;

    /// Free-form message, optionally inside an existing thread
    async fn send_message(
        &self,
        content: &str,
        thread_id: Option<&str>,
        asset_class: Option<AssetClass>,
    ) -> Result<()>;

    /// Trailing-stop (TP3) movement update
    async fn send_trail_update(
        &self,
        signal: &Signal,
        old_tp3: f64,
        asset_class: Option<AssetClass>,
    ) -> Result<()>;

    /// Lifecycle status change on an existing signal
    async fn send_signal_update(&self, signal: &Signal) -> Result<()>;

    /// Terminal trade summary
    #[allow(clippy::too_many_arguments)]
    async fn send_trade_close(
        &self,
        signal: &Signal,
        position: &Position,
        pnl_usd: f64,
        pnl_pct: f64,
        duration: &str,
        exit_reason: &str,
    ) -> Result<()>;

    /// Would-be signal rejected by a risk gate (never executed)
    async fn send_shadow_signal(&self, signal: &Signal, rejection_reason: &str) -> Result<()>;
}
