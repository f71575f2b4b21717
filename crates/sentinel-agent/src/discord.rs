use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use signal_core::{AssetClass, Notifier, Position, Signal};

/// Thread-keyed Discord webhook notifier.
///
/// Routing: in TEST mode every message lands on the single test sink. In
/// LIVE mode crypto and equity signals go to their class sinks while system
/// messages always go to the test sink. A missing sink URL yields None/no-op
/// and a critical log line, never an error.
pub struct DiscordNotifier {
    client: Client,
    test_webhook_url: String,
    crypto_webhook_url: String,
    equity_webhook_url: String,
    test_mode: bool,
    mock: bool,
}

impl DiscordNotifier {
    pub fn new(
        test_webhook_url: String,
        crypto_webhook_url: String,
        equity_webhook_url: String,
        test_mode: bool,
        mock: bool,
    ) -> Self {
        Self {
            client: Client::new(),
            test_webhook_url,
            crypto_webhook_url,
            equity_webhook_url,
            test_mode,
            mock,
        }
    }

    fn sink_for(&self, asset_class: Option<AssetClass>) -> Option<&str> {
        let url = if self.test_mode {
            &self.test_webhook_url
        } else {
            match asset_class {
                Some(AssetClass::Crypto) => &self.crypto_webhook_url,
                Some(AssetClass::Equity) => &self.equity_webhook_url,
                // System messages always go to the test sink
                None => &self.test_webhook_url,
            }
        };

        if url.is_empty() {
            tracing::error!(
                "CRITICAL: no Discord sink configured for {:?} (test_mode={})",
                asset_class,
                self.test_mode
            );
            None
        } else {
            Some(url)
        }
    }

    /// POST content to a webhook, optionally inside a thread or creating a
    /// named thread. Returns the thread token when one was created.
    async fn post(
        &self,
        url: &str,
        content: &str,
        thread_id: Option<&str>,
        thread_name: Option<&str>,
    ) -> Result<Option<String>> {
        if self.mock {
            tracing::info!("[MOCK DISCORD] {}", content);
            return Ok(Some("mock-thread".to_string()));
        }

        let mut full_url = format!("{url}?wait=true");
        if let Some(thread) = thread_id {
            full_url.push_str(&format!("&thread_id={thread}"));
        }

        let mut payload = json!({
            "content": content,
            "username": "Sentinel",
        });
        if let Some(name) = thread_name {
            payload["thread_name"] = json!(name);
        }

        let response = self.client.post(&full_url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Discord webhook returned {}: {}", status, body);
            return Ok(None);
        }

        // The created message carries the thread channel id when a thread
        // was opened; treat it as an opaque token.
        let body: serde_json::Value = response.json().await.unwrap_or(json!({}));
        Ok(body
            .get("channel_id")
            .and_then(|v| v.as_str())
            .map(String::from))
    }

    fn format_signal(signal: &Signal) -> String {
        let mut msg = format!(
            "**NEW SIGNAL: {}**\n\
             **Pattern**: {}\n\
             **Entry**: ${:.4}\n\
             **Stop**: ${:.4}\n",
            signal.symbol, signal.pattern_name, signal.entry_price, signal.suggested_stop
        );
        if let (Some(tp1), Some(tp2), Some(tp3)) = (
            signal.take_profit_1,
            signal.take_profit_2,
            signal.take_profit_3,
        ) {
            msg.push_str(&format!(
                "**Targets**: ${tp1:.4} / ${tp2:.4} / ${tp3:.4}\n"
            ));
        }
        if let Some(classification) = signal.pattern_classification {
            msg.push_str(&format!("**Class**: {}\n", classification.as_str()));
        }
        if !signal.confluence_factors.is_empty() {
            msg.push_str(&format!(
                "**Confluence**: {}\n",
                signal.confluence_factors.join(", ")
            ));
        }
        msg
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn send_signal(&self, signal: &Signal) -> Result<Option<String>> {
        let Some(url) = self.sink_for(Some(signal.asset_class)) else {
            return Ok(None);
        };
        let thread_name = format!("{} {}", signal.symbol, signal.pattern_name);
        self.post(url, &Self::format_signal(signal), None, Some(&thread_name))
            .await
    }

    async fn send_message(
        &self,
        content: &str,
        thread_id: Option<&str>,
        asset_class: Option<AssetClass>,
    ) -> Result<()> {
        let Some(url) = self.sink_for(asset_class) else {
            return Ok(());
        };
        self.post(url, content, thread_id, None).await?;
        Ok(())
    }

    async fn send_trail_update(
        &self,
        signal: &Signal,
        old_tp3: f64,
        asset_class: Option<AssetClass>,
    ) -> Result<()> {
        let new_tp3 = signal.take_profit_3.unwrap_or(0.0);
        let content = format!(
            "**TRAIL UPDATE: {}**\nRunner target moved ${old_tp3:.2} -> ${new_tp3:.2}",
            signal.symbol
        );
        self.send_message(&content, signal.discord_thread_id.as_deref(), asset_class)
            .await
    }

    async fn send_signal_update(&self, signal: &Signal) -> Result<()> {
        let mut content = format!(
            "**SIGNAL UPDATE: {}**\n**Status**: {}\n**Pattern**: {}\n",
            signal.symbol,
            signal.status.as_str(),
            signal.pattern_name
        );
        if let Some(reason) = signal.exit_reason {
            content.push_str(&format!("**Reason**: {}\n", reason.as_str()));
        }
        if signal.status == signal_core::SignalStatus::Tp1Hit {
            content.push_str("**Action**: Scaling out (50%) & stop -> breakeven");
        }

        match &signal.discord_thread_id {
            Some(thread) => {
                self.send_message(&content, Some(thread), Some(signal.asset_class))
                    .await
            }
            None => {
                // Orphaned signal: recover on the main channel instead of
                // opening a confusing new thread
                let recovery = format!(
                    "**THREAD RECOVERY: {}** (original thread unavailable)\n\n{}",
                    signal.symbol, content
                );
                self.send_message(&recovery, None, Some(signal.asset_class))
                    .await
            }
        }
    }

    async fn send_trade_close(
        &self,
        signal: &Signal,
        position: &Position,
        pnl_usd: f64,
        pnl_pct: f64,
        duration: &str,
        exit_reason: &str,
    ) -> Result<()> {
        let content = format!(
            "**TRADE CLOSED: {}**\n\
             **Reason**: {}\n\
             **P/L**: ${:.2} ({:+.2}%)\n\
             **Duration**: {}\n\
             **Qty**: {}",
            position.symbol, exit_reason, pnl_usd, pnl_pct, duration, position.total_qty()
        );
        self.send_message(
            &content,
            signal.discord_thread_id.as_deref(),
            Some(signal.asset_class),
        )
        .await
    }

    async fn send_shadow_signal(&self, signal: &Signal, rejection_reason: &str) -> Result<()> {
        let content = format!(
            "**SHADOW SIGNAL: {}** (not executed)\n\
             **Pattern**: {}\n\
             **Rejected by**: {}",
            signal.symbol, signal.pattern_name, rejection_reason
        );
        // Shadow traffic is diagnostic; it always goes to the test sink
        self.send_message(&content, None, None).await
    }
}
