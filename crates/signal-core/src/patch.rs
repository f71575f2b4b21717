use crate::types::{ExitReason, SignalStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Partial update for a signal. Only set fields are persisted; the store
/// builds its SET clause from whatever is present here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SignalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_stop: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_3: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp3_last_notified: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discord_thread_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl SignalPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.exit_reason.is_none()
            && self.suggested_stop.is_none()
            && self.take_profit_3.is_none()
            && self.tp3_last_notified.is_none()
            && self.discord_thread_id.is_none()
            && self.closed_at.is_none()
    }
}
