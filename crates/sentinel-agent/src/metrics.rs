use std::collections::HashMap;
use std::time::Instant;

/// Per-run telemetry for the signal agent: cycle counters plus per-operation
/// success/failure timing, emitted as a structured summary at the end of the
/// run.
pub struct AgentMetrics {
    pub symbols_processed: u64,
    pub signals_found: u64,
    pub signals_rejected: u64,
    pub lifecycle_updates: u64,
    pub trades_executed: u64,
    pub errors_encountered: u64,

    operations: HashMap<String, OperationStats>,
}

#[derive(Default)]
struct OperationStats {
    success_count: u64,
    failure_count: u64,
    total_duration_secs: f64,
    max_duration_secs: f64,
}

impl AgentMetrics {
    pub fn new() -> Self {
        Self {
            symbols_processed: 0,
            signals_found: 0,
            signals_rejected: 0,
            lifecycle_updates: 0,
            trades_executed: 0,
            errors_encountered: 0,
            operations: HashMap::new(),
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_success(&mut self, operation: &str, start: Instant) {
        let stats = self.operations.entry(operation.to_string()).or_default();
        let elapsed = start.elapsed().as_secs_f64();
        stats.success_count += 1;
        stats.total_duration_secs += elapsed;
        stats.max_duration_secs = stats.max_duration_secs.max(elapsed);
    }

    pub fn record_failure(&mut self, operation: &str, start: Instant) {
        let stats = self.operations.entry(operation.to_string()).or_default();
        stats.failure_count += 1;
        stats.total_duration_secs += start.elapsed().as_secs_f64();
    }

    pub fn success_rate(&self, operation: &str) -> f64 {
        match self.operations.get(operation) {
            Some(stats) => {
                let total = stats.success_count + stats.failure_count;
                if total == 0 {
                    0.0
                } else {
                    stats.success_count as f64 / total as f64 * 100.0
                }
            }
            None => 0.0,
        }
    }

    pub fn log_summary(&self, total_duration_secs: f64) {
        tracing::info!(
            symbols_processed = self.symbols_processed,
            signals_found = self.signals_found,
            signals_rejected = self.signals_rejected,
            lifecycle_updates = self.lifecycle_updates,
            trades_executed = self.trades_executed,
            errors = self.errors_encountered,
            total_duration_secs = format!("{:.1}", total_duration_secs),
            "Run summary"
        );

        for (operation, stats) in &self.operations {
            let total = stats.success_count + stats.failure_count;
            let avg = if total > 0 {
                stats.total_duration_secs / total as f64
            } else {
                0.0
            };
            tracing::info!(
                operation = operation.as_str(),
                total_ops = total,
                success_rate = format!("{:.1}%", self.success_rate(operation)),
                avg_duration_secs = format!("{:.2}", avg),
                max_duration_secs = format!("{:.2}", stats.max_duration_secs),
                "Operation metrics"
            );
        }
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}
