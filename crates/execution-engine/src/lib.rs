pub mod engine;
pub mod fees;
pub mod reconciler;
pub mod symbols;

#[cfg(test)]
mod test_support;

pub use engine::{ExecutionConfig, ExecutionEngine, ExecutionMode};
pub use fees::estimate_crypto_fee;
pub use reconciler::StateReconciler;
pub use symbols::normalize_broker_symbol;
