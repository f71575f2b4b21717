pub mod base;
pub mod expired;
pub mod fees;
pub mod rejected;
pub mod snapshot;
pub mod strategy;
pub mod trades;

pub use base::{AnalyticsStore, ArchivalPipeline};
pub use expired::ExpiredSignalArchivalPipeline;
pub use fees::FeePatchPipeline;
pub use rejected::RejectedSignalArchivalPipeline;
pub use snapshot::AccountSnapshotPipeline;
pub use strategy::{StrategyDefinition, StrategySyncPipeline};
pub use trades::TradeArchivalPipeline;
