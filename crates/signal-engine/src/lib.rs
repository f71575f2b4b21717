pub mod generator;
pub mod lifecycle;
pub mod parameters;

pub use generator::{select_primary_pattern, GeneratorConfig, SignalGenerator};
pub use lifecycle::check_exits;
pub use parameters::SignalParameterFactory;
