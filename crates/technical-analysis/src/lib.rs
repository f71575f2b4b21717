pub mod analyzer;
pub mod harmonics;
pub mod indicators;
pub mod patterns;
pub mod pivots;
pub mod structural;

#[cfg(test)]
mod indicators_tests;

pub use analyzer::{BarAnalysis, PatternAnalyzer};
pub use harmonics::{HarmonicAnalyzer, HarmonicKind, HarmonicPattern};
pub use indicators::IndicatorFrame;
pub use pivots::{fast_pip, find_pivots};
pub use structural::{PatternMeta, StructuralSet};
