pub mod error;
pub mod ids;
pub mod notify;
pub mod patch;
pub mod types;

pub use error::*;
pub use ids::*;
pub use notify::*;
pub use patch::*;
pub use types::*;
