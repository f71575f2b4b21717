pub mod jobs;
pub mod positions;
pub mod signals;

pub use jobs::JobLockRepository;
pub use positions::PositionRepository;
pub use signals::SignalRepository;

/// Collection naming is environment-aware: `live_*` in PROD, `test_*`
/// everywhere else.
pub fn table_prefix(environment: &str) -> &'static str {
    if environment.eq_ignore_ascii_case("PROD") {
        "live_"
    } else {
        "test_"
    }
}

#[cfg(test)]
pub(crate) async fn test_pool() -> sqlx::AnyPool {
    sqlx::any::install_default_drivers();
    sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite")
}
