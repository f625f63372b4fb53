//! Devserver load snapshots and health policy

pub mod checker;
pub mod load;

pub use checker::HealthChecker;
pub use load::LoadSnapshot;
