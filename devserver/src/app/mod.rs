//! Wiring and command-line entry points

pub mod context;
pub mod run;

pub use context::LabContext;
