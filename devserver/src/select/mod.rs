//! Devserver selection: subnet policy, build affinity, load balancing

pub mod least_loaded;
pub mod selector;

pub use selector::{DevServerSelector, Selectable};
