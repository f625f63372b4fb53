//! Lab configuration consumed by the devserver client

pub mod settings;

pub use settings::{DevServerConfig, RestrictedSubnet};
