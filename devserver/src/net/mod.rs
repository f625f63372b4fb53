//! Subnet matching and hostname resolution

pub mod resolver;
pub mod subnet;

pub use resolver::{Resolver, SystemResolver};
pub use subnet::{ip_in_subnet, SubnetMatcher};
