//! Devserver Client Library
//!
//! Selection, health checking, artifact staging and DUT auto-update against a
//! fleet of lab devservers.

pub mod app;
pub mod autoupdate;
pub mod config;
pub mod constants;
pub mod endpoint;
pub mod errors;
pub mod filesys;
pub mod health;
pub mod http;
pub mod logs;
pub mod net;
pub mod select;
pub mod servers;
pub mod staging;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod utils;
