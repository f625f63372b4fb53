//! Two-phase artifact staging: `stage` then poll `is_staged`

pub mod coordinator;
pub mod request;

pub use coordinator::{StagingCoordinator, StagingOptions};
pub use request::{OsParams, StagingRequest};
