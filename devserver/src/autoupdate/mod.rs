//! Multi-attempt Chrome OS auto-update through a devserver

pub mod classify;
pub mod fsm;
pub mod orchestrator;

pub use classify::{classify_exceptions, is_retryable_error, parse_au_error};
pub use fsm::{AuAttemptFsm, AuEvent, AuState, RetryBudget};
pub use orchestrator::{AuProcessHandle, AutoUpdateOptions, AutoUpdateOrchestrator, AutoUpdateOutcome};
