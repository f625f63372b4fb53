//! Finite State Machine for one `auto_update` call

use serde::{Deserialize, Serialize};

use crate::constants::AU_RETRY_LIMIT;

/// Auto-update state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuState {
    /// No attempt made yet
    Pending,

    /// `cros_au` issued
    Triggering,

    /// Waiting on `get_au_status`
    Polling,

    Succeeded,

    /// The last attempt failed; another may follow
    AttemptFailed,

    /// Gave up on this devserver
    Terminal,
}

/// Auto-update event
#[derive(Debug, Clone)]
pub enum AuEvent {
    /// Start a new attempt
    Trigger,

    /// The devserver started an update process
    Accepted { pid: u32 },

    /// The attempt failed, with the error to record if there is one
    AttemptFailed(Option<String>),

    /// Polling finished and cleanup succeeded
    Finished,

    /// Stop here and let the caller pick another devserver
    RetryElsewhere,

    /// Out of attempts
    GiveUp,
}

/// Attempts made so far and the error recorded by each failing one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    pub attempts_made: u32,
    pub attempts_limit: u32,
    pub per_attempt_errors: Vec<String>,
}

impl RetryBudget {
    pub fn new(attempts_limit: u32) -> Self {
        Self {
            attempts_made: 0,
            attempts_limit,
            per_attempt_errors: Vec::new(),
        }
    }

    pub fn exhausted(&self) -> bool {
        self.attempts_made >= self.attempts_limit
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self::new(AU_RETRY_LIMIT)
    }
}

/// Auto-update FSM
#[derive(Debug, Clone)]
pub struct AuAttemptFsm {
    state: AuState,
    budget: RetryBudget,
    pid: Option<u32>,
    retry_elsewhere: bool,
}

impl AuAttemptFsm {
    pub fn new(attempts_limit: u32) -> Self {
        Self {
            state: AuState::Pending,
            budget: RetryBudget::new(attempts_limit),
            pid: None,
            retry_elsewhere: false,
        }
    }

    pub fn state(&self) -> AuState {
        self.state
    }

    pub fn budget(&self) -> &RetryBudget {
        &self.budget
    }

    /// Devserver-side pid of the current attempt
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn retry_elsewhere(&self) -> bool {
        self.retry_elsewhere
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, AuState::Succeeded | AuState::Terminal)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: AuEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (AuState::Pending | AuState::AttemptFailed, AuEvent::Trigger) => {
                if self.budget.exhausted() {
                    return Err(format!(
                        "No auto-update attempts left ({} of {} used)",
                        self.budget.attempts_made, self.budget.attempts_limit
                    ));
                }
                self.budget.attempts_made += 1;
                self.pid = None;
                AuState::Triggering
            }

            (AuState::Triggering, AuEvent::Accepted { pid }) => {
                self.pid = Some(*pid);
                AuState::Polling
            }

            (AuState::Triggering | AuState::Polling, AuEvent::AttemptFailed(err)) => {
                if let Some(err) = err {
                    self.budget.per_attempt_errors.push(err.clone());
                }
                AuState::AttemptFailed
            }

            (AuState::Polling, AuEvent::Finished) => AuState::Succeeded,

            (AuState::AttemptFailed, AuEvent::RetryElsewhere) => {
                self.retry_elsewhere = true;
                AuState::Terminal
            }
            (AuState::AttemptFailed, AuEvent::GiveUp) => AuState::Terminal,

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }

    /// Check if another attempt may run on the same devserver
    pub fn can_retry(&self) -> bool {
        self.state == AuState::AttemptFailed && !self.retry_elsewhere && !self.budget.exhausted()
    }
}

impl Default for AuAttemptFsm {
    fn default() -> Self {
        Self::new(AU_RETRY_LIMIT)
    }
}
