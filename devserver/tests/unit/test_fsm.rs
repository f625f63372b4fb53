//! FSM unit tests

use devserver_client::autoupdate::{AuAttemptFsm, AuEvent, AuState};

#[test]
fn test_fsm_initial_state() {
    let fsm = AuAttemptFsm::new(2);
    assert_eq!(fsm.state(), AuState::Pending);
    assert_eq!(fsm.budget().attempts_made, 0);
    assert!(fsm.budget().per_attempt_errors.is_empty());
    assert!(fsm.pid().is_none());
    assert!(!fsm.is_terminal());
}

#[test]
fn test_fsm_update_success_flow() {
    let mut fsm = AuAttemptFsm::new(2);

    // Pending -> Triggering
    fsm.process(AuEvent::Trigger).unwrap();
    assert_eq!(fsm.state(), AuState::Triggering);

    // Triggering -> Polling
    fsm.process(AuEvent::Accepted { pid: 1234 }).unwrap();
    assert_eq!(fsm.state(), AuState::Polling);
    assert_eq!(fsm.pid(), Some(1234));

    // Polling -> Succeeded
    fsm.process(AuEvent::Finished).unwrap();
    assert_eq!(fsm.state(), AuState::Succeeded);
    assert!(fsm.is_terminal());
    assert!(!fsm.can_retry());
}

#[test]
fn test_fsm_failed_attempt_then_retry() {
    let mut fsm = AuAttemptFsm::new(2);

    fsm.process(AuEvent::Trigger).unwrap();
    fsm.process(AuEvent::AttemptFailed(Some("first".into()))).unwrap();
    assert_eq!(fsm.state(), AuState::AttemptFailed);
    assert!(fsm.can_retry());

    fsm.process(AuEvent::Trigger).unwrap();
    assert_eq!(fsm.budget().attempts_made, 2);
    assert!(fsm.pid().is_none());
    fsm.process(AuEvent::Accepted { pid: 7 }).unwrap();
    fsm.process(AuEvent::AttemptFailed(Some("second".into()))).unwrap();

    assert!(!fsm.can_retry());
    assert_eq!(fsm.budget().per_attempt_errors, vec!["first".to_string(), "second".to_string()]);

    // Out of attempts
    assert!(fsm.process(AuEvent::Trigger).is_err());
    fsm.process(AuEvent::GiveUp).unwrap();
    assert_eq!(fsm.state(), AuState::Terminal);
    assert!(!fsm.retry_elsewhere());
}

#[test]
fn test_fsm_retry_elsewhere_stops_early() {
    let mut fsm = AuAttemptFsm::new(3);

    fsm.process(AuEvent::Trigger).unwrap();
    fsm.process(AuEvent::AttemptFailed(Some("host is not pingable".into()))).unwrap();
    fsm.process(AuEvent::RetryElsewhere).unwrap();

    assert_eq!(fsm.state(), AuState::Terminal);
    assert!(fsm.retry_elsewhere());
    assert!(!fsm.can_retry());
    assert_eq!(fsm.budget().attempts_made, 1);
}

#[test]
fn test_fsm_failure_without_error_is_not_recorded() {
    let mut fsm = AuAttemptFsm::new(2);

    fsm.process(AuEvent::Trigger).unwrap();
    fsm.process(AuEvent::Accepted { pid: 9 }).unwrap();
    fsm.process(AuEvent::AttemptFailed(None)).unwrap();

    assert_eq!(fsm.state(), AuState::AttemptFailed);
    assert!(fsm.budget().per_attempt_errors.is_empty());
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = AuAttemptFsm::new(2);

    // Can't accept before triggering
    assert!(fsm.process(AuEvent::Accepted { pid: 1 }).is_err());

    // Can't finish from Pending
    assert!(fsm.process(AuEvent::Finished).is_err());

    // Can't finish before the devserver accepted
    fsm.process(AuEvent::Trigger).unwrap();
    assert!(fsm.process(AuEvent::Finished).is_err());
    assert_eq!(fsm.state(), AuState::Triggering);
}

#[test]
fn test_fsm_terminal_rejects_everything() {
    let mut fsm = AuAttemptFsm::new(2);
    fsm.process(AuEvent::Trigger).unwrap();
    fsm.process(AuEvent::Accepted { pid: 1 }).unwrap();
    fsm.process(AuEvent::Finished).unwrap();

    assert!(fsm.process(AuEvent::Trigger).is_err());
    assert!(fsm.process(AuEvent::AttemptFailed(None)).is_err());
    assert!(fsm.process(AuEvent::GiveUp).is_err());
    assert_eq!(fsm.state(), AuState::Succeeded);
}

#[test]
fn test_state_serialization() {
    let json = serde_json::to_string(&AuState::AttemptFailed).unwrap();
    assert_eq!(json, "\"attempt_failed\"");
}
