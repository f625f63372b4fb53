//! Auto-update failure classification

use std::sync::OnceLock;

use regex::Regex;

/// Known failure messages and the label each one reports under.
/// Matched against the start of the message, in order.
const EXCEPTION_PATTERNS: &[(&str, &str)] = &[
    (
        r".*Devserver portfile does not exist!.*$",
        "(1) Devserver portfile does not exist on host",
    ),
    (r".*Could not copy .* to device.*$", "(2) Cannot copy packages to host"),
    (
        r".*cwd=None, extra env=\{'LC_MESSAGES': 'C'\}.*$",
        "(3) Fail to run specific command on host",
    ),
    (
        r".*RootfsUpdateError: Build .* failed to boot on.*$",
        "(4) Build failed to boot on host",
    ),
    (
        r".*The CrOS auto-update process is timed out, thus will be terminated.*$",
        "(5) Auto-update is timed out",
    ),
    (
        r".*DeviceNotPingableError.*$",
        "(6) Host is not pingable during auto-update",
    ),
    (
        r".*Update failed with unexpected update status: UPDATE_STATUS_IDLE.*$",
        "(7) Host has unexpected status: UPDATE_STATUS_IDLE after rootfs update",
    ),
    (
        r".*No JSON object could be decoded.*$",
        "(8) Devserver returned non-json object",
    ),
    (
        r".*SSHConnectionError: .* port 22: Connection timed out.*$",
        "(9) Devserver lost host's ssh connection",
    ),
    (
        r".*Write failed: Broken pipe.*$",
        "(10) Broken pipe while writing or connecting to host",
    ),
];

const UNKNOWN_EXCEPTION: &str = "(0) Unknown exception";

/// Substrings that mean the devserver, not the DUT, is the likely culprit
const RETRYABLE_ERRORS: &[&str] = &["No JSON object could be decoded", "is not pingable"];

fn patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        EXCEPTION_PATTERNS
            .iter()
            .map(|(pattern, label)| {
                let anchored = format!("^(?:{})", pattern);
                (Regex::new(&anchored).expect("valid exception pattern"), *label)
            })
            .collect()
    })
}

/// Label for the first recorded error; empty when nothing was recorded
pub fn classify_exceptions(errors: &[String]) -> String {
    let Some(target) = errors.first() else {
        return String::new();
    };
    patterns()
        .iter()
        .find(|(re, _)| re.is_match(target))
        .map(|(_, label)| label.to_string())
        .unwrap_or_else(|| UNKNOWN_EXCEPTION.to_string())
}

/// Whether `error_msg` should send the caller to a different devserver
pub fn is_retryable_error(error_msg: &str) -> bool {
    RETRYABLE_ERRORS.iter().any(|e| error_msg.contains(e))
}

/// Last line of a devserver-side auto-update error
pub fn parse_au_error(error_msg: &str) -> String {
    error_msg.split('\n').last().unwrap_or_default().to_string()
}
