//! Chrome OS and Launch Control build names

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{DevServerError, Result};

/// Components of a Chrome OS build name such as `lumpy-release/R27-3837.0.0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBuildName {
    pub board: String,
    pub build_type: String,
    /// `None` for `LATEST` builds
    pub milestone: Option<String>,
    pub manifest: Option<String>,
}

fn build_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(trybot-)?(?P<board>[\w-]+?)(?:-chrome)?(?:-chromium)?-(?P<type>\w+)/(R(?P<milestone>\d+)-(?P<manifest>[\d.ab-]+)|LATEST)",
        )
        .expect("valid build name regex")
    })
}

/// Split a Chrome OS build name into board, build type, milestone and manifest
pub fn parse_build_name(name: &str) -> Result<ParsedBuildName> {
    let caps = build_name_regex()
        .captures(name)
        .ok_or_else(|| DevServerError::Configuration(format!("Unable to parse build name {}", name)))?;
    let group = |n: &str| caps.name(n).map(|m| m.as_str().to_string());
    Ok(ParsedBuildName {
        board: group("board").unwrap_or_default(),
        build_type: group("type").unwrap_or_default(),
        milestone: group("milestone"),
        manifest: group("manifest"),
    })
}

/// An Android/Brillo build identified by branch, target and build id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchControlBuild {
    pub branch: String,
    pub target: String,
    pub build_id: String,
}

fn target_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)-([^-]+)$").expect("valid target regex"))
}

impl LaunchControlBuild {
    pub fn new(branch: &str, target: &str, build_id: &str) -> Self {
        Self {
            branch: branch.to_string(),
            target: target.to_string(),
            build_id: build_id.to_string(),
        }
    }

    /// Split `branch/target/build_id`
    pub fn parse(name: &str) -> Option<Self> {
        let parts: Vec<&str> = name.split('/').collect();
        match parts.as_slice() {
            [branch, target, build_id] => Some(Self::new(branch, target, build_id)),
            _ => None,
        }
    }

    /// Board portion of the target, e.g. `shamu` for `shamu-userdebug`
    pub fn board(&self) -> &str {
        self.target.split('-').next().unwrap_or_default()
    }

    pub fn is_complete(&self) -> bool {
        !self.branch.is_empty() && !self.target.is_empty() && !self.build_id.is_empty()
    }

    pub fn is_latest(&self) -> bool {
        self.build_id.eq_ignore_ascii_case("LATEST")
    }

    /// Render through a `{branch}/{target}/{build_id}` style pattern
    pub fn render(&self, pattern: &str) -> String {
        pattern
            .replace("{branch}", &self.branch)
            .replace("{target}", &self.target)
            .replace("{build_id}", &self.build_id)
    }
}

/// Whether `build` names a Launch Control build rather than a Chrome OS one
pub fn is_launch_control_build(build: &str) -> bool {
    let Some(parsed) = LaunchControlBuild::parse(build) else {
        return false;
    };
    target_regex()
        .captures(&parsed.target)
        .and_then(|c| c.get(1))
        .is_some_and(|board| !board.as_str().is_empty())
}
