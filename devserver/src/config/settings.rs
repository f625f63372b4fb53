//! Settings file management

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::DevServerError;
use crate::filesys::File;
use crate::logs::LogLevel;

/// Devserver client settings.
///
/// Loaded once at start-up and shared read-only; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerConfig {
    #[serde(default)]
    pub log_level: LogLevel,

    /// Base URLs of the image devservers
    #[serde(default)]
    pub dev_servers: Vec<String>,

    /// Base URLs of the crash (symbolication) servers
    #[serde(default)]
    pub crash_servers: Vec<String>,

    /// Subnets whose DUTs must use a devserver inside the same subnet
    #[serde(default)]
    pub restricted_subnets: Vec<RestrictedSubnet>,

    /// Static hostname -> IP overrides, consulted before DNS
    #[serde(default)]
    pub hostname_addr_map: BTreeMap<String, String>,

    #[serde(default)]
    pub skip_devserver_health_check: bool,

    /// Prefer a devserver in the same /19 as the DUT, falling back to any
    #[serde(default)]
    pub prefer_local_devserver: bool,

    /// Run every RPC as `ssh <devserver> curl <url>`
    #[serde(default)]
    pub enable_ssh_connection_for_devserver: bool,

    #[serde(default = "default_image_storage_server")]
    pub image_storage_server: String,

    #[serde(default = "default_canary_channel_server")]
    pub canary_channel_server: String,

    /// Artifact whose presence switches the archive URL to the canary channel
    #[serde(default = "default_factory_artifact")]
    pub factory_artifact: String,

    /// Image URL template with `{devserver}` and `{image}` placeholders
    #[serde(default = "default_image_url_pattern")]
    pub image_url_pattern: String,

    /// Launch Control build name template with `{branch}`, `{target}`, `{build_id}`
    #[serde(default = "default_android_build_name_pattern")]
    pub android_build_name_pattern: String,
}

fn default_image_storage_server() -> String {
    "gs://chromeos-image-archive/".to_string()
}

fn default_canary_channel_server() -> String {
    "gs://chromeos-releases/".to_string()
}

fn default_factory_artifact() -> String {
    "factory_image".to_string()
}

fn default_image_url_pattern() -> String {
    "{devserver}/update/{image}".to_string()
}

fn default_android_build_name_pattern() -> String {
    "{branch}/{target}/{build_id}".to_string()
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            dev_servers: Vec::new(),
            crash_servers: Vec::new(),
            restricted_subnets: Vec::new(),
            hostname_addr_map: BTreeMap::new(),
            skip_devserver_health_check: false,
            prefer_local_devserver: false,
            enable_ssh_connection_for_devserver: false,
            image_storage_server: default_image_storage_server(),
            canary_channel_server: default_canary_channel_server(),
            factory_artifact: default_factory_artifact(),
            image_url_pattern: default_image_url_pattern(),
            android_build_name_pattern: default_android_build_name_pattern(),
        }
    }
}

impl DevServerConfig {
    /// Load and validate a JSON settings file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DevServerError> {
        let config: DevServerConfig = File::new(path.as_ref()).read_json().await?;
        config.validate()?;
        Ok(config)
    }

    /// Every server URL must carry a hostname
    pub fn validate(&self) -> Result<(), DevServerError> {
        for server in self.dev_servers.iter().chain(self.crash_servers.iter()) {
            let has_host = url::Url::parse(server)
                .ok()
                .and_then(|u| u.host_str().map(|h| !h.is_empty()))
                .unwrap_or(false);
            if !has_host {
                return Err(DevServerError::Configuration(format!(
                    "server url has no hostname: {}",
                    server
                )));
            }
        }
        Ok(())
    }

    /// Reverse lookup through the static address map.
    ///
    /// The map is ordered, so when several names share an IP the
    /// lexically first one wins.
    pub fn hostname_for_ip(&self, ip: &str) -> Option<&str> {
        self.hostname_addr_map
            .iter()
            .find(|(_, addr)| addr.as_str() == ip)
            .map(|(name, _)| name.as_str())
    }
}

/// One restricted subnet, written `ip/bits` (legacy `ip:bits` also accepted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RestrictedSubnet {
    pub ip: Ipv4Addr,
    pub mask_bits: u8,
}

impl RestrictedSubnet {
    pub fn new(ip: Ipv4Addr, mask_bits: u8) -> Result<Self, DevServerError> {
        if mask_bits > 32 {
            return Err(DevServerError::InvalidAddress(format!(
                "mask bits out of range: {}",
                mask_bits
            )));
        }
        Ok(Self { ip, mask_bits })
    }
}

impl std::str::FromStr for RestrictedSubnet {
    type Err = DevServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, bits) = s
            .trim()
            .split_once('/')
            .or_else(|| s.trim().split_once(':'))
            .ok_or_else(|| DevServerError::InvalidAddress(format!("not a subnet: {}", s)))?;
        let ip: Ipv4Addr = ip
            .parse()
            .map_err(|_| DevServerError::InvalidAddress(format!("not an IPv4 address: {}", ip)))?;
        let bits: u8 = bits
            .parse()
            .map_err(|_| DevServerError::InvalidAddress(format!("bad mask bits: {}", bits)))?;
        Self::new(ip, bits)
    }
}

impl TryFrom<String> for RestrictedSubnet {
    type Error = DevServerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RestrictedSubnet> for String {
    fn from(value: RestrictedSubnet) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RestrictedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.mask_bits)
    }
}
