// Timing budgets, thresholds and wire literals shared by the devserver client

use std::time::Duration;

/// Budget for staging RPCs and for the `is_staged` poll (100 minutes)
pub const DEVSERVER_IS_STAGING_RETRY: Duration = Duration::from_secs(100 * 60);

/// Budget for short RPCs such as `check_health` and ssh calls (1 minute)
pub const DEVSERVER_SSH_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-request timeout when the caller does not supply one
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval between `is_staged` polls
pub const ARTIFACT_STAGE_POLLING_INTERVAL: Duration = Duration::from_secs(5);

/// Budget for a DUT auto-update to finish (100 minutes)
pub const DEVSERVER_IS_CROS_AU_FINISHED_TIMEOUT: Duration = Duration::from_secs(100 * 60);

/// Attempts made by one `auto_update` call against one devserver
pub const AU_RETRY_LIMIT: u32 = 2;

/// Interval between `get_au_status` polls
pub const CROS_AU_POLLING_INTERVAL: Duration = Duration::from_secs(10);

/// Pause between two auto-update attempts
pub const CROS_AU_RETRY_INTERVAL: Duration = Duration::from_secs(20);

/// Hard timeout for each parallel load probe
pub const TIMEOUT_GET_DEVSERVER_LOAD: Duration = Duration::from_secs(2);

/// Minimum back-off after the proxy reports overload
pub const OVERLOAD_COOLDOWN: Duration = Duration::from_secs(30);

/// Subnet width used when preferring a local devserver
pub const DEFAULT_SUBNET_MASKBIT: u8 = 19;

/// Health thresholds
pub const MIN_FREE_DISK_SPACE_GB: f64 = 20.0;
pub const MAX_APACHE_CLIENT_COUNT: u64 = 75;
pub const MAX_CPU_LOAD: f64 = 80.0;
pub const MAX_NETWORK_IO: f64 = 1024.0 * 1024.0 * 80.0;

/// Literal body of a successful staging RPC
pub const SUCCESS: &str = "Success";

/// Substring the proxy in front of a devserver returns when it is overloaded
pub const ERR_MSG_FOR_INVALID_DEVSERVER_RESPONSE: &str = "Proxy Error";

/// Substring of ssh/curl output that carries a devserver-side exception
pub const DOWNLOADER_EXCEPTION: &str = "DownloaderException";

/// Artifact sets
pub const ARTIFACTS_TO_BE_STAGED_FOR_IMAGE: &[&str] = &["full_payload", "test_suites", "stateful"];
pub const ARTIFACTS_TO_BE_STAGED_FOR_IMAGE_WITH_AUTOTEST: &[&str] = &[
    "full_payload",
    "test_suites",
    "control_files",
    "stateful",
    "autotest_packages",
];

/// Per-build dependency info file staged with the test suites
pub const DEPENDENCIES_FILE: &str = "test_suites/dependency_info";

/// Subdirectory of a job log dir that receives auto-update logs
pub const AUTO_UPDATE_LOG_DIR: &str = "autoupdate_logs";

/// Discriminator sent for Launch Control (Android/Brillo) builds
pub const OS_TYPE_ANDROID: &str = "android";
