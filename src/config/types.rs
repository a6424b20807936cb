//! Configuration Types
//!
//! Every tunable of the agent stack: executable names, server supervision
//! timings, installer locations. All fields have defaults so a partial JSON
//! file only overrides what it names.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Default repository label when the host cannot be identified
pub const DEFAULT_REPOSITORY_LABEL: &str = "xUbuntu_22.04";

/// Longest server readiness window honoured
pub const MAX_START_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Primary agent (MEGAcmd) settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrimaryAgentConfig {
    /// Download command, invoked as `<get> <link> <destination>`
    pub get_binary: String,

    /// Background server executable
    pub server_binary: String,

    /// Extra arguments passed to the server on launch
    pub server_args: Vec<String>,

    /// Version probe executable
    pub version_binary: String,

    /// Product name expected in the version probe output
    pub product_name: String,

    /// Regex matched against full process command lines to find the server
    pub server_pattern: String,

    /// Value for `MEGACMD_CODEPAGE` in the server environment
    pub codepage: String,

    /// apt package providing the agent
    pub package: String,
}

impl Default for PrimaryAgentConfig {
    fn default() -> Self {
        Self {
            get_binary: "mega-get".to_string(),
            server_binary: "mega-cmd-server".to_string(),
            server_args: vec!["--debug-full".to_string()],
            version_binary: "mega-version".to_string(),
            product_name: "MEGAcmd".to_string(),
            server_pattern: "mega-cmd-server( |$)".to_string(),
            codepage: "UTF-8".to_string(),
            package: "megacmd".to_string(),
        }
    }
}

/// Fallback agent (megatools) settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackAgentConfig {
    /// Standalone download executable (preferred)
    pub dl_binary: String,

    /// Multiplexed executable, invoked as `<binary> dl ...`
    pub multi_binary: String,

    /// apt package providing the agent
    pub package: String,
}

impl Default for FallbackAgentConfig {
    fn default() -> Self {
        Self {
            dl_binary: "megatools-dl".to_string(),
            multi_binary: "megatools".to_string(),
            package: "megatools".to_string(),
        }
    }
}

/// Background server supervision settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Server working/log directory (mode 700)
    pub log_dir: PathBuf,

    /// Log file name inside `log_dir`
    pub log_file: String,

    /// Readiness timeout in seconds
    pub start_timeout_secs: f64,

    /// Readiness poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Number of log lines surfaced when the server fails to come up
    pub log_tail_lines: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            log_file: "megacmdserver.log".to_string(),
            start_timeout_secs: 25.0,
            poll_interval_ms: 500,
            log_tail_lines: 200,
        }
    }
}

impl ServerConfig {
    /// Full path of the server log file
    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(&self.log_file)
    }

    /// Readiness window; negative or NaN is zero, anything past
    /// [`MAX_START_TIMEOUT`] (including infinity) is clamped to it.
    pub fn start_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.start_timeout_secs.max(0.0))
            .map_or(MAX_START_TIMEOUT, |timeout| timeout.min(MAX_START_TIMEOUT))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Package installer settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstallerConfig {
    /// OS identification file
    pub os_release_path: PathBuf,

    /// Label used when the OS cannot be matched
    pub default_repository_label: String,

    /// Vendor repository base URL; the label is appended
    pub repository_base_url: String,

    /// Where the dearmored signing key is written
    pub keyring_path: PathBuf,

    /// apt source list entry for the vendor repository
    pub source_list_path: PathBuf,

    /// Packages installed before registering the vendor repository
    pub prerequisites: Vec<String>,

    /// Privilege escalation prefix (empty when already root)
    pub sudo: String,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            os_release_path: PathBuf::from("/etc/os-release"),
            default_repository_label: DEFAULT_REPOSITORY_LABEL.to_string(),
            repository_base_url: "https://mega.nz/linux/repo".to_string(),
            keyring_path: PathBuf::from("/usr/share/keyrings/meganz-archive-keyring.gpg"),
            source_list_path: PathBuf::from("/etc/apt/sources.list.d/megacmd.list"),
            prerequisites: [
                "gnupg2",
                "ca-certificates",
                "curl",
                "apt-transport-https",
                "lsb-release",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sudo: "sudo".to_string(),
        }
    }
}

/// Runner settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// How long to keep draining output after the agent exits (ms)
    pub drain_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            drain_grace_ms: 2000,
        }
    }
}

impl RunnerConfig {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

/// Root configuration file structure
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub primary: PrimaryAgentConfig,
    pub fallback: FallbackAgentConfig,
    pub server: ServerConfig,
    pub installer: InstallerConfig,
    pub runner: RunnerConfig,
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/root"))
        .join(".megaCmd")
}
