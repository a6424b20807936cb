//! OS Process Capabilities
//!
//! Narrow interfaces over the impure parts of agent management so the
//! supervisor, installer and orchestrator can run against fakes:
//!
//! - [`ProcessControl`]: name-matched liveness, version probe, detached
//!   launch, termination
//! - [`CommandRunner`]: `PATH` lookup and shell command execution
//!
//! [`SystemProcesses`] is the real implementation.

mod system;

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use regex::Regex;

pub use system::SystemProcesses;

/// Result of the agent's version probe
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeResult {
    /// Probe exited with status 0
    pub success: bool,
    /// Combined stdout and stderr
    pub output: String,
}

impl ProbeResult {
    /// Healthy when the probe succeeded or its output names the product
    pub fn is_healthy(&self, product_name: &str) -> bool {
        self.success || self.output.contains(product_name)
    }
}

/// A process to launch detached with output appended to a log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub log_path: PathBuf,
}

/// Output of a finished command
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal or never started
    pub status: Option<i32>,
    /// Combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Process supervision capability used by the server supervisor
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Whether any process command line matches `pattern`
    fn is_running(&self, pattern: &Regex) -> bool;

    /// Run the version probe executable
    async fn probe_version(&self, program: &str) -> ProbeResult;

    /// Launch a process detached from this one
    async fn start_detached(&self, spec: &LaunchSpec) -> io::Result<()>;

    /// Terminate every process matching `pattern`, returning how many were signalled
    fn kill_matching(&self, pattern: &Regex) -> usize;
}

/// Command execution capability used by the installer
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Resolve an executable on `PATH`
    fn which(&self, program: &str) -> Option<PathBuf>;

    /// Run a command line through `sh -c`
    async fn run_shell(&self, command: &str) -> CommandOutput;
}
