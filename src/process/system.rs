//! Real process capabilities backed by `sysinfo` and `tokio::process`.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, Signal, System, UpdateKind};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CommandOutput, CommandRunner, LaunchSpec, ProbeResult, ProcessControl};

/// Upper bound for a single version probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Process capabilities of the local host
#[derive(Debug, Default, Clone)]
pub struct SystemProcesses;

impl SystemProcesses {
    pub fn new() -> Self {
        Self
    }

    /// Snapshot of current processes with their command lines.
    fn snapshot() -> System {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always),
        );
        system
    }

    /// Pids whose full command line matches `pattern`, excluding ourselves
    /// and threads.
    fn matching_pids(system: &System, pattern: &Regex) -> Vec<Pid> {
        let own_pid = sysinfo::get_current_pid().ok();

        system
            .processes()
            .iter()
            .filter(|(pid, _)| Some(**pid) != own_pid)
            // Linux lists each thread as well; only whole processes count
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(_, process)| {
                let cmdline = process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                if cmdline.is_empty() {
                    pattern.is_match(&process.name().to_string_lossy())
                } else {
                    pattern.is_match(&cmdline)
                }
            })
            .map(|(pid, _)| *pid)
            .collect()
    }
}

fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut output = String::from_utf8_lossy(stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(stderr));
    output
}

#[async_trait]
impl ProcessControl for SystemProcesses {
    fn is_running(&self, pattern: &Regex) -> bool {
        let system = Self::snapshot();
        !Self::matching_pids(&system, pattern).is_empty()
    }

    async fn probe_version(&self, program: &str) -> ProbeResult {
        let child = Command::new(program)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(PROBE_TIMEOUT, child).await {
            Ok(Ok(out)) => ProbeResult {
                success: out.status.success(),
                output: combine_output(&out.stdout, &out.stderr),
            },
            Ok(Err(e)) => {
                debug!("[process] Version probe '{}' failed to run: {}", program, e);
                ProbeResult::default()
            }
            Err(_) => {
                debug!("[process] Version probe '{}' timed out", program);
                ProbeResult::default()
            }
        }
    }

    async fn start_detached(&self, spec: &LaunchSpec) -> io::Result<()> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&spec.log_path)?;
        let log_err = log.try_clone()?;

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        // Own process group: terminal signals aimed at us must not reach the server
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn()?;
        debug!(
            "[process] Started {} detached (pid {:?})",
            spec.program,
            child.id()
        );
        // Dropping the handle leaves the process running.
        drop(child);
        Ok(())
    }

    fn kill_matching(&self, pattern: &Regex) -> usize {
        let system = Self::snapshot();
        let mut killed = 0;

        for pid in Self::matching_pids(&system, pattern) {
            let Some(process) = system.process(pid) else {
                continue;
            };
            // SIGTERM first, SIGKILL if that cannot be delivered
            let signalled = match process.kill_with(Signal::Term) {
                Some(true) => true,
                _ => process.kill_with(Signal::Kill).unwrap_or(false),
            };
            if signalled {
                killed += 1;
            } else {
                warn!("[process] Failed to signal pid {}", pid.as_u32());
            }
        }

        killed
    }
}

#[async_trait]
impl CommandRunner for SystemProcesses {
    fn which(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    async fn run_shell(&self, command: &str) -> CommandOutput {
        match Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(out) => CommandOutput {
                status: out.status.code(),
                output: combine_output(&out.stdout, &out.stderr),
            },
            Err(e) => CommandOutput {
                status: None,
                output: format!("failed to spawn sh: {}", e),
            },
        }
    }
}
