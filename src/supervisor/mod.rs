//! Server Supervisor: (re)starts the MEGAcmd background server.
//!
//! Workflow of [`ServerSupervisor::start_server`]:
//! 1. Prepare the log directory (create, mode 700, remove stale sockets/locks)
//! 2. Terminate any running server by command-line match
//! 3. Launch the server detached, output appended to the log file
//! 4. Poll until the process is visible *and* the version probe is healthy
//! 5. On timeout, surface the log tail and report failure
//!
//! Nothing here raises: a server that does not come up is reported as
//! `false` and the caller decides how to proceed.

mod state;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::process::{LaunchSpec, ProcessControl};

pub use state::ServerState;

/// Environment variable fixing the agent's text encoding
const CODEPAGE_ENV: &str = "MEGACMD_CODEPAGE";

/// Prefix of the server's socket/lock files
const STALE_PREFIX: &str = "megacmd";
const SOCKET_SUFFIX: &str = ".sock";

/// Bytes read from the end of the server log when building its tail
const TAIL_READ_LIMIT: u64 = 256 * 1024;

/// Supervisor errors (internal; logged at the `start_server` boundary)
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Invalid server pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Log directory {path} unusable: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Server restart capability used by the orchestrator
#[async_trait]
pub trait ServerControl: Send + Sync {
    /// Restart the server and wait up to `timeout` for it to become healthy
    async fn start_server(&self, timeout: Duration) -> bool;
}

#[async_trait]
impl<T: ServerControl + ?Sized> ServerControl for Arc<T> {
    async fn start_server(&self, timeout: Duration) -> bool {
        (**self).start_server(timeout).await
    }
}

/// Supervises the primary agent's background server
pub struct ServerSupervisor<P> {
    processes: P,
    config: AgentConfig,
    pattern: Regex,
    state: RwLock<ServerState>,
}

impl<P: ProcessControl> ServerSupervisor<P> {
    pub fn new(processes: P, config: AgentConfig) -> Result<Self, SupervisorError> {
        let pattern = Regex::new(&config.primary.server_pattern)?;
        Ok(Self {
            processes,
            config,
            pattern,
            state: RwLock::new(ServerState::default()),
        })
    }

    /// Snapshot of the current liveness state
    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// Restart with the configured timeout
    pub async fn start(&self) -> bool {
        self.start_server(self.config.server.start_timeout()).await
    }

    /// Restart the server from a clean state and wait for readiness.
    pub async fn start_server(&self, timeout: Duration) -> bool {
        self.state.write().reset();

        if let Err(e) = prepare_log_dir(&self.config.server.log_dir, &self.config.server.log_file) {
            warn!("[server] {}", e);
        }

        let killed = self.processes.kill_matching(&self.pattern);
        if killed > 0 {
            info!("[server] Terminated {} existing server process(es)", killed);
        }

        if let Err(e) = self.launch().await {
            warn!("[server] {}", e);
            self.state.write().mark_down();
            return false;
        }

        let interval = self.config.server.poll_interval();
        let started = Instant::now();
        loop {
            let pid_detected = self.processes.is_running(&self.pattern);
            let probe = self
                .processes
                .probe_version(&self.config.primary.version_binary)
                .await;
            let probe_ok = probe.is_healthy(&self.config.primary.product_name);

            if self.state.write().record_poll(pid_detected, probe_ok) {
                info!(
                    "[server] Ready after {:.1}s",
                    started.elapsed().as_secs_f64()
                );
                return true;
            }
            debug!(
                "[server] Not ready (process: {}, probe: {}): {}",
                pid_detected,
                probe_ok,
                probe.output.trim()
            );

            if started.elapsed() >= timeout {
                break;
            }
            tokio::time::sleep(interval).await;
        }

        self.state.write().mark_down();
        match self.log_tail() {
            Ok(tail) => warn!(
                "[server] Not ready after {:.1}s. Log tail:\n{}",
                timeout.as_secs_f64(),
                tail
            ),
            Err(e) => warn!(
                "[server] Not ready after {:.1}s, could not read server log: {}",
                timeout.as_secs_f64(),
                e
            ),
        }
        false
    }

    /// Last lines of the server log
    pub fn log_tail(&self) -> io::Result<String> {
        read_tail(
            &self.config.server.log_path(),
            self.config.server.log_tail_lines,
            TAIL_READ_LIMIT,
        )
    }

    async fn launch(&self) -> Result<(), SupervisorError> {
        let primary = &self.config.primary;
        let spec = LaunchSpec {
            program: primary.server_binary.clone(),
            args: primary.server_args.clone(),
            env: vec![(CODEPAGE_ENV.to_string(), primary.codepage.clone())],
            log_path: self.config.server.log_path(),
        };

        self.processes
            .start_detached(&spec)
            .await
            .map_err(|source| SupervisorError::Launch {
                program: spec.program.clone(),
                source,
            })?;
        debug!("[server] Launched {} {:?}", spec.program, spec.args);
        Ok(())
    }
}

#[async_trait]
impl<P: ProcessControl> ServerControl for ServerSupervisor<P> {
    async fn start_server(&self, timeout: Duration) -> bool {
        ServerSupervisor::start_server(self, timeout).await
    }
}

/// Create the log directory with owner-only permissions and remove stale
/// socket/lock files left by a previous server. The log file itself is kept.
fn prepare_log_dir(dir: &Path, log_file: &str) -> Result<(), SupervisorError> {
    let dir_err = |source| SupervisorError::LogDir {
        path: dir.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(dir_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)) {
            warn!("[server] Failed to set permissions on {}: {}", dir.display(), e);
        }
    }

    for entry in std::fs::read_dir(dir).map_err(dir_err)? {
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let stale = name != log_file
            && (name.starts_with(STALE_PREFIX) || name.ends_with(SOCKET_SUFFIX));
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(true);

        if stale && !is_dir {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => debug!("[server] Removed stale {}", name),
                Err(e) => warn!("[server] Failed to remove {}: {}", name, e),
            }
        }
    }

    Ok(())
}

/// Last `lines` lines of a file, looking at no more than its final
/// `max_bytes` bytes
fn read_tail(path: &Path, lines: usize, max_bytes: u64) -> io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let offset = len.saturating_sub(max_bytes);
    file.seek(SeekFrom::Start(offset))?;

    let mut bytes = Vec::new();
    file.take(max_bytes).read_to_end(&mut bytes)?;

    // Started mid-file: drop the partial first line
    if offset > 0 {
        if let Some(newline) = bytes.iter().position(|&b| b == b'\n') {
            bytes.drain(..=newline);
        }
    }

    let text = String::from_utf8_lossy(&bytes);
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProbeResult;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fake process table: becomes healthy after `healthy_after` polls.
    #[derive(Clone, Default)]
    struct FakeProcesses {
        healthy_after: Option<usize>,
        process_visible: bool,
        polls: Arc<AtomicUsize>,
        kills: Arc<AtomicUsize>,
        launches: Arc<Mutex<Vec<LaunchSpec>>>,
        launch_fails: bool,
    }

    #[async_trait]
    impl ProcessControl for FakeProcesses {
        fn is_running(&self, pattern: &Regex) -> bool {
            assert!(pattern.is_match("mega-cmd-server --debug-full"));
            self.process_visible
        }

        async fn probe_version(&self, program: &str) -> ProbeResult {
            assert_eq!(program, "mega-version");
            let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.healthy_after {
                Some(n) if poll >= n => ProbeResult {
                    success: false,
                    output: "MEGAcmd version: 1.7.0.0: code 10700000".to_string(),
                },
                _ => ProbeResult {
                    success: false,
                    output: "Server not running".to_string(),
                },
            }
        }

        async fn start_detached(&self, spec: &LaunchSpec) -> io::Result<()> {
            if self.launch_fails {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
            }
            self.launches.lock().push(spec.clone());
            Ok(())
        }

        fn kill_matching(&self, _pattern: &Regex) -> usize {
            self.kills.fetch_add(1, Ordering::SeqCst);
            1
        }
    }

    fn test_config(dir: &Path) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.server.log_dir = dir.join(".megaCmd");
        config
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_within_one_interval() {
        let temp_dir = TempDir::new().unwrap();
        let fake = FakeProcesses {
            healthy_after: Some(1),
            process_visible: true,
            ..Default::default()
        };
        let supervisor = ServerSupervisor::new(fake.clone(), test_config(temp_dir.path())).unwrap();

        let started = Instant::now();
        assert!(supervisor.start_server(Duration::from_secs(25)).await);
        assert!(started.elapsed() <= Duration::from_millis(500));
        assert!(supervisor.state().running);

        assert_eq!(fake.kills.load(Ordering::SeqCst), 1);
        let launches = fake.launches.lock();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].program, "mega-cmd-server");
        assert_eq!(launches[0].args, vec!["--debug-full"]);
        assert_eq!(
            launches[0].env,
            vec![("MEGACMD_CODEPAGE".to_string(), "UTF-8".to_string())]
        );
        assert!(launches[0].log_path.ends_with(".megaCmd/megacmdserver.log"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_a_few_polls() {
        let temp_dir = TempDir::new().unwrap();
        let fake = FakeProcesses {
            healthy_after: Some(4),
            process_visible: true,
            ..Default::default()
        };
        let supervisor = ServerSupervisor::new(fake.clone(), test_config(temp_dir.path())).unwrap();

        let started = Instant::now();
        assert!(supervisor.start_server(Duration::from_secs(25)).await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(2000));
        assert_eq!(fake.polls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_waits_full_window() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path());
        std::fs::create_dir_all(&config.server.log_dir).unwrap();
        std::fs::write(config.server.log_path(), "boot\nfatal: cannot bind socket\n").unwrap();

        let fake = FakeProcesses::default();
        let supervisor = ServerSupervisor::new(fake.clone(), config).unwrap();

        let started = Instant::now();
        assert!(!supervisor.start_server(Duration::from_secs(25)).await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(25));
        assert!(elapsed < Duration::from_secs(26));
        // t = 0.0, 0.5, ..., 25.0
        assert_eq!(fake.polls.load(Ordering::SeqCst), 51);

        let state = supervisor.state();
        assert!(!state.running);
        assert!(!state.pid_detected);
        assert_eq!(supervisor.log_tail().unwrap(), "boot\nfatal: cannot bind socket");
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_alone_is_not_enough() {
        let temp_dir = TempDir::new().unwrap();
        let fake = FakeProcesses {
            healthy_after: Some(1),
            process_visible: false,
            ..Default::default()
        };
        let supervisor = ServerSupervisor::new(fake, test_config(temp_dir.path())).unwrap();

        assert!(!supervisor.start_server(Duration::from_secs(2)).await);
        let state = supervisor.state();
        assert!(state.version_probe_ok);
        assert!(!state.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let fake = FakeProcesses {
            launch_fails: true,
            ..Default::default()
        };
        let supervisor = ServerSupervisor::new(fake.clone(), test_config(temp_dir.path())).unwrap();

        assert!(!supervisor.start_server(Duration::from_secs(25)).await);
        assert_eq!(fake.polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let fake = FakeProcesses {
            healthy_after: Some(1),
            process_visible: true,
            ..Default::default()
        };
        let supervisor = ServerSupervisor::new(fake.clone(), test_config(temp_dir.path())).unwrap();

        assert!(supervisor.start_server(Duration::from_secs(5)).await);
        assert!(supervisor.start_server(Duration::from_secs(5)).await);
        assert_eq!(fake.kills.load(Ordering::SeqCst), 2);
        assert_eq!(fake.launches.lock().len(), 2);
    }

    #[test]
    fn test_prepare_log_dir_removes_stale_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join(".megaCmd");
        std::fs::create_dir_all(dir.join("megacmd-cache")).unwrap();
        for name in ["megacmd.lock", "megacmdserver.log", "server.sock", "session.json"] {
            std::fs::write(dir.join(name), "x").unwrap();
        }

        prepare_log_dir(&dir, "megacmdserver.log").unwrap();

        assert!(!dir.join("megacmd.lock").exists());
        assert!(!dir.join("server.sock").exists());
        assert!(dir.join("megacmdserver.log").exists());
        assert!(dir.join("session.json").exists());
        assert!(dir.join("megacmd-cache").is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }

    #[test]
    fn test_read_tail_limits_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log");
        let contents: String = (1..=300).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(&path, contents).unwrap();

        let tail = read_tail(&path, 200, TAIL_READ_LIMIT).unwrap();
        let lines: Vec<_> = tail.lines().collect();
        assert_eq!(lines.len(), 200);
        assert_eq!(lines[0], "line 101");
        assert_eq!(lines[199], "line 300");
    }

    #[test]
    fn test_read_tail_reads_only_the_end() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("log");
        let contents: String = (1..=1000).map(|i| format!("line {:04}\n", i)).collect();
        std::fs::write(&path, contents).unwrap();

        // Each line is 10 bytes; 35 bytes reach into the middle of line 997
        let tail = read_tail(&path, 200, 35).unwrap();
        assert_eq!(tail, "line 0998\nline 0999\nline 1000");

        let short = temp_dir.path().join("short");
        std::fs::write(&short, "only line").unwrap();
        assert_eq!(read_tail(&short, 200, 35).unwrap(), "only line");
    }
}
