//! Transfer Runner: one download attempt with one agent.
//!
//! The primary agent's output is streamed to the sink as it is produced,
//! split on both `\n` and `\r` so progress updates arrive line by line. The
//! fallback agent runs to completion and its captured output is handed over
//! afterwards.
//!
//! Exit codes are passed through untouched; the only synthesized values are
//! [`SPAWN_FAILED_EXIT`] and [`SIGNALLED_EXIT`].

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::installer::resolve_fallback;
use crate::process::CommandRunner;
use crate::stream::TerminatedLines;
use crate::types::{AttemptResult, Tool, TransferRequest};

/// Exit code reported when the agent executable could not be started
pub const SPAWN_FAILED_EXIT: i32 = 127;

/// Exit code reported when the agent was terminated by a signal
pub const SIGNALLED_EXIT: i32 = -1;

/// Receives agent output, one line per call
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Sink printing agent output to stdout
pub fn stdout_sink() -> LineSink {
    Arc::new(|line: &str| println!("{}", line))
}

/// Attempt capability used by the orchestrator
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    async fn run_attempt(&self, request: &TransferRequest, tool: Tool) -> AttemptResult;
}

/// Runs agent executables as child processes
pub struct TransferRunner<R> {
    runner: R,
    config: AgentConfig,
    sink: LineSink,
}

impl<R: CommandRunner> TransferRunner<R> {
    pub fn new(runner: R, config: AgentConfig, sink: LineSink) -> Self {
        Self {
            runner,
            config,
            sink,
        }
    }

    pub async fn run_attempt(&self, request: &TransferRequest, tool: Tool) -> AttemptResult {
        let exit_code = match tool {
            Tool::Primary => self.run_primary(request).await,
            Tool::Fallback => self.run_fallback(request).await,
        };

        info!("[runner] {} exited with {}", tool, exit_code);
        AttemptResult {
            exit_code,
            tool_used: tool,
        }
    }

    async fn run_primary(&self, request: &TransferRequest) -> i32 {
        let program = &self.config.primary.get_binary;
        info!(
            "[runner] {} {} {}",
            program,
            request.source_link(),
            request.destination_path().display()
        );

        let mut child = match Command::new(program)
            .arg(request.source_link())
            .arg(request.destination_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!("[runner] Failed to start {}: {}", program, e);
                return SPAWN_FAILED_EXIT;
            }
        };

        let stdout = child.stdout.take().map(TerminatedLines::new);
        let stderr = child.stderr.take().map(TerminatedLines::new);

        let waited = stream_until_exit(
            child.wait(),
            stdout,
            stderr,
            self.config.runner.drain_grace(),
            &*self.sink,
        )
        .await;

        match waited {
            Ok(status) => exit_code(status),
            Err(e) => {
                warn!("[runner] Failed waiting for {}: {}", program, e);
                SIGNALLED_EXIT
            }
        }
    }

    async fn run_fallback(&self, request: &TransferRequest) -> i32 {
        let invocation = resolve_fallback(&self.runner, &self.config);
        info!(
            "[runner] {} {} --path {} {}",
            invocation.program,
            invocation.leading_args.join(" "),
            request.destination_path().display(),
            request.source_link()
        );

        let output = Command::new(&invocation.program)
            .args(&invocation.leading_args)
            .arg("--path")
            .arg(request.destination_path())
            .arg(request.source_link())
            .stdin(Stdio::null())
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("[runner] Failed to start {}: {}", invocation.program, e);
                return SPAWN_FAILED_EXIT;
            }
        };

        for captured in [&output.stdout, &output.stderr] {
            match TerminatedLines::new(captured.as_slice()).collect().await {
                Ok(lines) => lines.iter().for_each(|line| (self.sink)(line.as_str())),
                Err(e) => warn!("[runner] Unreadable fallback output: {}", e),
            }
        }

        exit_code(output.status)
    }
}

#[async_trait]
impl<R: CommandRunner> AttemptRunner for TransferRunner<R> {
    async fn run_attempt(&self, request: &TransferRequest, tool: Tool) -> AttemptResult {
        TransferRunner::run_attempt(self, request, tool).await
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(SIGNALLED_EXIT)
}

async fn next_line<T: AsyncRead + Unpin>(
    lines: &mut Option<TerminatedLines<T>>,
) -> io::Result<Option<String>> {
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

/// Forward both output streams to `sink` until the process has exited and
/// its output is drained.
///
/// Once the process exits, whatever is still readable is forwarded for at
/// most `drain_grace`; a descendant holding the pipes open cannot keep the
/// attempt alive past that.
async fn stream_until_exit<W, O, E>(
    wait: W,
    mut stdout: Option<TerminatedLines<O>>,
    mut stderr: Option<TerminatedLines<E>>,
    drain_grace: std::time::Duration,
    sink: &(dyn Fn(&str) + Send + Sync),
) -> io::Result<ExitStatus>
where
    W: std::future::Future<Output = io::Result<ExitStatus>>,
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    tokio::pin!(wait);
    let mut status: Option<ExitStatus> = None;
    let mut drain_deadline: Option<Instant> = None;

    loop {
        if let Some(status) = status {
            if stdout.is_none() && stderr.is_none() {
                return Ok(status);
            }
        }

        let deadline = drain_deadline.unwrap_or_else(Instant::now);
        tokio::select! {
            line = next_line(&mut stdout), if stdout.is_some() => match line {
                Ok(Some(line)) => sink(line.as_str()),
                Ok(None) => stdout = None,
                Err(e) => {
                    warn!("[runner] stdout read failed: {}", e);
                    stdout = None;
                }
            },
            line = next_line(&mut stderr), if stderr.is_some() => match line {
                Ok(Some(line)) => sink(line.as_str()),
                Ok(None) => stderr = None,
                Err(e) => {
                    warn!("[runner] stderr read failed: {}", e);
                    stderr = None;
                }
            },
            exited = &mut wait, if status.is_none() => {
                status = Some(exited?);
                drain_deadline = Some(Instant::now() + drain_grace);
            },
            _ = tokio::time::sleep_until(deadline), if drain_deadline.is_some() => {
                debug!("[runner] Output still open after exit, stop reading");
                stdout = None;
                stderr = None;
            },
        }
    }
}

/// Convenience for callers that do not want output
pub fn discard_sink() -> LineSink {
    Arc::new(|_: &str| {})
}
