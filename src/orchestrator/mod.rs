//! Recovery Orchestrator
//!
//! Drives one transfer through a fixed escalation:
//!
//! ```text
//!  link empty? ──yes──► Failure(missing link)
//!      │ no
//!      ▼
//!  create destination
//!      │
//!      ▼
//!  Primary attempt ──ok──► Success(Primary)
//!      │ fail
//!      ▼
//!  restart server (result only logged)
//!      │
//!      ▼
//!  Primary attempt ──ok──► Success(Primary)
//!      │ fail
//!      ▼
//!  install fallback
//!      │
//!      ▼
//!  Fallback attempt ──ok──► Success(Fallback)
//!      │ fail
//!      ▼
//!  Failure(all methods exhausted)
//! ```
//!
//! Each tier runs at most once; there is no retry loop.

use std::time::Duration;

use tracing::{info, warn};

use crate::installer::ToolInstaller;
use crate::runner::AttemptRunner;
use crate::supervisor::ServerControl;
use crate::types::{
    AttemptResult, FailureReason, RecoveryOutcome, Tool, TransferReport, TransferRequest,
};

/// Sequences attempts across the agent tiers
pub struct Orchestrator<A, S, I> {
    runner: A,
    server: S,
    installer: I,
    server_timeout: Duration,
}

impl<A, S, I> Orchestrator<A, S, I>
where
    A: AttemptRunner,
    S: ServerControl,
    I: ToolInstaller,
{
    pub fn new(runner: A, server: S, installer: I, server_timeout: Duration) -> Self {
        Self {
            runner,
            server,
            installer,
            server_timeout,
        }
    }

    /// Run the escalation and return the terminal outcome
    pub async fn transfer(&self, request: &TransferRequest) -> RecoveryOutcome {
        self.transfer_with_report(request).await.outcome
    }

    /// Run the escalation, keeping every attempt result
    pub async fn transfer_with_report(&self, request: &TransferRequest) -> TransferReport {
        let mut attempts = Vec::new();

        if !request.has_link() {
            warn!("[orchestrator] No link given");
            return TransferReport {
                outcome: RecoveryOutcome::Failure(FailureReason::MissingLink),
                attempts,
            };
        }

        let destination = request.destination_path();
        if let Err(e) = tokio::fs::create_dir_all(destination).await {
            warn!(
                "[orchestrator] Cannot create {}: {}",
                destination.display(),
                e
            );
            return TransferReport {
                outcome: RecoveryOutcome::Failure(FailureReason::DestinationUnavailable(
                    e.to_string(),
                )),
                attempts,
            };
        }

        // Tier 1
        let first = self.runner.run_attempt(request, Tool::Primary).await;
        attempts.push(first);
        if first.succeeded() {
            info!("[orchestrator] Download completed");
            return success(Tool::Primary, attempts);
        }

        // Tier 2
        warn!(
            "[orchestrator] {} failed (exit {}), restarting server and retrying",
            Tool::Primary,
            first.exit_code
        );
        if !self.server.start_server(self.server_timeout).await {
            warn!("[orchestrator] Server did not become ready, retrying anyway");
        }
        let second = self.runner.run_attempt(request, Tool::Primary).await;
        attempts.push(second);
        if second.succeeded() {
            info!("[orchestrator] Download completed on retry");
            return success(Tool::Primary, attempts);
        }

        // Tier 3
        warn!(
            "[orchestrator] {} still failing (exit {}), trying {}",
            Tool::Primary,
            second.exit_code,
            Tool::Fallback
        );
        if !self.installer.ensure_installed(Tool::Fallback).await {
            warn!("[orchestrator] {} not available, trying anyway", Tool::Fallback);
        }
        let third = self.runner.run_attempt(request, Tool::Fallback).await;
        attempts.push(third);
        if third.succeeded() {
            info!("[orchestrator] Download completed with {}", Tool::Fallback);
            return success(Tool::Fallback, attempts);
        }

        warn!(
            "[orchestrator] {} failed (exit {}), all methods exhausted",
            Tool::Fallback,
            third.exit_code
        );
        TransferReport {
            outcome: RecoveryOutcome::Failure(FailureReason::Exhausted),
            attempts,
        }
    }
}

fn success(tool: Tool, attempts: Vec<AttemptResult>) -> TransferReport {
    TransferReport {
        outcome: RecoveryOutcome::Success(tool),
        attempts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Everything the fakes observed, in call order
    #[derive(Default)]
    struct Calls {
        log: Mutex<Vec<String>>,
        exit_codes: Mutex<VecDeque<i32>>,
    }

    impl Calls {
        fn with_exit_codes(codes: &[i32]) -> Arc<Self> {
            let calls = Self::default();
            calls.exit_codes.lock().extend(codes.iter().copied());
            Arc::new(calls)
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().clone()
        }

        fn count(&self, entry: &str) -> usize {
            self.log.lock().iter().filter(|e| *e == entry).count()
        }
    }

    struct FakeRunner(Arc<Calls>);
    struct FakeServer(Arc<Calls>, bool);
    struct FakeInstaller(Arc<Calls>);

    #[async_trait]
    impl AttemptRunner for FakeRunner {
        async fn run_attempt(&self, _request: &TransferRequest, tool: Tool) -> AttemptResult {
            self.0.log.lock().push(format!("attempt:{:?}", tool));
            let exit_code = self
                .0
                .exit_codes
                .lock()
                .pop_front()
                .expect("unexpected attempt");
            AttemptResult {
                exit_code,
                tool_used: tool,
            }
        }
    }

    #[async_trait]
    impl ServerControl for FakeServer {
        async fn start_server(&self, timeout: Duration) -> bool {
            assert_eq!(timeout, Duration::from_secs(25));
            self.0.log.lock().push("start_server".to_string());
            self.1
        }
    }

    #[async_trait]
    impl ToolInstaller for FakeInstaller {
        async fn ensure_installed(&self, tool: Tool) -> bool {
            self.0.log.lock().push(format!("install:{:?}", tool));
            true
        }
    }

    fn orchestrator(
        calls: &Arc<Calls>,
        server_ready: bool,
    ) -> Orchestrator<FakeRunner, FakeServer, FakeInstaller> {
        Orchestrator::new(
            FakeRunner(calls.clone()),
            FakeServer(calls.clone(), server_ready),
            FakeInstaller(calls.clone()),
            Duration::from_secs(25),
        )
    }

    #[tokio::test]
    async fn test_missing_link_has_no_side_effects() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("downloads");
        let calls = Calls::with_exit_codes(&[]);

        let outcome = orchestrator(&calls, true)
            .transfer(&TransferRequest::new("", &destination))
            .await;

        assert_eq!(outcome, RecoveryOutcome::Failure(FailureReason::MissingLink));
        assert_eq!(outcome.to_string(), "failed: missing link");
        assert!(calls.log().is_empty());
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Calls::with_exit_codes(&[0]);

        let report = orchestrator(&calls, true)
            .transfer_with_report(&TransferRequest::new("https://mega.nz/file/a#k", temp_dir.path()))
            .await;

        assert_eq!(report.outcome, RecoveryOutcome::Success(Tool::Primary));
        assert_eq!(report.attempts.len(), 1);
        assert_eq!(calls.log(), vec!["attempt:Primary"]);
        assert_eq!(calls.count("start_server"), 0);
        assert_eq!(calls.count("install:Fallback"), 0);
    }

    #[tokio::test]
    async fn test_retry_after_server_restart() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Calls::with_exit_codes(&[1, 0]);

        let outcome = orchestrator(&calls, true)
            .transfer(&TransferRequest::new("https://mega.nz/file/a#k", temp_dir.path()))
            .await;

        assert_eq!(outcome, RecoveryOutcome::Success(Tool::Primary));
        assert_eq!(
            calls.log(),
            vec!["attempt:Primary", "start_server", "attempt:Primary"]
        );
    }

    #[tokio::test]
    async fn test_fallback_succeeds() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Calls::with_exit_codes(&[9, 9, 0]);

        let report = orchestrator(&calls, true)
            .transfer_with_report(&TransferRequest::new("https://mega.nz/file/a#k", temp_dir.path()))
            .await;

        assert_eq!(report.outcome, RecoveryOutcome::Success(Tool::Fallback));
        assert_eq!(
            calls.log(),
            vec![
                "attempt:Primary",
                "start_server",
                "attempt:Primary",
                "install:Fallback",
                "attempt:Fallback",
            ]
        );
        assert_eq!(calls.count("start_server"), 1);
        assert_eq!(calls.count("install:Fallback"), 1);
        assert_eq!(
            report.attempts.iter().map(|a| a.exit_code).collect::<Vec<_>>(),
            vec![9, 9, 0]
        );
    }

    #[tokio::test]
    async fn test_all_methods_exhausted() {
        let temp_dir = TempDir::new().unwrap();
        let calls = Calls::with_exit_codes(&[1, 2, 3]);

        let report = orchestrator(&calls, false)
            .transfer_with_report(&TransferRequest::new("https://mega.nz/file/a#k", temp_dir.path()))
            .await;

        assert_eq!(report.outcome, RecoveryOutcome::Failure(FailureReason::Exhausted));
        assert_eq!(report.outcome.to_string(), "failed: all methods exhausted");
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(report.attempts[2].tool_used, Tool::Fallback);
        // Server never came up, escalation continued regardless
        assert_eq!(calls.count("start_server"), 1);
    }

    #[tokio::test]
    async fn test_destination_created_when_absent() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("a").join("b");
        let calls = Calls::with_exit_codes(&[0]);

        orchestrator(&calls, true)
            .transfer(&TransferRequest::new("https://mega.nz/file/a#k", &destination))
            .await;

        assert!(destination.is_dir());
    }

    #[tokio::test]
    async fn test_existing_destination_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let existing = temp_dir.path().join("partial.bin");
        std::fs::write(&existing, "half a file").unwrap();
        let calls = Calls::with_exit_codes(&[1, 1, 1]);

        orchestrator(&calls, true)
            .transfer(&TransferRequest::new("https://mega.nz/file/a#k", temp_dir.path()))
            .await;

        assert_eq!(std::fs::read_to_string(&existing).unwrap(), "half a file");
    }

    #[tokio::test]
    async fn test_destination_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let calls = Calls::with_exit_codes(&[]);

        let outcome = orchestrator(&calls, true)
            .transfer(&TransferRequest::new("https://mega.nz/file/a#k", blocker.join("sub")))
            .await;

        assert!(matches!(
            outcome,
            RecoveryOutcome::Failure(FailureReason::DestinationUnavailable(_))
        ));
        assert!(calls.log().is_empty());
    }
}
