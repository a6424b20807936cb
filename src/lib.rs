//! megapull: fetch MEGA links through MEGAcmd, recovering from a stuck
//! server and falling back to megatools.
//!
//! The [`orchestrator::Orchestrator`] drives the escalation; its
//! collaborators are injected through the [`runner::AttemptRunner`],
//! [`supervisor::ServerControl`] and [`installer::ToolInstaller`] traits.
//! [`build_orchestrator`] wires the real implementations.

pub mod config;
pub mod env_probe;
pub mod installer;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod runner;
pub mod stream;
pub mod supervisor;
pub mod types;

use std::sync::Arc;

pub use config::AgentConfig;
pub use orchestrator::Orchestrator;
pub use types::{AttemptResult, FailureReason, RecoveryOutcome, Tool, TransferReport, TransferRequest};

use installer::AgentInstaller;
use process::SystemProcesses;
use runner::{LineSink, TransferRunner};
use supervisor::{ServerSupervisor, SupervisorError};

/// Orchestrator wired to the host's processes
pub type SystemOrchestrator = Orchestrator<
    TransferRunner<SystemProcesses>,
    Arc<ServerSupervisor<SystemProcesses>>,
    Arc<AgentInstaller<SystemProcesses>>,
>;

/// Real collaborators, shared with callers that need them before the transfer
pub struct Agents {
    pub supervisor: Arc<ServerSupervisor<SystemProcesses>>,
    pub installer: Arc<AgentInstaller<SystemProcesses>>,
    pub orchestrator: SystemOrchestrator,
}

/// Build the orchestrator and its collaborators from `config`
pub fn build_orchestrator(config: AgentConfig, sink: LineSink) -> Result<Agents, SupervisorError> {
    let processes = SystemProcesses::new();
    let supervisor = Arc::new(ServerSupervisor::new(processes.clone(), config.clone())?);
    let installer = Arc::new(AgentInstaller::new(processes.clone(), config.clone()));
    let server_timeout = config.server.start_timeout();
    let runner = TransferRunner::new(processes, config, sink);

    Ok(Agents {
        orchestrator: Orchestrator::new(
            runner,
            supervisor.clone(),
            installer.clone(),
            server_timeout,
        ),
        supervisor,
        installer,
    })
}
