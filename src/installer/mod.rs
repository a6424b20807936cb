//! Agent Installer
//!
//! Makes sure the download agents are on `PATH`, installing them through
//! apt when they are not. Installation is best-effort: every step runs even
//! if an earlier one failed, failures are logged and nothing is rolled back.
//! The only result is whether the tool resolves on `PATH` afterwards.

mod plan;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::env_probe;
use crate::process::CommandRunner;
use crate::types::Tool;

pub use plan::{install_plan, InstallStep};

/// Maximum characters of step output kept in a log record.
const OUTPUT_LOG_LIMIT: usize = 2000;

/// Installation capability used by the orchestrator
#[async_trait]
pub trait ToolInstaller: Send + Sync {
    /// Install `tool` unless it is already present. Never fails; returns
    /// whether the tool is on `PATH` afterwards.
    async fn ensure_installed(&self, tool: Tool) -> bool;
}

#[async_trait]
impl<T: ToolInstaller + ?Sized> ToolInstaller for Arc<T> {
    async fn ensure_installed(&self, tool: Tool) -> bool {
        (**self).ensure_installed(tool).await
    }
}

/// How to invoke the fallback downloader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackInvocation {
    pub program: String,
    /// Arguments placed before `--path`
    pub leading_args: Vec<String>,
}

/// Pick `megatools-dl` when available, else `megatools dl`.
///
/// When neither resolves the standalone name is returned so the attempt
/// fails with a spawn error instead of being skipped.
pub fn resolve_fallback<R: CommandRunner + ?Sized>(
    runner: &R,
    config: &AgentConfig,
) -> FallbackInvocation {
    let fallback = &config.fallback;
    if runner.which(&fallback.dl_binary).is_none() && runner.which(&fallback.multi_binary).is_some()
    {
        return FallbackInvocation {
            program: fallback.multi_binary.clone(),
            leading_args: vec!["dl".to_string()],
        };
    }

    FallbackInvocation {
        program: fallback.dl_binary.clone(),
        leading_args: Vec::new(),
    }
}

/// apt-based installer for both agents
pub struct AgentInstaller<R> {
    runner: R,
    config: AgentConfig,
}

impl<R: CommandRunner> AgentInstaller<R> {
    pub fn new(runner: R, config: AgentConfig) -> Self {
        Self { runner, config }
    }

    /// Whether the executables of `tool` resolve on `PATH`
    pub fn is_installed(&self, tool: Tool) -> bool {
        match tool {
            Tool::Primary => {
                self.runner.which(&self.config.primary.get_binary).is_some()
                    && self.runner.which(&self.config.primary.server_binary).is_some()
            }
            Tool::Fallback => {
                self.runner.which(&self.config.fallback.dl_binary).is_some()
                    || self.runner.which(&self.config.fallback.multi_binary).is_some()
            }
        }
    }

    /// Install `tool` unless present
    pub async fn ensure_installed(&self, tool: Tool) -> bool {
        if self.is_installed(tool) {
            debug!("[installer] {} already installed", tool);
            return true;
        }

        let label = match tool {
            Tool::Primary => env_probe::detect_repository_id(
                &self.config.installer.os_release_path,
                &self.config.installer.default_repository_label,
            ),
            Tool::Fallback => self.config.installer.default_repository_label.clone(),
        };

        info!("[installer] Installing {} ...", tool);
        for step in install_plan(tool, &self.config, &label) {
            debug!("[installer] {}: {}", step.description, step.command);
            let result = self.runner.run_shell(&step.command).await;
            if !result.success() {
                warn!(
                    "[installer] {} failed (exit {:?}): {}",
                    step.description,
                    result.status,
                    truncate(result.output.trim(), OUTPUT_LOG_LIMIT)
                );
            }
        }

        let installed = self.is_installed(tool);
        if installed {
            info!("[installer] {} installed", tool);
        } else {
            warn!("[installer] {} still not found on PATH after install", tool);
        }
        installed
    }
}

#[async_trait]
impl<R: CommandRunner> ToolInstaller for AgentInstaller<R> {
    async fn ensure_installed(&self, tool: Tool) -> bool {
        AgentInstaller::ensure_installed(self, tool).await
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
