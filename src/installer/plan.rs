//! apt command sequences for installing each agent.

use crate::config::AgentConfig;
use crate::types::Tool;

/// One shell command of an install plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallStep {
    pub description: &'static str,
    pub command: String,
}

impl InstallStep {
    fn new(description: &'static str, command: String) -> Self {
        Self {
            description,
            command,
        }
    }
}

/// Build the fixed install sequence for `tool`.
///
/// `label` selects the vendor repository and is only used for the primary agent.
pub fn install_plan(tool: Tool, config: &AgentConfig, label: &str) -> Vec<InstallStep> {
    let installer = &config.installer;
    let privileged = |cmd: &str| {
        if installer.sudo.trim().is_empty() {
            cmd.to_string()
        } else {
            format!("{} {}", installer.sudo.trim(), cmd)
        }
    };
    let refresh = || InstallStep::new("refresh package index", privileged("apt-get update -y"));

    match tool {
        Tool::Primary => {
            let repo_url = format!(
                "{}/{}",
                installer.repository_base_url.trim_end_matches('/'),
                label
            );
            let keyring = installer.keyring_path.display().to_string();
            let source_list = installer.source_list_path.display().to_string();
            let source_entry = format!("deb [signed-by={}] {}/ ./", keyring, repo_url);

            vec![
                refresh(),
                InstallStep::new(
                    "install prerequisites",
                    privileged(&format!(
                        "apt-get install -y {}",
                        installer.prerequisites.join(" ")
                    )),
                ),
                InstallStep::new(
                    "register signing key",
                    format!(
                        "curl -fsSL {} | gpg --dearmor | {} >/dev/null",
                        quote(&format!("{}/Release.key", repo_url)),
                        privileged(&format!("tee {}", quote(&keyring)))
                    ),
                ),
                InstallStep::new(
                    "register repository",
                    format!(
                        "echo {} | {} >/dev/null",
                        quote(&source_entry),
                        privileged(&format!("tee {}", quote(&source_list)))
                    ),
                ),
                refresh(),
                InstallStep::new(
                    "install agent",
                    privileged(&format!("apt-get install -y {}", config.primary.package)),
                ),
            ]
        }
        Tool::Fallback => vec![
            refresh(),
            InstallStep::new(
                "install agent",
                privileged(&format!("apt-get install -y {}", config.fallback.package)),
            ),
        ],
    }
}

/// Single-quote for `sh`
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
