//! megapull: download a MEGA link with server recovery and megatools fallback.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use thiserror::Error;
use tracing::{info, warn};

use megapull::config::{load_config, AgentConfig, ConfigError};
use megapull::logging::init_logging;
use megapull::runner::stdout_sink;
use megapull::supervisor::SupervisorError;
use megapull::{build_orchestrator, Tool, TransferRequest};

#[derive(Parser)]
#[command(name = "megapull", version)]
#[command(about = "Download a MEGA public link via MEGAcmd, falling back to megatools")]
struct Cli {
    /// MEGA public link
    #[arg(long)]
    url: Option<String>,

    /// Output directory
    #[arg(long, default_value = "downloads")]
    out: PathBuf,

    /// JSON config file (default: <config dir>/megapull/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seconds to wait for the MEGAcmd server to become ready
    #[arg(long)]
    server_timeout: Option<f64>,

    /// Do not install MEGAcmd when it is missing
    #[arg(long)]
    no_install: bool,

    /// Print the transfer report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("Cannot encode report: {0}")]
    Report(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, CliError> {
    let mut config = load_config(cli.config.as_deref())?;
    apply_overrides(&cli, &mut config);

    let agents = build_orchestrator(config, stdout_sink())?;
    let request = TransferRequest::new(cli.url.unwrap_or_default(), cli.out);

    // Prepare the primary agent once up front; the orchestrator handles recovery.
    if request.has_link() {
        if !agents.installer.is_installed(Tool::Primary) {
            if cli.no_install {
                warn!("MEGAcmd not found on PATH and --no-install given");
            } else if !agents.installer.ensure_installed(Tool::Primary).await {
                warn!("MEGAcmd install did not complete, continuing");
            }
        }
        if !agents.supervisor.start().await {
            warn!("MEGAcmd server not ready ({}), continuing", agents.supervisor.state());
        }
    } else {
        eprintln!("Please provide a MEGA public URL with --url.");
    }

    let report = agents.orchestrator.transfer_with_report(&request).await;
    for (i, attempt) in report.attempts.iter().enumerate() {
        info!(
            "Attempt {}: {} exited with {}",
            i + 1,
            attempt.tool_used,
            attempt.exit_code
        );
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    if report.outcome.is_success() {
        println!("Download completed successfully ({}).", report.outcome);
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Download {}.", report.outcome);
        Ok(ExitCode::FAILURE)
    }
}

/// Command-line values take precedence over the config file
fn apply_overrides(cli: &Cli, config: &mut AgentConfig) {
    if let Some(secs) = cli.server_timeout {
        config.server.start_timeout_secs = secs;
    }
}
