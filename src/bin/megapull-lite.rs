//! megapull-lite: single `mega-get` run, no installation and no recovery.
//!
//! Deliberately minimal: if MEGAcmd is missing it prints where to get it and
//! stops; a failing download is reported as-is without retries or fallback.

use std::path::PathBuf;
use std::process::{ExitCode, Stdio};

use clap::Parser;
use tokio::process::Command;

use megapull::config::AgentConfig;
use megapull::logging::init_logging;

const INSTALL_HINT: &str =
    "MEGAcmd (mega-get) not found on PATH. Install from https://mega.nz/cmd and try again.";

#[derive(Parser)]
#[command(name = "megapull-lite", version)]
#[command(about = "Download a MEGA public link with mega-get")]
struct Cli {
    /// MEGA public link
    link: String,

    /// Output directory
    #[arg(default_value = "downloads")]
    output_path: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(0);

    if let Err(e) = tokio::fs::create_dir_all(&cli.output_path).await {
        eprintln!("Cannot create {}: {}", cli.output_path.display(), e);
        return ExitCode::FAILURE;
    }

    let get_binary = AgentConfig::default().primary.get_binary;
    if which::which(&get_binary).is_err() {
        println!("{}", INSTALL_HINT);
        return ExitCode::FAILURE;
    }

    println!("Starting download...");
    let output = Command::new(&get_binary)
        .arg(&cli.link)
        .arg(&cli.output_path)
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) => {
            print!("{}", String::from_utf8_lossy(&output.stdout));
            eprint!("{}", String::from_utf8_lossy(&output.stderr));
            match output.status.code() {
                Some(0) => ExitCode::SUCCESS,
                Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
                None => ExitCode::FAILURE,
            }
        }
        Err(e) => {
            eprintln!("Failed to run {}: {}", get_binary, e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positional_arguments() {
        let cli = Cli::parse_from(["megapull-lite", "https://mega.nz/file/a#k"]);
        assert_eq!(cli.output_path, PathBuf::from("downloads"));

        let cli = Cli::parse_from(["megapull-lite", "https://mega.nz/file/a#k", "/tmp/out"]);
        assert_eq!(cli.link, "https://mega.nz/file/a#k");
        assert_eq!(cli.output_path, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_link_is_required() {
        assert!(Cli::try_parse_from(["megapull-lite"]).is_err());
    }
}
