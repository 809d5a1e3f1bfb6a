//! `convoy run`: one-off command with a container's configuration.

use std::process::ExitCode;

use clap::Args;
use convoy_common::config::ConvoyConfig;

use super::Session;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Manifest container whose configuration the command runs with.
    pub container: String,

    /// Command and arguments, after `--`.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// Prints the command's output and exits with its exit code. The
/// transient container is removed whatever the outcome.
///
/// # Errors
///
/// Returns an error if the container is unknown or the runtime fails.
pub fn execute(config: &ConvoyConfig, args: &RunArgs) -> anyhow::Result<ExitCode> {
    let session = Session::open(config)?;
    let output = session
        .reconciler()
        .run_once(&session.manifest, &args.container, &args.command)?;

    print!("{}", output.logs);
    tracing::info!(container = %args.container, exit_code = output.exit_code, "command finished");
    Ok(ExitCode::from(exit_status(output.exit_code)))
}

/// Maps a container exit code to a process exit status.
fn exit_status(code: i64) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
