//! `convoy apply`: converge containers to the manifest.

use std::process::ExitCode;

use clap::Args;
use convoy_common::config::ConvoyConfig;
use convoy_runtime::RunFlags;

use super::Session;
use crate::output;

/// Arguments for the `apply` command.
#[derive(Args, Debug)]
pub struct ApplyArgs {
    /// Pull every image and recreate its container.
    #[arg(long)]
    pub force_pull: bool,

    /// Restart containers that are already running and up to date.
    #[arg(long)]
    pub force_restart: bool,

    /// Reconcile only this container.
    #[arg(long, value_name = "NAME")]
    pub container: Option<String>,
}

/// Executes the `apply` command.
///
/// Exits with status 1 if any container failed or was skipped.
///
/// # Errors
///
/// Returns an error if the manifest is invalid or cannot be prepared.
pub fn execute(config: &ConvoyConfig, args: &ApplyArgs) -> anyhow::Result<ExitCode> {
    let session = Session::open(config)?;
    let flags = RunFlags {
        force_pull: args.force_pull,
        force_restart: args.force_restart,
        target: args.container.clone(),
    };

    let report = session.reconciler().reconcile(&session.manifest, &flags)?;
    print!("{}", output::format_report(&report));

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(failed = report.failures().count(), "reconciliation incomplete");
        Ok(ExitCode::FAILURE)
    }
}
