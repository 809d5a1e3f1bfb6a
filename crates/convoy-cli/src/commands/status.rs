//! `convoy status`: show whether each manifest container is running.

use std::process::ExitCode;

use clap::Args;
use convoy_common::config::ConvoyConfig;

use super::Session;
use crate::output;

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {}

/// Executes the `status` command.
///
/// Exits with status 1 unless every container is running.
///
/// # Errors
///
/// Returns an error if the manifest is invalid or the runtime cannot be queried.
pub fn execute(config: &ConvoyConfig, _args: &StatusArgs) -> anyhow::Result<ExitCode> {
    let session = Session::open(config)?;
    let report = session.reconciler().status(&session.manifest)?;
    print!("{}", output::format_status(&report));
    Ok(ExitCode::from(report.exit_code()))
}
