//! `convoy plan`: print the execution order without touching the runtime.

use std::process::ExitCode;

use clap::Args;
use convoy_common::config::ConvoyConfig;

use crate::output;

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {}

/// Executes the `plan` command.
///
/// Loads and validates the manifest, resolves the execution order, and
/// prints a per-container summary. Environment directives are not fetched.
///
/// # Errors
///
/// Returns an error if the manifest is invalid or its links form a cycle.
pub fn execute(config: &ConvoyConfig, _args: &PlanArgs) -> anyhow::Result<ExitCode> {
    let manifest = convoy_manifest::loader::load_manifest(&config.manifest_path)?;
    let order = convoy_manifest::graph::execution_order(&manifest)?;
    print!(
        "{}",
        output::format_plan(&config.manifest_path.display().to_string(), &manifest, &order)
    );
    Ok(ExitCode::SUCCESS)
}
