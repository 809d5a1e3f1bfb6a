//! Static validation of a loaded manifest.
//!
//! Runs before any container is touched so that a bad document never
//! leaves the host half-reconciled.

use convoy_common::error::{ConvoyError, Result};

use crate::environment;
use crate::model::{Command, ContainerSpec, Manifest};

/// Validates a manifest for semantic correctness.
///
/// # Checks performed
///
/// 1. Every container declares a non-empty image.
/// 2. Every link target names a container in the manifest.
/// 3. Commands, when present, are not empty and split into words
///    (balanced quotes); every hook has a command.
/// 4. Every environment directive (container and hook overlays) names a
///    known function.
///
/// Cycles are reported by [`crate::graph`], not here.
///
/// # Errors
///
/// Returns the first failing check.
pub fn validate(manifest: &Manifest) -> Result<()> {
    tracing::debug!(containers = manifest.len(), "validating manifest");
    for spec in manifest.containers() {
        check_image(spec)?;
        check_links(manifest, spec)?;
        check_commands(spec)?;
        check_environment_functions(spec)?;
    }
    Ok(())
}

fn check_image(spec: &ContainerSpec) -> Result<()> {
    if spec.image.trim().is_empty() {
        return Err(ConvoyError::Manifest {
            message: format!("container \"{}\" has an empty image", spec.name),
        });
    }
    Ok(())
}

fn check_links(manifest: &Manifest, spec: &ContainerSpec) -> Result<()> {
    for target in spec.dependencies() {
        if !manifest.contains(target) {
            return Err(ConvoyError::Manifest {
                message: format!(
                    "container \"{}\" links to \"{target}\", which is not defined",
                    spec.name
                ),
            });
        }
    }
    Ok(())
}

fn check_commands(spec: &ContainerSpec) -> Result<()> {
    if let Some(command) = &spec.command {
        if command.is_empty() {
            return Err(ConvoyError::Manifest {
                message: format!("container \"{}\" has an empty command", spec.name),
            });
        }
        check_splits(command, &spec.name)?;
    }
    for (index, hook) in spec.pre_start.iter().enumerate() {
        let owner = format!("{}/pre_start[{index}]", spec.name);
        if hook.command.is_empty() {
            return Err(ConvoyError::Manifest {
                message: format!("container \"{}\" pre_start[{index}] has no command", spec.name),
            });
        }
        check_splits(&hook.command, &owner)?;
    }
    Ok(())
}

fn check_splits(command: &Command, owner: &str) -> Result<()> {
    if command.argv().is_err() {
        return Err(ConvoyError::Manifest {
            message: format!("\"{owner}\" has unbalanced quotes in its command: {command}"),
        });
    }
    Ok(())
}

fn check_environment_functions(spec: &ContainerSpec) -> Result<()> {
    environment::check_functions(&spec.name, &spec.environment)?;
    for (index, hook) in spec.pre_start.iter().enumerate() {
        let owner = format!("{}/pre_start[{index}]", spec.name);
        environment::check_functions(&owner, &hook.environment)?;
    }
    Ok(())
}
