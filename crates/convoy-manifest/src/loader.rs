//! Reading manifest documents from disk.
//!
//! A `.json` extension selects JSON; anything else is read as YAML.
//! Every loaded manifest is validated before it is returned.

use std::path::Path;

use convoy_common::error::{ConvoyError, Result};

use crate::model::Manifest;
use crate::validator;

/// Loads and validates the manifest at `path`.
///
/// # Errors
///
/// Returns [`ConvoyError::Io`] if the file cannot be read, and a manifest
/// or environment-function error if the document is malformed or invalid.
pub fn load_manifest(path: &Path) -> Result<Manifest> {
    tracing::info!(path = %path.display(), "loading manifest");

    let content = std::fs::read_to_string(path).map_err(|e| ConvoyError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        parse_json(&content)
    } else {
        parse_yaml(&content)
    }
}

/// Parses and validates a JSON manifest.
///
/// # Errors
///
/// Returns an error if the document is malformed or fails validation.
pub fn parse_json(content: &str) -> Result<Manifest> {
    let manifest: Manifest = serde_json::from_str(content).map_err(|e| ConvoyError::Manifest {
        message: e.to_string(),
    })?;
    validator::validate(&manifest)?;
    Ok(manifest)
}

/// Parses and validates a YAML manifest.
///
/// # Errors
///
/// Returns an error if the document is malformed or fails validation.
pub fn parse_yaml(content: &str) -> Result<Manifest> {
    let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| ConvoyError::Manifest {
        message: e.to_string(),
    })?;
    validator::validate(&manifest)?;
    Ok(manifest)
}
