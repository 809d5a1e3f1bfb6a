//! Unified error type for the convoy workspace.
//!
//! Every library crate returns [`Result`]; the CLI converts into
//! `anyhow::Error` at the top level.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum ConvoyError {
    /// The manifest is missing required fields, is malformed, or references
    /// containers it does not define.
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of the problem.
        message: String,
    },

    /// The link graph contains a cycle.
    #[error("dependency cycle between containers: {}", .containers.join(", "))]
    DependencyCycle {
        /// Containers that could not be ordered, sorted by name.
        containers: Vec<String>,
    },

    /// An environment directive names a function that does not exist.
    #[error("unknown environment function \"{function}\" for {container}/{variable}")]
    UnknownEnvironmentFunction {
        /// Container (or `container/pre_start[n]`) owning the variable.
        container: String,
        /// Environment variable name.
        variable: String,
        /// The unrecognized function name.
        function: String,
    },

    /// A hostname directive has a shape that is neither a string nor the
    /// `use-default` marker.
    #[error("unknown hostname format for {container}: {found}")]
    UnknownHostnameFormat {
        /// Container declaring the hostname.
        container: String,
        /// Rendering of the offending value.
        found: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A container runtime operation failed.
    #[error("runtime {operation} failed for {container}: {message}")]
    Runtime {
        /// Container (or image) the operation targeted.
        container: String,
        /// Adapter operation name (`create`, `start`, `pull`, ...).
        operation: &'static str,
        /// Failure detail reported by the adapter.
        message: String,
    },

    /// A transient container did not exit within its deadline.
    #[error("container {container} did not exit within {timeout:?}")]
    HookTimeout {
        /// Transient container name.
        container: String,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// Fetching the value of an environment directive failed.
    #[error("failed to fetch {location}: {message}")]
    EnvironmentFetch {
        /// Location that was read.
        location: String,
        /// Failure detail.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl ConvoyError {
    /// Shorthand for a [`ConvoyError::Runtime`] failure.
    pub fn runtime(
        container: impl Into<String>,
        operation: &'static str,
        message: impl ToString,
    ) -> Self {
        Self::Runtime {
            container: container.into(),
            operation,
            message: message.to_string(),
        }
    }

    /// Returns `true` for errors caused by an unrecognized configuration
    /// shape rather than by the runtime.
    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Config { .. }
                | Self::UnknownHostnameFormat { .. }
                | Self::UnknownEnvironmentFunction { .. }
        )
    }

    /// Returns `true` if the error came from the runtime adapter.
    #[must_use]
    pub const fn is_runtime_error(&self) -> bool {
        matches!(self, Self::Runtime { .. } | Self::HookTimeout { .. })
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, ConvoyError>;
