//! Domain primitive types used across the convoy workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConvoyError;

/// Observed lifecycle state of a named container on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// No container with this name exists.
    Absent,
    /// The container exists but is not running.
    Stopped,
    /// The container is running.
    Running,
}

impl ContainerState {
    /// Derives the state from the two observed runtime flags.
    #[must_use]
    pub const fn from_flags(exists: bool, running: bool) -> Self {
        match (exists, running) {
            (false, _) => Self::Absent,
            (true, false) => Self::Stopped,
            (true, true) => Self::Running,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "ABSENT"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Running => write!(f, "RUNNING"),
        }
    }
}

/// A container attribute that drift detection can compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftField {
    /// Image reference.
    Image,
    /// Environment variables.
    Env,
    /// Exposed ports.
    Ports,
    /// Volume binds.
    Volumes,
    /// Container links.
    Links,
}

impl DriftField {
    /// Every comparable field.
    pub const ALL: [Self; 5] = [
        Self::Image,
        Self::Env,
        Self::Ports,
        Self::Volumes,
        Self::Links,
    ];
}

impl fmt::Display for DriftField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Image => "image",
            Self::Env => "env",
            Self::Ports => "ports",
            Self::Volumes => "volumes",
            Self::Links => "links",
        };
        f.write_str(name)
    }
}

impl FromStr for DriftField {
    type Err = ConvoyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "env" | "environment" => Ok(Self::Env),
            "ports" => Ok(Self::Ports),
            "volumes" => Ok(Self::Volumes),
            "links" => Ok(Self::Links),
            other => Err(ConvoyError::Config {
                message: format!("unknown drift field: {other}"),
            }),
        }
    }
}

/// Output format for log lines emitted by the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = ConvoyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConvoyError::Config {
                message: format!("unknown log format \"{other}\" (expected text or json)"),
            }),
        }
    }
}
