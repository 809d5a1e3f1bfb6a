//! Global configuration model for a convoy invocation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::types::{DriftField, LogFormat};

/// Root configuration for a convoy invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvoyConfig {
    /// Path to the manifest document.
    pub manifest_path: PathBuf,
    /// Placement zone of this host, as supplied by the provisioning layer.
    pub zone: Option<String>,
    /// Overrides the hostname reported by the kernel.
    pub hostname: Option<String>,
    /// Grace period in seconds when stopping or restarting a container.
    pub stop_timeout_secs: u64,
    /// Upper bound in seconds on a pre-start hook's run time.
    pub hook_timeout_secs: Option<u64>,
    /// Fields compared when deciding whether a container drifted.
    pub drift_fields: Vec<DriftField>,
    /// Container runtime binary.
    pub docker_binary: PathBuf,
    /// Log output format.
    pub log_format: LogFormat,
}

impl ConvoyConfig {
    /// Stop grace period as a [`Duration`].
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Hook deadline as a [`Duration`], if one is configured.
    #[must_use]
    pub fn hook_timeout(&self) -> Option<Duration> {
        self.hook_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ConvoyConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from(constants::DEFAULT_MANIFEST),
            zone: None,
            hostname: None,
            stop_timeout_secs: constants::DEFAULT_STOP_TIMEOUT_SECS,
            hook_timeout_secs: None,
            drift_fields: vec![DriftField::Image],
            docker_binary: PathBuf::from(constants::DEFAULT_DOCKER_BINARY),
            log_format: LogFormat::Text,
        }
    }
}
