//! Container runtime abstraction.
//!
//! The reconciler only ever talks to the runtime through
//! [`ContainerBackend`]; it assumes no capability beyond this trait.

pub mod docker;
pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use convoy_common::error::Result;

/// A resource limit with normalized values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UlimitSetting {
    /// Limit name.
    pub name: String,
    /// Soft limit.
    pub soft: i64,
    /// Hard limit.
    pub hard: i64,
}

/// Everything needed to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequest {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command overriding the image default; empty keeps the default.
    pub command: Vec<String>,
    /// Fully resolved environment.
    pub env: BTreeMap<String, String>,
    /// Hostname; `None` lets the engine choose.
    pub hostname: Option<String>,
    /// Volume binds, `host:container[:mode]`.
    pub volumes: Vec<String>,
    /// Container port to host binding.
    pub port_bindings: BTreeMap<String, String>,
    /// Ports exposed by the container, `port/proto`.
    pub exposed_ports: Vec<String>,
    /// Links as `(container, alias)`.
    pub links: Vec<(String, String)>,
    /// Privileged mode.
    pub privileged: bool,
    /// Relative CPU weight.
    pub cpu_shares: Option<u64>,
    /// Resource limits.
    pub ulimits: Vec<UlimitSetting>,
    /// Network mode.
    pub network_mode: Option<String>,
    /// IPC namespace mode.
    pub ipc_mode: Option<String>,
    /// PID namespace mode.
    pub pid_mode: Option<String>,
}

impl CreateRequest {
    /// Links rendered as `container:alias`.
    #[must_use]
    pub fn link_specs(&self) -> BTreeSet<String> {
        self.links
            .iter()
            .map(|(name, alias)| format!("{name}:{alias}"))
            .collect()
    }
}

/// Observed configuration of an existing container.
///
/// The image and running flag are always reported. The remaining fields are
/// `None` when the backend cannot observe them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectInfo {
    /// Image reference the container was created from.
    pub image: String,
    /// Whether the container is running.
    pub running: bool,
    /// Environment inside the container (image defaults included).
    pub env: Option<BTreeMap<String, String>>,
    /// Exposed ports, `port/proto`.
    pub exposed_ports: Option<BTreeSet<String>>,
    /// Volume binds.
    pub volumes: Option<BTreeSet<String>>,
    /// Links as `container:alias`.
    pub links: Option<BTreeSet<String>>,
}

/// Narrow interface over a container engine.
///
/// Containers are addressed by name. Every method fails with
/// [`convoy_common::error::ConvoyError::Runtime`] naming the container and
/// operation.
pub trait ContainerBackend: Send + Sync {
    /// Returns whether the image is present locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pulls the image from its registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the pull fails.
    fn pull_image(&self, image: &str) -> Result<()>;

    /// Returns whether a container with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be queried.
    fn container_exists(&self, name: &str) -> Result<bool>;

    /// Returns whether the named container is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist.
    fn container_running(&self, name: &str) -> Result<bool>;

    /// Returns the observed configuration of the named container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist.
    fn inspect(&self, name: &str) -> Result<InspectInfo>;

    /// Creates (but does not start) a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created.
    fn create(&self, request: &CreateRequest) -> Result<()>;

    /// Starts a created or stopped container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be started.
    fn start(&self, name: &str) -> Result<()>;

    /// Stops a running container, killing it after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be stopped.
    fn stop(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Removes a stopped container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be removed.
    fn remove(&self, name: &str) -> Result<()>;

    /// Blocks until the container exits and returns its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`convoy_common::error::ConvoyError::HookTimeout`] if
    /// `timeout` elapses first, or a runtime error if waiting fails.
    fn wait_for_exit(&self, name: &str, timeout: Option<Duration>) -> Result<i64>;

    /// Returns the container's combined output.
    ///
    /// # Errors
    ///
    /// Returns an error if logs cannot be retrieved.
    fn fetch_logs(&self, name: &str) -> Result<String>;
}

/// Creates the Docker CLI backend for the given runtime binary.
///
/// # Errors
///
/// Returns an error if the binary cannot be found.
pub fn docker_backend(binary: &Path) -> Result<Box<dyn ContainerBackend>> {
    Ok(Box::new(docker::DockerCliBackend::new(binary)?))
}

/// Normalizes a port to `port/proto`, defaulting to TCP.
#[must_use]
pub fn normalize_port(port: &str) -> String {
    let port = port.trim();
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{port}/tcp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_port_defaults_to_tcp() {
        assert_eq!(normalize_port("80"), "80/tcp");
        assert_eq!(normalize_port("53/udp"), "53/udp");
    }

    #[test]
    fn link_specs_render_alias() {
        let request = CreateRequest {
            links: vec![("db".into(), "database".into())],
            ..CreateRequest::default()
        };
        assert_eq!(
            request.link_specs().into_iter().collect::<Vec<_>>(),
            vec!["db:database"]
        );
    }
}
